use crate::blueprint::{BlueprintId, BlueprintMeta};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

/// Errors that can occur while registering a blueprint.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("blueprint '{id}' is already registered")]
    DuplicateBlueprint { id: BlueprintId },
}

/// Blueprint id → metadata. The single place where id collisions surface.
#[derive(Default)]
pub struct BlueprintRegistry {
    blueprints: RwLock<HashMap<BlueprintId, Arc<BlueprintMeta>>>,
}

impl BlueprintRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register new metadata. Existing entries are never overwritten.
    pub fn register(&self, meta: Arc<BlueprintMeta>) -> Result<(), RegistryError> {
        let mut blueprints = self.blueprints.write();
        if blueprints.contains_key(meta.id()) {
            return Err(RegistryError::DuplicateBlueprint {
                id: meta.id().to_string(),
            });
        }
        blueprints.insert(meta.id().to_string(), meta);
        Ok(())
    }

    pub fn unregister(&self, id: &str) -> Option<Arc<BlueprintMeta>> {
        self.blueprints.write().remove(id)
    }

    pub fn get(&self, id: &str) -> Option<Arc<BlueprintMeta>> {
        self.blueprints.read().get(id).cloned()
    }

    pub fn has(&self, id: &str) -> bool {
        self.blueprints.read().contains_key(id)
    }

    /// All registered blueprints, ordered by id.
    pub fn get_all(&self) -> Vec<Arc<BlueprintMeta>> {
        let mut all: Vec<_> = self.blueprints.read().values().cloned().collect();
        all.sort_by(|a, b| a.id().cmp(b.id()));
        all
    }

    pub fn count(&self) -> usize {
        self.blueprints.read().len()
    }

    pub fn clear(&self) {
        self.blueprints.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::behavior::ItemBehavior;
    use crate::blueprint::BlueprintDef;

    fn meta(id: &str) -> Arc<BlueprintMeta> {
        Arc::new(BlueprintMeta::new(
            id,
            format!("{id}.json"),
            BlueprintDef::new("item"),
            Arc::new(ItemBehavior),
        ))
    }

    #[test]
    fn register_and_lookup() {
        let registry = BlueprintRegistry::new();
        registry.register(meta("item/b")).unwrap();
        registry.register(meta("item/a")).unwrap();

        assert!(registry.has("item/a"));
        assert_eq!(registry.count(), 2);
        assert_eq!(registry.get("item/b").unwrap().id(), "item/b");
        let ids: Vec<_> = registry.get_all().iter().map(|m| m.id().to_string()).collect();
        assert_eq!(ids, vec!["item/a", "item/b"]);
    }

    #[test]
    fn duplicate_id_is_rejected_without_overwrite() {
        let registry = BlueprintRegistry::new();
        let first = meta("item/a");
        registry.register(first.clone()).unwrap();

        let err = registry.register(meta("item/a")).unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateBlueprint { id } if id == "item/a"));
        assert!(Arc::ptr_eq(&registry.get("item/a").unwrap(), &first));
    }

    #[test]
    fn unregister_missing_is_noop() {
        let registry = BlueprintRegistry::new();
        assert!(registry.unregister("nothing").is_none());

        registry.register(meta("item/a")).unwrap();
        assert!(registry.unregister("item/a").is_some());
        assert!(!registry.has("item/a"));

        registry.register(meta("item/b")).unwrap();
        registry.clear();
        assert_eq!(registry.count(), 0);
    }
}
