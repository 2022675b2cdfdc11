//! Behavior contract for blueprint kinds
//!
//! Every blueprint names a `kind`. The kind resolves to a compiled
//! [`Behavior`] registered in a [`BehaviorCatalog`]; a unit whose kind is not
//! registered does not implement the entity contract and is rejected by the
//! loader. Hooks receive the entity they act on and report failures as
//! [`BehaviorError`] instead of panicking.

use crate::entity::Entity;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

/// Coarse classification used by queries such as "all NPCs".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityClass {
    Item,
    Npc,
    Room,
    Area,
    Other,
}

/// Failure raised by a behavior hook.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct BehaviorError(String);

impl BehaviorError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Compiled behavior shared by every entity of a kind.
///
/// Only [`Behavior::class`] is required. The hooks default to "nothing to
/// do"; `on_clean_up` defaults to allowing reclamation.
pub trait Behavior: Send + Sync + 'static {
    fn class(&self) -> EntityClass;

    /// Initializer, run once per instantiation after the blueprint's
    /// attributes have been seeded (and again on hot reload of a singleton).
    fn create(&self, _entity: &Entity) -> Result<(), BehaviorError> {
        Ok(())
    }

    /// Return `Ok(false)` to veto orphan reclamation.
    fn on_clean_up(&self, _entity: &Entity) -> Result<bool, BehaviorError> {
        Ok(true)
    }

    /// Periodic reset (daily counters, restocks, ...).
    fn on_reset(&self, _entity: &Entity) -> Result<(), BehaviorError> {
        Ok(())
    }

    /// Runs before the entity is marked destroyed. An error aborts the destroy.
    fn on_destroy(&self, _entity: &Entity) -> Result<(), BehaviorError> {
        Ok(())
    }

    fn heartbeat(&self, _entity: &Entity) -> Result<(), BehaviorError> {
        Ok(())
    }
}

/// Plain items: default hooks.
pub struct ItemBehavior;

impl Behavior for ItemBehavior {
    fn class(&self) -> EntityClass {
        EntityClass::Item
    }
}

/// NPCs regenerate on heartbeat and heal fully on reset.
pub struct NpcBehavior;

impl NpcBehavior {
    fn number(entity: &Entity, key: &str) -> Option<i64> {
        entity.get(key).and_then(|value| value.as_i64())
    }
}

impl Behavior for NpcBehavior {
    fn class(&self) -> EntityClass {
        EntityClass::Npc
    }

    fn on_reset(&self, entity: &Entity) -> Result<(), BehaviorError> {
        if let Some(max) = Self::number(entity, "maxHp") {
            entity.set("hp", Value::from(max));
        }
        Ok(())
    }

    fn heartbeat(&self, entity: &Entity) -> Result<(), BehaviorError> {
        let (Some(hp), Some(max)) = (Self::number(entity, "hp"), Self::number(entity, "maxHp"))
        else {
            return Ok(());
        };
        if hp < max {
            let regen = Self::number(entity, "regen").unwrap_or(1);
            entity.set("hp", Value::from((hp + regen).min(max)));
        }
        Ok(())
    }
}

/// Rooms are world geometry and never reclaimed as orphans.
pub struct RoomBehavior;

impl Behavior for RoomBehavior {
    fn class(&self) -> EntityClass {
        EntityClass::Room
    }

    fn on_clean_up(&self, _entity: &Entity) -> Result<bool, BehaviorError> {
        Ok(false)
    }
}

/// Areas carry spawn rules and are never reclaimed as orphans.
pub struct AreaBehavior;

impl Behavior for AreaBehavior {
    fn class(&self) -> EntityClass {
        EntityClass::Area
    }

    fn on_clean_up(&self, _entity: &Entity) -> Result<bool, BehaviorError> {
        Ok(false)
    }
}

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("behavior kind '{kind}' is already registered")]
    DuplicateKind { kind: String },
}

/// Kind name → behavior lookup consulted by the loader.
#[derive(Default)]
pub struct BehaviorCatalog {
    kinds: RwLock<HashMap<String, Arc<dyn Behavior>>>,
}

impl BehaviorCatalog {
    /// Create an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog preloaded with `item`, `npc`, `room` and `area`.
    pub fn with_builtins() -> Self {
        let catalog = Self::new();
        {
            let mut kinds = catalog.kinds.write();
            kinds.insert("item".to_string(), Arc::new(ItemBehavior) as Arc<dyn Behavior>);
            kinds.insert("npc".to_string(), Arc::new(NpcBehavior));
            kinds.insert("room".to_string(), Arc::new(RoomBehavior));
            kinds.insert("area".to_string(), Arc::new(AreaBehavior));
        }
        catalog
    }

    pub fn register(
        &self,
        kind: impl Into<String>,
        behavior: Arc<dyn Behavior>,
    ) -> Result<(), CatalogError> {
        let kind = kind.into();
        let mut kinds = self.kinds.write();
        if kinds.contains_key(&kind) {
            return Err(CatalogError::DuplicateKind { kind });
        }
        kinds.insert(kind, behavior);
        Ok(())
    }

    pub fn get(&self, kind: &str) -> Option<Arc<dyn Behavior>> {
        self.kinds.read().get(kind).cloned()
    }

    pub fn kinds(&self) -> Vec<String> {
        let mut kinds: Vec<String> = self.kinds.read().keys().cloned().collect();
        kinds.sort_unstable();
        kinds
    }
}
