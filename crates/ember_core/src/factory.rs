//! Entity factory
//!
//! Turns registry metadata into live, registered, initialized entities.
//! Singletons ("virtual" objects) are addressed by their blueprint id;
//! clones get `blueprint#N` ids from the object table. Asking for the wrong
//! mode is a programming error and fails immediately.

use crate::behavior::BehaviorError;
use crate::blueprint::BlueprintId;
use crate::entity::{Entity, EntityRef};
use crate::object_table::{ObjectTable, ObjectTableError};
use crate::registry::BlueprintRegistry;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

/// Attribute holding quest definitions declared on a blueprint.
pub const QUESTS_ATTRIBUTE: &str = "quests";

#[derive(Debug, Error)]
pub enum FactoryError {
    #[error("unknown blueprint '{id}'")]
    UnknownBlueprint { id: BlueprintId },

    #[error("blueprint '{id}' is not a singleton and cannot be created as a virtual object")]
    NotSingleton { id: BlueprintId },

    #[error("blueprint '{id}' is a singleton and cannot be cloned")]
    SingletonClone { id: BlueprintId },

    #[error(transparent)]
    Table(#[from] ObjectTableError),

    #[error("initializer of '{id}' failed: {source}")]
    Create {
        id: String,
        #[source]
        source: BehaviorError,
    },
}

/// Receives quest definitions found on freshly cloned entities.
///
/// Implemented by the quest subsystem; the factory only forwards.
pub trait QuestRegistrar: Send + Sync {
    fn register_quest(&self, owner: &Entity, definition: &Value);
}

pub struct Factory {
    registry: Arc<BlueprintRegistry>,
    table: Arc<ObjectTable>,
    quests: Option<Arc<dyn QuestRegistrar>>,
}

impl Factory {
    pub fn new(registry: Arc<BlueprintRegistry>, table: Arc<ObjectTable>) -> Self {
        Self {
            registry,
            table,
            quests: None,
        }
    }

    /// Forward `quests` declared on cloned entities to `registrar`.
    pub fn with_quest_registrar(mut self, registrar: Arc<dyn QuestRegistrar>) -> Self {
        self.quests = Some(registrar);
        self
    }

    pub fn registry(&self) -> &Arc<BlueprintRegistry> {
        &self.registry
    }

    pub fn table(&self) -> &Arc<ObjectTable> {
        &self.table
    }

    /// Create the single instance of a singleton blueprint.
    pub fn create_virtual(&self, id: &str) -> Result<EntityRef, FactoryError> {
        let meta = self
            .registry
            .get(id)
            .ok_or_else(|| FactoryError::UnknownBlueprint { id: id.to_string() })?;
        if !meta.is_singleton() {
            return Err(FactoryError::NotSingleton { id: id.to_string() });
        }

        let entity = Entity::new(id, meta);
        self.register_and_initialize(&entity)?;
        debug!(entity = %id, "created virtual object");
        Ok(entity)
    }

    /// Create a new clone of a multi-instance blueprint (`id#N`).
    pub fn clone_instance(&self, id: &str) -> Result<EntityRef, FactoryError> {
        let meta = self
            .registry
            .get(id)
            .ok_or_else(|| FactoryError::UnknownBlueprint { id: id.to_string() })?;
        if meta.is_singleton() {
            return Err(FactoryError::SingletonClone { id: id.to_string() });
        }

        let entity = Entity::new(self.table.next_instance_id(id), meta);
        self.register_and_initialize(&entity)?;
        self.forward_quests(&entity);
        debug!(entity = %entity.id(), "cloned");
        Ok(entity)
    }

    /// Live singleton by blueprint id. Never creates.
    pub fn get_virtual(&self, id: &str) -> Option<EntityRef> {
        self.table
            .find_by_id(id)
            .filter(|entity| entity.blueprint().is_singleton())
    }

    fn register_and_initialize(&self, entity: &EntityRef) -> Result<(), FactoryError> {
        self.table.register(entity.clone())?;
        if let Err(source) = entity.initialize() {
            self.table.unregister(entity);
            return Err(FactoryError::Create {
                id: entity.id().to_string(),
                source,
            });
        }
        Ok(())
    }

    fn forward_quests(&self, entity: &Entity) {
        let Some(quests) = entity.get(QUESTS_ATTRIBUTE) else {
            return;
        };
        let Some(registrar) = &self.quests else {
            debug!(entity = %entity.id(), "no quest registrar, skipping declared quests");
            return;
        };
        match quests {
            Value::Array(definitions) => {
                for definition in &definitions {
                    registrar.register_quest(entity, definition);
                }
            }
            other => warn!(entity = %entity.id(), value = %other, "ignoring non-array quests attribute"),
        }
    }
}
