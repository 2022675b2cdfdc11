//! Live world entities
//!
//! An entity is a shared handle ([`EntityRef`]) owned by the object table.
//! Containment is a tree: a container holds strong references to its
//! children, children hold a weak reference back, so dropping a subtree
//! never leaks through cycles.
//!
//! Destruction is mark-then-reap: [`Entity::destroy`] only sets a tombstone
//! flag. The object table removes the slot on its next purge sweep, so
//! handles held during the current tick stay valid.

use crate::behavior::{Behavior, BehaviorError, EntityClass};
use crate::blueprint::{Attributes, BlueprintId, BlueprintMeta};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::warn;

/// Shared entity handle.
pub type EntityRef = Arc<Entity>;

#[derive(Debug, Error)]
pub enum EntityError {
    #[error("entity '{id}' is destroyed")]
    Destroyed { id: String },

    #[error("moving '{id}' into '{destination}' would create a containment cycle")]
    ContainmentCycle { id: String, destination: String },

    #[error("entity '{id}' belongs to blueprint '{expected}', not '{actual}'")]
    BlueprintMismatch {
        id: String,
        expected: BlueprintId,
        actual: BlueprintId,
    },

    #[error(transparent)]
    Behavior(#[from] BehaviorError),
}

struct EntityState {
    blueprint: Arc<BlueprintMeta>,
    attributes: Attributes,
    temp: Attributes,
    container: Weak<Entity>,
    children: Vec<EntityRef>,
}

pub struct Entity {
    id: String,
    blueprint_id: BlueprintId,
    state: RwLock<EntityState>,
    destroyed: AtomicBool,
    no_clean_up: AtomicBool,
    heartbeat: Mutex<Option<JoinHandle<()>>>,
}

impl Entity {
    /// Build an uninitialized entity. Attributes stay empty until
    /// [`Entity::initialize`] runs.
    pub fn new(id: impl Into<String>, blueprint: Arc<BlueprintMeta>) -> EntityRef {
        Arc::new(Self {
            id: id.into(),
            blueprint_id: blueprint.id().to_string(),
            state: RwLock::new(EntityState {
                blueprint,
                attributes: Attributes::new(),
                temp: Attributes::new(),
                container: Weak::new(),
                children: Vec::new(),
            }),
            destroyed: AtomicBool::new(false),
            no_clean_up: AtomicBool::new(false),
            heartbeat: Mutex::new(None),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn blueprint_id(&self) -> &str {
        &self.blueprint_id
    }

    /// Metadata this entity currently runs under.
    pub fn blueprint(&self) -> Arc<BlueprintMeta> {
        self.state.read().blueprint.clone()
    }

    pub fn behavior(&self) -> Arc<dyn Behavior> {
        self.state.read().blueprint.behavior().clone()
    }

    pub fn class(&self) -> EntityClass {
        self.state.read().blueprint.behavior().class()
    }

    pub fn is_class(&self, class: EntityClass) -> bool {
        self.class() == class
    }

    /// Seed both attribute maps from the blueprint and run its initializer.
    ///
    /// Existing attributes are discarded. Containment is left untouched.
    pub fn initialize(&self) -> Result<(), BehaviorError> {
        let behavior = {
            let mut state = self.state.write();
            let def = state.blueprint.def();
            let attributes = def.attributes.clone();
            let temp = def.temp.clone();
            self.no_clean_up.store(def.no_clean_up, Ordering::Release);
            state.attributes = attributes;
            state.temp = temp;
            state.blueprint.behavior().clone()
        };
        behavior.create(self)
    }

    /// Rebind to reloaded metadata of the same blueprint and re-run the
    /// initializer against this object. Identity and containment survive.
    pub fn reload(&self, blueprint: Arc<BlueprintMeta>) -> Result<(), EntityError> {
        if blueprint.id() != self.blueprint_id {
            return Err(EntityError::BlueprintMismatch {
                id: self.id.clone(),
                expected: self.blueprint_id.clone(),
                actual: blueprint.id().to_string(),
            });
        }
        self.state.write().blueprint = blueprint;
        self.initialize()?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Attributes
    // ------------------------------------------------------------------

    pub fn get(&self, key: &str) -> Option<Value> {
        self.state.read().attributes.get(key).cloned()
    }

    pub fn set(&self, key: impl Into<String>, value: Value) {
        self.state.write().attributes.insert(key.into(), value);
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        self.state.write().attributes.remove(key)
    }

    pub fn get_temp(&self, key: &str) -> Option<Value> {
        self.state.read().temp.get(key).cloned()
    }

    pub fn set_temp(&self, key: impl Into<String>, value: Value) {
        self.state.write().temp.insert(key.into(), value);
    }

    pub fn remove_temp(&self, key: &str) -> Option<Value> {
        self.state.write().temp.remove(key)
    }

    /// Snapshot of the persistent attributes.
    pub fn attributes(&self) -> Attributes {
        self.state.read().attributes.clone()
    }

    /// Snapshot of the ephemeral attributes.
    pub fn temp_attributes(&self) -> Attributes {
        self.state.read().temp.clone()
    }

    // ------------------------------------------------------------------
    // Containment
    // ------------------------------------------------------------------

    pub fn container(&self) -> Option<EntityRef> {
        self.state.read().container.upgrade()
    }

    pub fn children(&self) -> Vec<EntityRef> {
        self.state.read().children.clone()
    }

    pub fn has_children(&self) -> bool {
        !self.state.read().children.is_empty()
    }

    /// Move this entity into `destination`, leaving its current container.
    pub fn move_to(self: &Arc<Self>, destination: &EntityRef) -> Result<(), EntityError> {
        for entity in [self, destination] {
            if entity.is_destroyed() {
                return Err(EntityError::Destroyed {
                    id: entity.id.clone(),
                });
            }
        }

        let mut cursor = Some(destination.clone());
        while let Some(ancestor) = cursor {
            if Arc::ptr_eq(&ancestor, self) {
                return Err(EntityError::ContainmentCycle {
                    id: self.id.clone(),
                    destination: destination.id.clone(),
                });
            }
            cursor = ancestor.container();
        }

        if let Some(current) = self.container() {
            if Arc::ptr_eq(&current, destination) {
                return Ok(());
            }
        }

        self.leave_container();
        destination.state.write().children.push(self.clone());
        self.state.write().container = Arc::downgrade(destination);
        Ok(())
    }

    /// Detach from the current container, if any.
    pub fn leave_container(&self) {
        let previous = std::mem::replace(&mut self.state.write().container, Weak::new());
        if let Some(container) = previous.upgrade() {
            container
                .state
                .write()
                .children
                .retain(|child| !std::ptr::eq(Arc::as_ptr(child), self));
        }
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }

    pub fn is_no_clean_up(&self) -> bool {
        self.no_clean_up.load(Ordering::Acquire)
    }

    /// Exempt (or re-expose) this entity from orphan reclamation, e.g. for the
    /// duration of a multi-step relocation.
    pub fn set_no_clean_up(&self, no_clean_up: bool) {
        self.no_clean_up.store(no_clean_up, Ordering::Release);
    }

    /// Mark the entity destroyed, detach it and destroy its contents.
    ///
    /// The `on_destroy` hook runs first; if it fails nothing changes and the
    /// error is returned. The table slot is freed later by the purge sweep.
    pub fn destroy(&self) -> Result<(), BehaviorError> {
        if self.is_destroyed() {
            return Ok(());
        }
        self.behavior().on_destroy(self)?;
        if self.destroyed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        self.stop_heartbeat();
        self.leave_container();
        for child in self.children() {
            if let Err(error) = child.destroy() {
                warn!(entity = %child.id, container = %self.id, %error, "failed to destroy contained entity");
                child.leave_container();
            }
        }
        Ok(())
    }

    pub(crate) fn clean_up_hook(&self) -> Result<bool, BehaviorError> {
        self.behavior().on_clean_up(self)
    }

    pub(crate) fn reset_hook(&self) -> Result<(), BehaviorError> {
        self.behavior().on_reset(self)
    }

    // ------------------------------------------------------------------
    // Heartbeat
    // ------------------------------------------------------------------

    /// Start calling the behavior's heartbeat every `period`.
    ///
    /// Replaces a running heartbeat. Returns `false` without scheduling
    /// anything when the period is zero or no tokio runtime is available.
    pub fn start_heartbeat(self: &Arc<Self>, period: Duration) -> bool {
        if period.is_zero() || self.is_destroyed() {
            return false;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(entity = %self.id, "no async runtime, heartbeat not started");
            return false;
        };

        let weak = Arc::downgrade(self);
        let task = runtime.spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            loop {
                ticker.tick().await;
                let Some(entity) = weak.upgrade() else { break };
                if entity.is_destroyed() {
                    break;
                }
                if let Err(error) = entity.behavior().heartbeat(&entity) {
                    warn!(entity = %entity.id, %error, "heartbeat failed");
                }
            }
        });

        if let Some(previous) = self.heartbeat.lock().replace(task) {
            previous.abort();
        }
        true
    }

    pub fn stop_heartbeat(&self) {
        if let Some(task) = self.heartbeat.lock().take() {
            task.abort();
        }
    }

    pub fn has_heartbeat(&self) -> bool {
        self.heartbeat
            .lock()
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entity")
            .field("id", &self.id)
            .field("blueprint", &self.blueprint_id)
            .field("destroyed", &self.is_destroyed())
            .finish_non_exhaustive()
    }
}
