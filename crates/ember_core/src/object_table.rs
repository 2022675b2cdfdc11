//! Global object table
//!
//! Every live entity is reachable here by id. The table is the only place
//! that assigns clone ids and the only place slots are freed (see the purge
//! sweep in [`crate::gc`]). Destroyed entities remain as tombstones until
//! then: lookups skip them, but their id stays taken.

use crate::entity::{Entity, EntityRef};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinHandle;

#[derive(Debug, Error)]
pub enum ObjectTableError {
    #[error("an entity with id '{id}' is already registered")]
    DuplicateId { id: String },
}

#[derive(Default)]
pub struct ObjectTable {
    entities: DashMap<String, EntityRef>,
    counters: DashMap<String, u64>,
    pub(crate) gc_tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ObjectTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an entity under its id. Tombstoned entries still hold
    /// their id until purged.
    pub fn register(&self, entity: EntityRef) -> Result<(), ObjectTableError> {
        match self.entities.entry(entity.id().to_string()) {
            Entry::Occupied(_) => Err(ObjectTableError::DuplicateId {
                id: entity.id().to_string(),
            }),
            Entry::Vacant(slot) => {
                slot.insert(entity);
                Ok(())
            }
        }
    }

    /// Remove `entity` if its id currently maps to this very entity.
    pub fn unregister(&self, entity: &EntityRef) -> bool {
        self.entities
            .remove_if(entity.id(), |_, current| Arc::ptr_eq(current, entity))
            .is_some()
    }

    /// Live (non-destroyed) entity by id.
    pub fn find_by_id(&self, id: &str) -> Option<EntityRef> {
        self.entities
            .get(id)
            .map(|slot| slot.value().clone())
            .filter(|entity| !entity.is_destroyed())
    }

    /// Live entities matching `predicate`, grouped by blueprint and ordered
    /// by clone number within each blueprint (`x#2` before `x#10`).
    pub fn find_all<F>(&self, predicate: F) -> Vec<EntityRef>
    where
        F: Fn(&Entity) -> bool,
    {
        let mut found: Vec<EntityRef> = self
            .snapshot()
            .into_iter()
            .filter(|entity| !entity.is_destroyed() && predicate(entity.as_ref()))
            .collect();
        found.sort_by(|a, b| {
            (a.blueprint_id(), instance_number(a), a.id()).cmp(&(b.blueprint_id(), instance_number(b), b.id()))
        });
        found
    }

    /// Whether the id is taken, tombstones included.
    pub fn contains(&self, id: &str) -> bool {
        self.entities.contains_key(id)
    }

    /// Next clone id for a blueprint: `blueprint#1`, `blueprint#2`, ...
    /// Numbers are never handed out twice.
    pub fn next_instance_id(&self, blueprint_id: &str) -> String {
        let mut counter = self.counters.entry(blueprint_id.to_string()).or_insert(0);
        *counter += 1;
        format!("{blueprint_id}#{}", *counter)
    }

    /// Number of slots in use, tombstones included.
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn live_count(&self) -> usize {
        self.entities
            .iter()
            .filter(|slot| !slot.value().is_destroyed())
            .count()
    }

    /// Copy of every slot. Sweeps iterate this instead of the map so no
    /// shard lock is held while hooks run.
    pub(crate) fn snapshot(&self) -> Vec<EntityRef> {
        self.entities.iter().map(|slot| slot.value().clone()).collect()
    }

    pub(crate) fn remove_destroyed(&self) -> usize {
        let before = self.entities.len();
        self.entities.retain(|_, entity| !entity.is_destroyed());
        before - self.entities.len()
    }

    pub(crate) fn clear(&self) {
        self.entities.clear();
    }
}

/// Clone number of `blueprint#N` ids; singletons sort first as `0`.
fn instance_number(entity: &Entity) -> u64 {
    entity
        .id()
        .strip_prefix(entity.blueprint_id())
        .and_then(|suffix| suffix.strip_prefix('#'))
        .and_then(|number| number.parse().ok())
        .unwrap_or(0)
}
