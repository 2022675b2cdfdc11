//! World population from area spawn rules
//!
//! Areas are ordinary entities carrying spawn rules as data under
//! `npcSpawns` and `itemSpawns`. The spawn manager clones the named
//! blueprints into their rooms, equips NPCs, starts their heartbeats, and
//! keeps rooms topped up for rules with an interval. Deaths are handled
//! elsewhere; they ask for a delayed respawn, which can be cancelled per
//! room and blueprint.

use crate::behavior::EntityClass;
use crate::blueprint::BlueprintId;
use crate::entity::{EntityError, EntityRef};
use crate::factory::{Factory, FactoryError};
use crate::object_table::ObjectTable;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::Instant;
use tracing::{debug, info, warn};

pub const NPC_SPAWNS_ATTRIBUTE: &str = "npcSpawns";
pub const ITEM_SPAWNS_ATTRIBUTE: &str = "itemSpawns";
/// Blueprint ids an NPC is equipped with when spawned.
pub const EQUIPMENT_ATTRIBUTE: &str = "equipment";
/// Per-NPC heartbeat period override, in milliseconds.
pub const HEARTBEAT_ATTRIBUTE: &str = "heartbeatMs";
/// Ephemeral flag set on equipped items.
pub const EQUIPPED_FLAG: &str = "equipped";

/// One line of an area's population table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpawnRule {
    pub blueprint_id: BlueprintId,
    pub room_id: String,
    #[serde(default = "SpawnRule::default_count")]
    pub count: u32,
    /// Refill period; `0` spawns once.
    #[serde(default)]
    pub interval_ms: u64,
    /// Extra items to equip on top of the blueprint's own `equipment`.
    #[serde(default)]
    pub equipment: Vec<BlueprintId>,
}

impl SpawnRule {
    fn default_count() -> u32 {
        1
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SpawnKind {
    Npc,
    Item,
}

impl SpawnKind {
    fn attribute(self) -> &'static str {
        match self {
            SpawnKind::Npc => NPC_SPAWNS_ATTRIBUTE,
            SpawnKind::Item => ITEM_SPAWNS_ATTRIBUTE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SpawnSettings {
    /// Default NPC heartbeat period in milliseconds.
    pub heartbeat_ms: u64,
    /// Run periodic top-ups for rules with `intervalMs > 0`.
    pub refill: bool,
}

impl Default for SpawnSettings {
    fn default() -> Self {
        Self {
            heartbeat_ms: 2000,
            refill: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpawnReport {
    pub spawned: usize,
    pub failed: usize,
    pub skipped_rules: usize,
}

#[derive(Debug, Error)]
pub enum SpawnError {
    #[error("room '{room}' not found")]
    RoomNotFound { room: String },

    #[error("no async runtime available to schedule timers")]
    NoRuntime,

    #[error(transparent)]
    Factory(#[from] FactoryError),

    #[error(transparent)]
    Entity(#[from] EntityError),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct RespawnKey {
    blueprint_id: BlueprintId,
    room_id: String,
}

/// Handle to one scheduled respawn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RespawnTicket {
    pub blueprint_id: BlueprintId,
    pub room_id: String,
    id: u64,
}

pub struct SpawnManager {
    factory: Arc<Factory>,
    settings: SpawnSettings,
    pending: DashMap<RespawnKey, Vec<(u64, AbortHandle)>>,
    next_ticket: AtomicU64,
    refills: Mutex<Vec<JoinHandle<()>>>,
}

impl SpawnManager {
    pub fn new(factory: Arc<Factory>, settings: SpawnSettings) -> Self {
        Self {
            factory,
            settings,
            pending: DashMap::new(),
            next_ticket: AtomicU64::new(1),
            refills: Mutex::new(Vec::new()),
        }
    }

    fn table(&self) -> &Arc<ObjectTable> {
        self.factory.table()
    }

    /// Apply every spawn rule of every area once.
    pub fn spawn_all(&self) -> SpawnReport {
        let mut report = SpawnReport::default();
        for area in self.table().find_all(|entity| entity.is_class(EntityClass::Area)) {
            for kind in [SpawnKind::Npc, SpawnKind::Item] {
                let (rules, malformed) = self.rules_of(&area, kind);
                report.skipped_rules += malformed;
                for rule in rules {
                    self.apply_rule(&rule, kind, rule.count as usize, &mut report);
                }
            }
        }
        info!(
            spawned = report.spawned,
            failed = report.failed,
            skipped_rules = report.skipped_rules,
            "world populated"
        );
        report
    }

    /// Spawn one NPC into a room right now.
    pub fn respawn_npc(&self, blueprint_id: &str, room_id: &str) -> Result<EntityRef, SpawnError> {
        let room = self
            .table()
            .find_by_id(room_id)
            .ok_or_else(|| SpawnError::RoomNotFound {
                room: room_id.to_string(),
            })?;
        self.spawn_into(blueprint_id, &room, &[], SpawnKind::Npc)
    }

    /// Respawn an NPC after `delay`. The respawn fires even if the world
    /// changed in between, unless cancelled.
    pub fn schedule_respawn(
        self: &Arc<Self>,
        blueprint_id: &str,
        room_id: &str,
        delay: Duration,
    ) -> Result<RespawnTicket, SpawnError> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| SpawnError::NoRuntime)?;
        let key = RespawnKey {
            blueprint_id: blueprint_id.to_string(),
            room_id: room_id.to_string(),
        };
        let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);

        // Hold the slot while spawning so the task cannot retire its ticket
        // before it has been recorded.
        let mut slot = self.pending.entry(key.clone()).or_default();
        let manager = Arc::downgrade(self);
        let task_key = key.clone();
        let task = runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(manager) = manager.upgrade() else { return };
            manager.retire_ticket(&task_key, ticket);
            match manager.respawn_npc(&task_key.blueprint_id, &task_key.room_id) {
                Ok(entity) => debug!(entity = %entity.id(), room = %task_key.room_id, "respawned"),
                Err(error) => warn!(
                    blueprint = %task_key.blueprint_id,
                    room = %task_key.room_id,
                    %error,
                    "respawn failed"
                ),
            }
        });
        slot.push((ticket, task.abort_handle()));
        drop(slot);

        Ok(RespawnTicket {
            blueprint_id: key.blueprint_id,
            room_id: key.room_id,
            id: ticket,
        })
    }

    /// Cancel a single scheduled respawn. Returns `false` if it already fired.
    pub fn cancel_respawn(&self, ticket: &RespawnTicket) -> bool {
        let key = RespawnKey {
            blueprint_id: ticket.blueprint_id.clone(),
            room_id: ticket.room_id.clone(),
        };
        let mut cancelled = false;
        if let Some(mut slot) = self.pending.get_mut(&key) {
            slot.retain(|(id, handle)| {
                if *id == ticket.id {
                    handle.abort();
                    cancelled = true;
                    false
                } else {
                    true
                }
            });
        }
        self.pending.remove_if(&key, |_, tickets| tickets.is_empty());
        cancelled
    }

    /// Cancel every pending respawn of `blueprint_id` into `room_id`.
    pub fn cancel_respawns(&self, blueprint_id: &str, room_id: &str) -> usize {
        let key = RespawnKey {
            blueprint_id: blueprint_id.to_string(),
            room_id: room_id.to_string(),
        };
        let Some((_, tickets)) = self.pending.remove(&key) else {
            return 0;
        };
        for (_, handle) in &tickets {
            handle.abort();
        }
        tickets.len()
    }

    pub fn pending_respawns(&self) -> usize {
        self.pending.iter().map(|slot| slot.value().len()).sum()
    }

    /// Start periodic top-ups for every rule with a non-zero interval.
    /// Returns how many refill timers were started.
    pub fn start(self: &Arc<Self>) -> usize {
        if !self.settings.refill {
            return 0;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("no async runtime, spawn refills not started");
            return 0;
        };

        let mut refills = self.refills.lock();
        for area in self.table().find_all(|entity| entity.is_class(EntityClass::Area)) {
            for kind in [SpawnKind::Npc, SpawnKind::Item] {
                for rule in self.rules_of(&area, kind).0 {
                    if rule.interval_ms == 0 {
                        continue;
                    }
                    let period = Duration::from_millis(rule.interval_ms);
                    let manager = Arc::downgrade(self);
                    refills.push(runtime.spawn(async move {
                        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
                        loop {
                            ticker.tick().await;
                            let Some(manager) = manager.upgrade() else { break };
                            manager.top_up(&rule, kind);
                        }
                    }));
                }
            }
        }
        info!(timers = refills.len(), "spawn refills started");
        refills.len()
    }

    /// Stop refill timers and cancel every pending respawn.
    pub fn shutdown(&self) {
        for task in self.refills.lock().drain(..) {
            task.abort();
        }
        for slot in self.pending.iter() {
            for (_, handle) in slot.value() {
                handle.abort();
            }
        }
        self.pending.clear();
    }

    /// Spawn the instances a rule's room is missing. Returns how many were spawned.
    pub fn top_up(&self, rule: &SpawnRule, kind: SpawnKind) -> usize {
        let Some(room) = self.table().find_by_id(&rule.room_id) else {
            warn!(room = %rule.room_id, blueprint = %rule.blueprint_id, "refill targets a missing room");
            return 0;
        };
        let present = room
            .children()
            .iter()
            .filter(|child| !child.is_destroyed() && child.blueprint_id() == rule.blueprint_id)
            .count();
        let missing = (rule.count as usize).saturating_sub(present);

        let mut report = SpawnReport::default();
        self.apply_rule(rule, kind, missing, &mut report);
        report.spawned
    }

    /// Parse one spawn attribute of an area. Bad entries are logged and
    /// counted; the rest of the array still applies.
    fn rules_of(&self, area: &EntityRef, kind: SpawnKind) -> (Vec<SpawnRule>, usize) {
        let entries = match area.get(kind.attribute()) {
            None => return (Vec::new(), 0),
            Some(Value::Array(entries)) => entries,
            Some(other) => {
                warn!(area = %area.id(), attribute = kind.attribute(), value = %other, "spawn rules are not an array");
                return (Vec::new(), 0);
            }
        };

        let mut rules = Vec::with_capacity(entries.len());
        let mut malformed = 0;
        for (index, entry) in entries.into_iter().enumerate() {
            match serde_json::from_value::<SpawnRule>(entry) {
                Ok(rule) => rules.push(rule),
                Err(error) => {
                    warn!(area = %area.id(), attribute = kind.attribute(), index, %error, "malformed spawn rule");
                    malformed += 1;
                }
            }
        }
        (rules, malformed)
    }

    fn apply_rule(&self, rule: &SpawnRule, kind: SpawnKind, instances: usize, report: &mut SpawnReport) {
        if instances == 0 {
            return;
        }
        let Some(room) = self.table().find_by_id(&rule.room_id) else {
            warn!(room = %rule.room_id, blueprint = %rule.blueprint_id, "spawn rule targets a missing room");
            report.skipped_rules += 1;
            return;
        };

        for _ in 0..instances {
            match self.spawn_into(&rule.blueprint_id, &room, &rule.equipment, kind) {
                Ok(_) => report.spawned += 1,
                Err(error) => {
                    warn!(blueprint = %rule.blueprint_id, room = %rule.room_id, %error, "spawn failed");
                    report.failed += 1;
                }
            }
        }
    }

    fn spawn_into(
        &self,
        blueprint_id: &str,
        room: &EntityRef,
        extra_equipment: &[BlueprintId],
        kind: SpawnKind,
    ) -> Result<EntityRef, SpawnError> {
        let entity = self.factory.clone_instance(blueprint_id)?;
        if kind == SpawnKind::Npc {
            self.equip(&entity, extra_equipment);
        }

        if let Err(error) = entity.move_to(room) {
            if let Err(destroy_error) = entity.destroy() {
                warn!(entity = %entity.id(), error = %destroy_error, "failed to discard unplaced spawn");
            }
            return Err(error.into());
        }

        if kind == SpawnKind::Npc {
            let period = entity
                .get(HEARTBEAT_ATTRIBUTE)
                .and_then(|value| value.as_u64())
                .unwrap_or(self.settings.heartbeat_ms);
            entity.start_heartbeat(Duration::from_millis(period));
        }
        Ok(entity)
    }

    fn equip(&self, npc: &EntityRef, extra: &[BlueprintId]) {
        let mut items: Vec<BlueprintId> = match npc.get(EQUIPMENT_ATTRIBUTE) {
            None => Vec::new(),
            Some(value) => serde_json::from_value(value).unwrap_or_else(|error| {
                warn!(entity = %npc.id(), %error, "malformed equipment list");
                Vec::new()
            }),
        };
        items.extend(extra.iter().cloned());

        for blueprint_id in items {
            let item = match self.factory.clone_instance(&blueprint_id) {
                Ok(item) => item,
                Err(error) => {
                    warn!(entity = %npc.id(), item = %blueprint_id, %error, "failed to create equipment");
                    continue;
                }
            };
            match item.move_to(npc) {
                Ok(()) => item.set_temp(EQUIPPED_FLAG, Value::Bool(true)),
                Err(error) => {
                    warn!(entity = %npc.id(), item = %item.id(), %error, "failed to equip");
                    if let Err(error) = item.destroy() {
                        warn!(item = %item.id(), %error, "failed to discard equipment");
                    }
                }
            }
        }
    }

    fn retire_ticket(&self, key: &RespawnKey, ticket: u64) {
        if let Some(mut slot) = self.pending.get_mut(key) {
            slot.retain(|(id, _)| *id != ticket);
        }
        self.pending.remove_if(key, |_, tickets| tickets.is_empty());
    }
}

impl Drop for SpawnManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::behavior::{AreaBehavior, Behavior, ItemBehavior, NpcBehavior, RoomBehavior};
    use crate::blueprint::{BlueprintDef, BlueprintMeta};
    use crate::registry::BlueprintRegistry;
    use serde_json::json;

    fn register(registry: &BlueprintRegistry, id: &str, def: BlueprintDef, behavior: Arc<dyn Behavior>) {
        registry
            .register(Arc::new(BlueprintMeta::new(id, format!("{id}.json"), def, behavior)))
            .unwrap();
    }

    fn world(npc_spawns: Value, item_spawns: Value) -> Arc<SpawnManager> {
        let registry = Arc::new(BlueprintRegistry::new());
        register(&registry, "room/yard", BlueprintDef::new("room").singleton(), Arc::new(RoomBehavior));
        register(
            &registry,
            "area/town",
            BlueprintDef::new("area")
                .singleton()
                .with_attribute(NPC_SPAWNS_ATTRIBUTE, npc_spawns)
                .with_attribute(ITEM_SPAWNS_ATTRIBUTE, item_spawns),
            Arc::new(AreaBehavior),
        );
        register(
            &registry,
            "npc/guard",
            BlueprintDef::new("npc").with_attribute(EQUIPMENT_ATTRIBUTE, json!(["item/sword"])),
            Arc::new(NpcBehavior),
        );
        register(&registry, "item/sword", BlueprintDef::new("item"), Arc::new(ItemBehavior));
        register(&registry, "item/shield", BlueprintDef::new("item"), Arc::new(ItemBehavior));
        register(&registry, "item/rock", BlueprintDef::new("item"), Arc::new(ItemBehavior));

        let factory = Arc::new(Factory::new(registry, Arc::new(ObjectTable::new())));
        factory.create_virtual("room/yard").unwrap();
        factory.create_virtual("area/town").unwrap();
        Arc::new(SpawnManager::new(factory, SpawnSettings::default()))
    }

    fn npcs(manager: &SpawnManager) -> Vec<EntityRef> {
        manager.table().find_all(|e| e.is_class(EntityClass::Npc))
    }

    #[test]
    fn rule_defaults() {
        let rule: SpawnRule =
            serde_json::from_value(json!({ "blueprintId": "npc/x", "roomId": "room/y" })).unwrap();
        assert_eq!(rule.count, 1);
        assert_eq!(rule.interval_ms, 0);
        assert!(rule.equipment.is_empty());
    }

    #[test]
    fn spawn_all_places_equipped_npcs_and_items() {
        let manager = world(
            json!([{ "blueprintId": "npc/guard", "roomId": "room/yard", "count": 2, "equipment": ["item/shield"] }]),
            json!([{ "blueprintId": "item/rock", "roomId": "room/yard", "count": 3 }]),
        );

        let report = manager.spawn_all();

        assert_eq!(report, SpawnReport { spawned: 5, failed: 0, skipped_rules: 0 });
        let guards = npcs(&manager);
        let ids: Vec<_> = guards.iter().map(|g| g.id().to_string()).collect();
        assert_eq!(ids, vec!["npc/guard#1", "npc/guard#2"]);
        for guard in &guards {
            assert_eq!(guard.container().unwrap().id(), "room/yard");
            let gear: Vec<_> = guard.children().iter().map(|c| c.blueprint_id().to_string()).collect();
            assert_eq!(gear, vec!["item/sword", "item/shield"]);
            assert!(guard.children().iter().all(|c| c.get_temp(EQUIPPED_FLAG) == Some(json!(true))));
        }
        let yard = manager.table().find_by_id("room/yard").unwrap();
        assert_eq!(yard.children().len(), 5);
    }

    #[test]
    fn missing_room_skips_only_that_rule() {
        let manager = world(
            json!([
                { "blueprintId": "npc/guard", "roomId": "room/nowhere", "count": 2 },
                { "blueprintId": "npc/guard", "roomId": "room/yard" }
            ]),
            json!([{ "blueprintId": "item/unknown", "roomId": "room/yard" }]),
        );

        let report = manager.spawn_all();

        assert_eq!(report, SpawnReport { spawned: 1, failed: 1, skipped_rules: 1 });
        assert_eq!(npcs(&manager).len(), 1);
    }

    #[test]
    fn malformed_rules_are_ignored() {
        let manager = world(json!({ "not": "a list" }), json!([{ "roomId": "room/yard" }]));
        let report = manager.spawn_all();
        assert_eq!(report.spawned, 0);
        assert_eq!(report.skipped_rules, 1);
        assert!(manager.table().find_by_id("room/yard").unwrap().children().is_empty());
    }

    #[test]
    fn malformed_rule_does_not_drop_its_siblings() {
        let manager = world(
            json!([
                { "blueprintId": "npc/guard", "roomId": "room/yard", "count": 2 },
                { "blueprintId": "npc/guard", "roomId": "room/yard", "count": -1 },
                { "blueprintId": "npc/guard" }
            ]),
            json!([]),
        );

        let report = manager.spawn_all();
        assert_eq!(report.spawned, 2);
        assert_eq!(report.skipped_rules, 2);
        let ids: Vec<String> = npcs(&manager).iter().map(|npc| npc.id().to_string()).collect();
        assert_eq!(ids, ["npc/guard#1", "npc/guard#2"]);
    }

    #[test]
    fn respawn_npc_requires_room() {
        let manager = world(json!([]), json!([]));
        assert!(matches!(
            manager.respawn_npc("npc/guard", "room/nowhere"),
            Err(SpawnError::RoomNotFound { .. })
        ));
        let guard = manager.respawn_npc("npc/guard", "room/yard").unwrap();
        assert_eq!(guard.container().unwrap().id(), "room/yard");
        assert!(matches!(
            manager.schedule_respawn("npc/guard", "room/yard", Duration::from_millis(1)),
            Err(SpawnError::NoRuntime)
        ));
    }

    #[tokio::test]
    async fn spawned_npcs_get_heartbeats() {
        let manager = world(json!([{ "blueprintId": "npc/guard", "roomId": "room/yard" }]), json!([]));
        manager.spawn_all();
        assert!(npcs(&manager)[0].has_heartbeat());
    }

    #[tokio::test]
    async fn scheduled_respawn_fires_after_delay() {
        let manager = world(json!([]), json!([]));
        manager
            .schedule_respawn("npc/guard", "room/yard", Duration::from_millis(20))
            .unwrap();
        assert_eq!(manager.pending_respawns(), 1);
        assert!(npcs(&manager).is_empty());

        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(npcs(&manager).len(), 1);
        assert_eq!(manager.pending_respawns(), 0);
    }

    #[tokio::test]
    async fn respawns_can_be_cancelled() {
        let manager = world(json!([]), json!([]));
        let delay = Duration::from_millis(30);
        let first = manager.schedule_respawn("npc/guard", "room/yard", delay).unwrap();
        manager.schedule_respawn("npc/guard", "room/yard", delay).unwrap();
        manager.schedule_respawn("npc/guard", "room/yard", delay).unwrap();

        assert!(manager.cancel_respawn(&first));
        assert!(!manager.cancel_respawn(&first));
        assert_eq!(manager.cancel_respawns("npc/guard", "room/yard"), 2);
        assert_eq!(manager.pending_respawns(), 0);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(npcs(&manager).is_empty());
    }

    #[tokio::test]
    async fn refill_tops_rooms_up_to_count() {
        let manager = world(
            json!([{ "blueprintId": "npc/guard", "roomId": "room/yard", "count": 2, "intervalMs": 20 }]),
            json!([]),
        );
        manager.spawn_all();
        let victim = npcs(&manager).remove(0);
        victim.destroy().unwrap();
        assert_eq!(npcs(&manager).len(), 1);

        assert_eq!(manager.start(), 1);
        tokio::time::sleep(Duration::from_millis(100)).await;

        let ids: Vec<_> = npcs(&manager).iter().map(|g| g.id().to_string()).collect();
        assert_eq!(ids, vec!["npc/guard#2", "npc/guard#3"]);
        manager.shutdown();
    }
}
