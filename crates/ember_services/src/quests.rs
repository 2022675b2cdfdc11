//! In-memory quest log
//!
//! Collects quest definitions the factory finds on cloned entities. Quest
//! rules themselves live elsewhere; this is the hand-off point.

use ember_core::{Entity, QuestRegistrar};
use parking_lot::Mutex;
use serde_json::Value;
use tracing::info;

#[derive(Debug, Clone, PartialEq)]
pub struct QuestRecord {
    pub owner: String,
    /// The definition's `id` field, when it has one.
    pub quest_id: Option<String>,
    pub definition: Value,
}

#[derive(Debug, Default)]
pub struct QuestLog {
    records: Mutex<Vec<QuestRecord>>,
}

impl QuestLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    /// Quests registered by one entity, in registration order.
    pub fn quests_for(&self, owner: &str) -> Vec<QuestRecord> {
        self.records
            .lock()
            .iter()
            .filter(|record| record.owner == owner)
            .cloned()
            .collect()
    }

    pub fn records(&self) -> Vec<QuestRecord> {
        self.records.lock().clone()
    }
}

impl QuestRegistrar for QuestLog {
    fn register_quest(&self, owner: &Entity, definition: &Value) {
        let quest_id = definition
            .get("id")
            .and_then(Value::as_str)
            .map(str::to_string);
        info!(owner = %owner.id(), quest = quest_id.as_deref().unwrap_or("<unnamed>"), "quest registered");
        self.records.lock().push(QuestRecord {
            owner: owner.id().to_string(),
            quest_id,
            definition: definition.clone(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ember_core::{BlueprintDef, BlueprintMeta, BlueprintRegistry, Factory, NpcBehavior, ObjectTable};
    use serde_json::json;
    use std::sync::Arc;

    #[test]
    fn clones_hand_their_quests_to_the_log() {
        let registry = Arc::new(BlueprintRegistry::new());
        registry
            .register(Arc::new(BlueprintMeta::new(
                "npc/elder",
                "npc/elder.json",
                BlueprintDef::new("npc").with_attribute(
                    "quests",
                    json!([{ "id": "herbs", "reward": 5 }, { "title": "untitled" }]),
                ),
                Arc::new(NpcBehavior),
            )))
            .unwrap();
        let log = Arc::new(QuestLog::new());
        let factory = Factory::new(registry, Arc::new(ObjectTable::new())).with_quest_registrar(log.clone());

        factory.clone_instance("npc/elder").unwrap();
        factory.clone_instance("npc/elder").unwrap();

        assert_eq!(log.len(), 4);
        let first = log.quests_for("npc/elder#1");
        assert_eq!(first.len(), 2);
        assert_eq!(first[0].quest_id.as_deref(), Some("herbs"));
        assert_eq!(first[0].definition["reward"], json!(5));
        assert_eq!(first[1].quest_id, None);
        assert!(log.quests_for("npc/elder").is_empty());

        let owners: Vec<String> = log.records().into_iter().map(|record| record.owner).collect();
        assert_eq!(owners, ["npc/elder#1", "npc/elder#1", "npc/elder#2", "npc/elder#2"]);
        assert!(!log.is_empty());
    }
}
