//! Object table garbage collection
//!
//! Three independent sweeps, each on its own timer:
//!
//! - **orphans**: destroy uncontained, childless entities whose clean-up hook
//!   agrees. Any doubt (hook error, `noCleanUp`, a container, children) keeps
//!   the entity alive.
//! - **reset**: run every live entity's reset hook.
//! - **purge**: drop tombstoned entities from the table. This is the only
//!   step that frees table slots.
//!
//! The sweeps are plain methods so callers and tests can run them directly;
//! [`ObjectTable::start_gc`] only schedules them.

use crate::object_table::ObjectTable;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Sweep periods in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GcSettings {
    pub orphan_interval_ms: u64,
    pub reset_interval_ms: u64,
    pub purge_interval_ms: u64,
}

impl GcSettings {
    pub fn orphan_interval(&self) -> Duration {
        Duration::from_millis(self.orphan_interval_ms)
    }

    pub fn reset_interval(&self) -> Duration {
        Duration::from_millis(self.reset_interval_ms)
    }

    pub fn purge_interval(&self) -> Duration {
        Duration::from_millis(self.purge_interval_ms)
    }
}

impl Default for GcSettings {
    fn default() -> Self {
        Self {
            orphan_interval_ms: 5 * 60 * 1000,
            reset_interval_ms: 2 * 60 * 60 * 1000,
            purge_interval_ms: 5 * 60 * 1000,
        }
    }
}

impl ObjectTable {
    /// Destroy orphaned entities. Returns how many were destroyed.
    pub fn reclaim_orphans(&self) -> usize {
        let mut reclaimed = 0;
        for entity in self.snapshot() {
            if entity.is_destroyed()
                || entity.is_no_clean_up()
                || entity.container().is_some()
                || entity.has_children()
            {
                continue;
            }

            match entity.clean_up_hook() {
                Ok(true) => {}
                Ok(false) => continue,
                Err(error) => {
                    warn!(entity = %entity.id(), %error, "clean-up hook failed, keeping entity");
                    continue;
                }
            }

            match entity.destroy() {
                Ok(()) => {
                    debug!(entity = %entity.id(), "reclaimed orphan");
                    reclaimed += 1;
                }
                Err(error) => warn!(entity = %entity.id(), %error, "failed to destroy orphan"),
            }
        }
        reclaimed
    }

    /// Run every live entity's reset hook. Returns how many succeeded.
    pub fn reset_all(&self) -> usize {
        let mut reset = 0;
        for entity in self.snapshot() {
            if entity.is_destroyed() {
                continue;
            }
            match entity.reset_hook() {
                Ok(()) => reset += 1,
                Err(error) => warn!(entity = %entity.id(), %error, "reset hook failed"),
            }
        }
        reset
    }

    /// Remove destroyed entities from the table. Returns how many slots were freed.
    pub fn purge_destroyed(&self) -> usize {
        self.remove_destroyed()
    }

    /// Schedule the three sweeps on the current tokio runtime.
    ///
    /// Each sweep first runs one full period after this call. Returns `false`
    /// without scheduling anything when the sweeps are already running or no
    /// tokio runtime is available.
    pub fn start_gc(self: &Arc<Self>, settings: &GcSettings) -> bool {
        let Ok(runtime) = Handle::try_current() else {
            warn!("no async runtime, object table GC not started");
            return false;
        };
        let mut tasks = self.gc_tasks.lock();
        if !tasks.is_empty() {
            warn!("object table GC already running");
            return false;
        }

        tasks.push(spawn_sweep(&runtime, self, "orphans", settings.orphan_interval(), |table| {
            table.reclaim_orphans()
        }));
        tasks.push(spawn_sweep(&runtime, self, "reset", settings.reset_interval(), |table| {
            table.reset_all()
        }));
        tasks.push(spawn_sweep(&runtime, self, "purge", settings.purge_interval(), |table| {
            table.purge_destroyed()
        }));

        info!(
            orphan_ms = settings.orphan_interval_ms,
            reset_ms = settings.reset_interval_ms,
            purge_ms = settings.purge_interval_ms,
            "object table GC started"
        );
        true
    }

    pub fn is_gc_running(&self) -> bool {
        !self.gc_tasks.lock().is_empty()
    }

    /// Stop the sweeps and empty the table. Clone counters are kept so ids
    /// stay unique for the lifetime of this table.
    pub fn shutdown(&self) {
        for task in self.gc_tasks.lock().drain(..) {
            task.abort();
        }
        for entity in self.snapshot() {
            entity.stop_heartbeat();
        }
        self.clear();
        info!("object table shut down");
    }
}

fn spawn_sweep<F>(
    runtime: &Handle,
    table: &Arc<ObjectTable>,
    name: &'static str,
    period: Duration,
    sweep: F,
) -> tokio::task::JoinHandle<()>
where
    F: Fn(&ObjectTable) -> usize + Send + 'static,
{
    let table: Weak<ObjectTable> = Arc::downgrade(table);
    // A zero period would make `interval` panic.
    let period = period.max(Duration::from_millis(1));
    runtime.spawn(async move {
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        loop {
            ticker.tick().await;
            let Some(table) = table.upgrade() else { break };
            let touched = sweep(&table);
            debug!(sweep = name, touched, "GC sweep finished");
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::behavior::{Behavior, BehaviorError, EntityClass, ItemBehavior, RoomBehavior};
    use crate::blueprint::{BlueprintDef, BlueprintMeta};
    use crate::entity::{Entity, EntityRef};
    use serde_json::json;

    /// Clean-up and reset outcome controlled by the `mode` attribute.
    struct Scripted;

    impl Behavior for Scripted {
        fn class(&self) -> EntityClass {
            EntityClass::Other
        }

        fn on_clean_up(&self, entity: &Entity) -> Result<bool, BehaviorError> {
            match entity.get("mode").and_then(|v| v.as_str().map(str::to_string)).as_deref() {
                Some("keep") => Ok(false),
                Some("fail") => Err(BehaviorError::new("clean-up exploded")),
                _ => Ok(true),
            }
        }

        fn on_reset(&self, entity: &Entity) -> Result<(), BehaviorError> {
            if entity.get("mode") == Some(json!("fail")) {
                return Err(BehaviorError::new("reset exploded"));
            }
            entity.set("resets", json!(entity.get("resets").and_then(|v| v.as_i64()).unwrap_or(0) + 1));
            Ok(())
        }

        fn on_destroy(&self, entity: &Entity) -> Result<(), BehaviorError> {
            if entity.get("mode") == Some(json!("undying")) {
                return Err(BehaviorError::new("cannot die"));
            }
            Ok(())
        }
    }

    fn spawn(table: &ObjectTable, id: &str, behavior: Arc<dyn Behavior>, mode: &str) -> EntityRef {
        let def = BlueprintDef::new("test").with_attribute("mode", json!(mode));
        let meta = Arc::new(BlueprintMeta::new(id, "test.json", def, behavior));
        let entity = Entity::new(id, meta);
        entity.initialize().unwrap();
        table.register(entity.clone()).unwrap();
        entity
    }

    #[test]
    fn orphan_sweep_follows_the_guards() {
        let table = ObjectTable::new();
        let lonely = spawn(&table, "lonely", Arc::new(Scripted), "");
        let keeper = spawn(&table, "keeper", Arc::new(Scripted), "keep");
        let failing = spawn(&table, "failing", Arc::new(Scripted), "fail");
        let undying = spawn(&table, "undying", Arc::new(Scripted), "");
        undying.set("mode", json!("undying"));
        let pinned = spawn(&table, "pinned", Arc::new(Scripted), "");
        pinned.set_no_clean_up(true);

        let reclaimed = table.reclaim_orphans();

        assert_eq!(reclaimed, 1);
        assert!(lonely.is_destroyed());
        assert!(!keeper.is_destroyed());
        assert!(!failing.is_destroyed());
        assert!(!undying.is_destroyed());
        assert!(!pinned.is_destroyed());
    }

    #[test]
    fn orphan_sweep_never_touches_containers_or_contained() {
        let table = ObjectTable::new();
        // Hooks say "reclaim me" for both.
        let bag = spawn(&table, "bag", Arc::new(ItemBehavior), "");
        let coin = spawn(&table, "coin", Arc::new(Scripted), "");
        coin.move_to(&bag).unwrap();

        assert_eq!(table.reclaim_orphans(), 0);
        assert!(!bag.is_destroyed());
        assert!(!coin.is_destroyed());
    }

    #[test]
    fn rooms_survive_orphan_sweep() {
        let table = ObjectTable::new();
        let hall = spawn(&table, "room/hall", Arc::new(RoomBehavior), "");
        assert_eq!(table.reclaim_orphans(), 0);
        assert!(!hall.is_destroyed());
    }

    #[test]
    fn reset_sweep_continues_past_failures() {
        let table = ObjectTable::new();
        let a = spawn(&table, "a", Arc::new(Scripted), "");
        spawn(&table, "b", Arc::new(Scripted), "fail");
        let c = spawn(&table, "c", Arc::new(Scripted), "");
        c.destroy().unwrap();

        assert_eq!(table.reset_all(), 1);
        assert_eq!(a.get("resets"), Some(json!(1)));
        assert_eq!(c.get("resets"), None);
    }

    #[test]
    fn purge_frees_only_tombstones() {
        let table = ObjectTable::new();
        let a = spawn(&table, "a", Arc::new(ItemBehavior), "");
        spawn(&table, "b", Arc::new(ItemBehavior), "");
        a.destroy().unwrap();

        assert_eq!(table.purge_destroyed(), 1);
        assert!(!table.contains("a"));
        assert!(table.contains("b"));
        assert_eq!(table.purge_destroyed(), 0);
    }

    #[tokio::test]
    async fn scheduled_sweeps_run_and_shutdown_clears() {
        let table = Arc::new(ObjectTable::new());
        let lonely = spawn(&table, "lonely", Arc::new(Scripted), "");
        let settings = GcSettings {
            orphan_interval_ms: 10,
            reset_interval_ms: 10,
            purge_interval_ms: 25,
        };

        assert!(table.start_gc(&settings));
        assert!(!table.start_gc(&settings));
        assert!(table.is_gc_running());

        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(lonely.is_destroyed());
        assert!(!table.contains("lonely"));

        spawn(&table, "late", Arc::new(RoomBehavior), "");
        assert_eq!(table.next_instance_id("npc/rat"), "npc/rat#1");
        table.shutdown();
        assert!(!table.is_gc_running());
        assert!(table.is_empty());
        assert_eq!(table.next_instance_id("npc/rat"), "npc/rat#2");
    }

    #[test]
    fn gc_requires_runtime() {
        let table = Arc::new(ObjectTable::new());
        assert!(!table.start_gc(&GcSettings::default()));
        assert!(!table.is_gc_running());
    }

    #[test]
    fn default_periods() {
        let settings = GcSettings::default();
        assert_eq!(settings.orphan_interval(), Duration::from_secs(300));
        assert_eq!(settings.reset_interval(), Duration::from_secs(7200));
        assert_eq!(settings.purge_interval(), Duration::from_secs(300));
    }
}
