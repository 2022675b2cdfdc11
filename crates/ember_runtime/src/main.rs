//! Ember Runtime
//!
//! Boots a world directory: loads blueprints, starts garbage collection and
//! spawning, then runs until interrupted.
//!
//! Usage: `ember [settings.json]`

use anyhow::{Context, Result};
use ember_asset::Loader;
use ember_core::{BehaviorCatalog, BlueprintRegistry, Factory, ObjectTable, SpawnManager};
use ember_services::{QuestLog, RuntimeSettings};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("ember=info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Ember v{}", ember_core::VERSION);

    let settings = load_settings()?;
    let catalog = Arc::new(BehaviorCatalog::with_builtins());
    let registry = Arc::new(BlueprintRegistry::new());
    let table = Arc::new(ObjectTable::new());
    let quests = Arc::new(QuestLog::new());
    let factory = Arc::new(Factory::new(registry, table.clone()).with_quest_registrar(quests.clone()));

    let loader = Loader::new(catalog.clone(), factory.clone(), settings.loader.clone());
    let report = loader
        .scan_and_load(&settings.world_root)
        .with_context(|| format!("failed to load world {}", settings.world_root.display()))?;
    if !report.rejected.is_empty() {
        tracing::warn!(rejected = report.rejected.len(), "some blueprint units were skipped");
    }

    table.start_gc(&settings.gc);

    let spawner = Arc::new(SpawnManager::new(factory, settings.spawn.clone()));
    spawner.spawn_all();
    let refills = spawner.start();

    tracing::info!(
        kinds = ?catalog.kinds(),
        entities = table.live_count(),
        refill_timers = refills,
        "world running, press Ctrl-C to stop"
    );

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;

    tracing::info!(quests = quests.len(), "shutting down");
    spawner.shutdown();
    table.shutdown();
    Ok(())
}

fn load_settings() -> Result<RuntimeSettings> {
    let mut settings = match std::env::args_os().nth(1).map(PathBuf::from) {
        Some(path) => RuntimeSettings::load(&path)?,
        None => RuntimeSettings::default(),
    };
    settings.apply_env();
    Ok(settings)
}
