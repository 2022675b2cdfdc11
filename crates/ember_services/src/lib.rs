//! Ember Services Layer
//!
//! Runtime configuration and the in-process collaborators the runtime wires
//! into the core.

pub mod quests;
pub mod settings;

pub use quests::{QuestLog, QuestRecord};
pub use settings::{RuntimeSettings, SettingsError, WORLD_ROOT_ENV};
