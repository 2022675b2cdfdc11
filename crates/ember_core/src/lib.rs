//! Ember Core
//!
//! The blueprint-driven entity runtime:
//! - Behavior contract and kind catalog
//! - Blueprint registry
//! - Entities with attribute maps and containment
//! - Global object table with background GC
//! - Factory (singletons vs. clones)
//! - Spawn manager

pub mod behavior;
pub mod blueprint;
pub mod entity;
pub mod factory;
pub mod gc;
pub mod object_table;
pub mod registry;
pub mod spawn;

pub use behavior::{
    AreaBehavior, Behavior, BehaviorCatalog, BehaviorError, CatalogError, EntityClass, ItemBehavior,
    NpcBehavior, RoomBehavior,
};
pub use blueprint::{Attributes, BlueprintDef, BlueprintId, BlueprintMeta};
pub use entity::{Entity, EntityError, EntityRef};
pub use factory::{Factory, FactoryError, QuestRegistrar};
pub use gc::GcSettings;
pub use object_table::{ObjectTable, ObjectTableError};
pub use registry::{BlueprintRegistry, RegistryError};
pub use spawn::{
    RespawnTicket, SpawnError, SpawnKind, SpawnManager, SpawnReport, SpawnRule, SpawnSettings,
};

/// Runtime version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
