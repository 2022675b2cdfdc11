//! Blueprint definitions and registry metadata
//!
//! A blueprint is the parsed form of one world unit on disk. The registry
//! stores it as an immutable [`BlueprintMeta`]; hot updates replace the
//! whole `Arc` rather than mutating it.

use crate::behavior::Behavior;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Blueprint identifier: the unit's path relative to the world root,
/// without extension, using `/` separators (e.g. `npc/guard`).
pub type BlueprintId = String;

/// Attribute map stored on entities and blueprints.
pub type Attributes = Map<String, Value>;

/// Declarative content of a blueprint unit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct BlueprintDef {
    /// Behavior kind, resolved through the [`BehaviorCatalog`](crate::BehaviorCatalog).
    pub kind: String,
    /// At most one instance, addressed by the blueprint id itself.
    #[serde(default)]
    pub singleton: bool,
    /// Exempt instances from orphan reclamation.
    #[serde(default)]
    pub no_clean_up: bool,
    /// Initial persistent attributes.
    #[serde(default)]
    pub attributes: Attributes,
    /// Initial ephemeral attributes.
    #[serde(default)]
    pub temp: Attributes,
}

impl BlueprintDef {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            ..Self::default()
        }
    }

    pub fn singleton(mut self) -> Self {
        self.singleton = true;
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    pub fn with_temp(mut self, key: impl Into<String>, value: Value) -> Self {
        self.temp.insert(key.into(), value);
        self
    }
}

/// Registry entry for a loaded blueprint.
pub struct BlueprintMeta {
    id: BlueprintId,
    source: PathBuf,
    def: BlueprintDef,
    behavior: Arc<dyn Behavior>,
}

impl BlueprintMeta {
    pub fn new(
        id: impl Into<BlueprintId>,
        source: impl Into<PathBuf>,
        def: BlueprintDef,
        behavior: Arc<dyn Behavior>,
    ) -> Self {
        Self {
            id: id.into(),
            source: source.into(),
            def,
            behavior,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// File the blueprint was loaded from.
    pub fn source(&self) -> &Path {
        &self.source
    }

    pub fn def(&self) -> &BlueprintDef {
        &self.def
    }

    pub fn behavior(&self) -> &Arc<dyn Behavior> {
        &self.behavior
    }

    pub fn is_singleton(&self) -> bool {
        self.def.singleton
    }
}

impl fmt::Debug for BlueprintMeta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlueprintMeta")
            .field("id", &self.id)
            .field("source", &self.source)
            .field("kind", &self.def.kind)
            .field("singleton", &self.def.singleton)
            .field("class", &self.behavior.class())
            .finish()
    }
}
