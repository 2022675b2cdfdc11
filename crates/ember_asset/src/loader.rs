//! World loader
//!
//! Scans a world directory, turns every unit into registry metadata, and
//! instantiates singletons as it goes. One bad unit never aborts a scan: it
//! is logged and listed in the [`LoadReport`]. Registry collisions and
//! failing singleton initializers are configuration errors and stop the
//! scan.
//!
//! Hot update re-reads a single unit. Singletons are re-initialized in
//! place; clones already in the world keep the definition they were created
//! from.

use crate::unit::{self, UnitFormat};
use dashmap::DashMap;
use ember_core::{
    BehaviorCatalog, BlueprintDef, BlueprintId, BlueprintMeta, BlueprintRegistry, EntityError,
    Factory, FactoryError, RegistryError,
};
use ember_script::{ScriptError, ScriptLimits, ScriptRuntime};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum LoaderError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{path}: unsupported unit format")]
    UnsupportedFormat { path: PathBuf },

    #[error("{path}: excluded by suffix filter")]
    Excluded { path: PathBuf },

    #[error("{path} is not inside the world root {root}")]
    OutsideRoot { path: PathBuf, root: PathBuf },

    #[error("{path}: invalid blueprint definition: {reason}")]
    InvalidUnit { path: PathBuf, reason: String },

    #[error("{path}: unknown behavior kind '{kind}'")]
    UnknownKind { path: PathBuf, kind: String },

    #[error(transparent)]
    Script(#[from] ScriptError),

    #[error("unknown blueprint '{id}'")]
    UnknownBlueprint { id: BlueprintId },

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Factory(#[from] FactoryError),

    #[error(transparent)]
    Entity(#[from] EntityError),
}

impl LoaderError {
    /// Problems confined to a single unit. A bulk scan skips these.
    pub fn is_unit_error(&self) -> bool {
        matches!(
            self,
            LoaderError::Io { .. }
                | LoaderError::UnsupportedFormat { .. }
                | LoaderError::Excluded { .. }
                | LoaderError::OutsideRoot { .. }
                | LoaderError::InvalidUnit { .. }
                | LoaderError::UnknownKind { .. }
                | LoaderError::Script(_)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoaderSettings {
    /// File name suffixes the scanner ignores.
    pub excluded_suffixes: Vec<String>,
    /// Time budget for evaluating one script unit.
    pub script_timeout_ms: u64,
    /// Heap ceiling for one script unit's runtime.
    pub script_memory_limit: usize,
}

impl LoaderSettings {
    pub fn script_limits(&self) -> ScriptLimits {
        ScriptLimits {
            timeout: Duration::from_millis(self.script_timeout_ms),
            memory_limit: self.script_memory_limit,
        }
    }
}

impl Default for LoaderSettings {
    fn default() -> Self {
        Self {
            excluded_suffixes: [".test.js", ".spec.js", ".test.json", ".spec.json", ".d.ts"]
                .into_iter()
                .map(String::from)
                .collect(),
            script_timeout_ms: 1000,
            script_memory_limit: 64 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedUnit {
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
    pub loaded: usize,
    pub singletons: usize,
    pub excluded: usize,
    pub rejected: Vec<RejectedUnit>,
}

pub struct Loader {
    catalog: Arc<BehaviorCatalog>,
    factory: Arc<Factory>,
    settings: LoaderSettings,
    units: DashMap<PathBuf, BlueprintDef>,
}

impl Loader {
    pub fn new(catalog: Arc<BehaviorCatalog>, factory: Arc<Factory>, settings: LoaderSettings) -> Self {
        Self {
            catalog,
            factory,
            settings,
            units: DashMap::new(),
        }
    }

    fn registry(&self) -> &Arc<BlueprintRegistry> {
        self.factory.registry()
    }

    /// Load every unit under `root`.
    ///
    /// A missing root is not an error: the world simply starts empty.
    pub fn scan_and_load(&self, root: &Path) -> Result<LoadReport, LoaderError> {
        let mut report = LoadReport::default();
        if !root.is_dir() {
            warn!(root = %root.display(), "world directory not found, starting with an empty world");
            return Ok(report);
        }

        let mut files = Vec::new();
        collect_files(root, &mut files);
        files.sort();

        for path in files {
            if unit::is_excluded(&path, &self.settings.excluded_suffixes) {
                debug!(path = %path.display(), "excluded from scan");
                report.excluded += 1;
                continue;
            }
            match self.load_file(root, &path) {
                Ok(meta) => {
                    report.loaded += 1;
                    if meta.is_singleton() {
                        report.singletons += 1;
                    }
                }
                Err(error) if error.is_unit_error() => {
                    warn!(path = %path.display(), %error, "skipping invalid blueprint unit");
                    report.rejected.push(RejectedUnit {
                        path,
                        reason: error.to_string(),
                    });
                }
                Err(error) => return Err(error),
            }
        }

        info!(
            root = %root.display(),
            loaded = report.loaded,
            singletons = report.singletons,
            rejected = report.rejected.len(),
            "world loaded"
        );
        Ok(report)
    }

    /// Load and register one unit; singletons are instantiated immediately.
    /// Every failure is returned to the caller.
    pub fn load_file(&self, root: &Path, path: &Path) -> Result<Arc<BlueprintMeta>, LoaderError> {
        if unit::is_excluded(path, &self.settings.excluded_suffixes) {
            return Err(LoaderError::Excluded {
                path: path.to_path_buf(),
            });
        }
        let id = unit::blueprint_id(root, path).ok_or_else(|| LoaderError::OutsideRoot {
            path: path.to_path_buf(),
            root: root.to_path_buf(),
        })?;
        let def = self.read_unit(path)?;
        let meta = self.bind(id, path, def)?;

        self.registry().register(meta.clone())?;
        if meta.is_singleton() {
            if let Err(error) = self.factory.create_virtual(meta.id()) {
                self.registry().unregister(meta.id());
                return Err(error.into());
            }
        }
        debug!(blueprint = %meta.id(), kind = %meta.def().kind, "blueprint registered");
        Ok(meta)
    }

    /// Re-read one blueprint from disk and swap it in.
    ///
    /// A failed reload leaves the registry and live entities untouched.
    pub fn update(&self, id: &str) -> Result<Arc<BlueprintMeta>, LoaderError> {
        let current = self
            .registry()
            .get(id)
            .ok_or_else(|| LoaderError::UnknownBlueprint { id: id.to_string() })?;
        let path = current.source().to_path_buf();

        self.units.remove(&path);
        let def = self.read_unit(&path)?;
        let meta = self.bind(id.to_string(), &path, def)?;

        self.registry().unregister(id);
        self.registry().register(meta.clone())?;

        if meta.is_singleton() {
            let table = self.factory.table();
            match table.find_by_id(id) {
                Some(instance) => {
                    instance.reload(meta.clone())?;
                    info!(blueprint = %id, "singleton reloaded in place");
                }
                None if !table.contains(id) => {
                    self.factory.create_virtual(id)?;
                    info!(blueprint = %id, "singleton created on reload");
                }
                None => warn!(blueprint = %id, "singleton is awaiting purge, not recreated"),
            }
        } else {
            info!(blueprint = %id, "blueprint reloaded, existing clones keep their definition");
        }
        Ok(meta)
    }

    /// Number of parsed units held in the cache.
    pub fn cached_units(&self) -> usize {
        self.units.len()
    }

    fn read_unit(&self, path: &Path) -> Result<BlueprintDef, LoaderError> {
        if let Some(def) = self.units.get(path) {
            return Ok(def.value().clone());
        }

        let invalid = |reason: String| LoaderError::InvalidUnit {
            path: path.to_path_buf(),
            reason,
        };
        let def: BlueprintDef = match UnitFormat::of(path) {
            Some(UnitFormat::Json) => {
                let source = std::fs::read_to_string(path).map_err(|source| LoaderError::Io {
                    path: path.to_path_buf(),
                    source,
                })?;
                serde_json::from_str(&source).map_err(|error| invalid(error.to_string()))?
            }
            Some(UnitFormat::Script) => {
                let value = ScriptRuntime::with_limits(self.settings.script_limits())?.evaluate_file(path)?;
                serde_json::from_value(value).map_err(|error| invalid(error.to_string()))?
            }
            None => {
                return Err(LoaderError::UnsupportedFormat {
                    path: path.to_path_buf(),
                })
            }
        };

        self.units.insert(path.to_path_buf(), def.clone());
        Ok(def)
    }

    /// Resolve the unit's kind to a compiled behavior.
    fn bind(&self, id: BlueprintId, path: &Path, def: BlueprintDef) -> Result<Arc<BlueprintMeta>, LoaderError> {
        let behavior = self
            .catalog
            .get(&def.kind)
            .ok_or_else(|| LoaderError::UnknownKind {
                path: path.to_path_buf(),
                kind: def.kind.clone(),
            })?;
        Ok(Arc::new(BlueprintMeta::new(id, path, def, behavior)))
    }
}

fn collect_files(dir: &Path, files: &mut Vec<PathBuf>) {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(error) => {
            warn!(dir = %dir.display(), %error, "cannot read world directory");
            return;
        }
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if unit::is_hidden(&path) {
            continue;
        }
        // `DirEntry::file_type` does not follow symlinks.
        let Ok(file_type) = entry.file_type() else {
            continue;
        };
        if file_type.is_dir() {
            collect_files(&path, files);
        } else if file_type.is_symlink() && path.is_dir() {
            warn!(path = %path.display(), "skipping symlinked directory");
        } else {
            files.push(path);
        }
    }
}
