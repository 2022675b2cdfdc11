//! Settings management

use ember_asset::LoaderSettings;
use ember_core::{GcSettings, SpawnSettings};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

/// Overrides `world_root` when set.
pub const WORLD_ROOT_ENV: &str = "EMBER_WORLD_ROOT";

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to read settings {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid settings {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Runtime settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RuntimeSettings {
    /// Directory scanned for blueprint units.
    pub world_root: PathBuf,
    pub gc: GcSettings,
    pub spawn: SpawnSettings,
    pub loader: LoaderSettings,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            world_root: PathBuf::from("world"),
            gc: GcSettings::default(),
            spawn: SpawnSettings::default(),
            loader: LoaderSettings::default(),
        }
    }
}

impl RuntimeSettings {
    /// Read settings from a JSON file. Missing fields take their defaults.
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        let contents = std::fs::read_to_string(path).map_err(|source| SettingsError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let settings = serde_json::from_str(&contents).map_err(|source| SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        info!(path = %path.display(), "settings loaded");
        Ok(settings)
    }

    /// Apply overrides from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(root) = lookup(WORLD_ROOT_ENV).filter(|root| !root.is_empty()) {
            info!(world_root = %root, "world root overridden from environment");
            self.world_root = PathBuf::from(root);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn partial_file_keeps_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{ "worldRoot": "/srv/world", "gc": {{ "purgeIntervalMs": 1000 }}, "spawn": {{ "refill": false }} }}"#
        )
        .unwrap();

        let settings = RuntimeSettings::load(file.path()).unwrap();
        assert_eq!(settings.world_root, PathBuf::from("/srv/world"));
        assert_eq!(settings.gc.purge_interval_ms, 1000);
        assert_eq!(settings.gc.orphan_interval_ms, 300_000);
        assert_eq!(settings.gc.reset_interval_ms, 7_200_000);
        assert!(!settings.spawn.refill);
        assert_eq!(settings.spawn.heartbeat_ms, 2000);
        assert_eq!(settings.loader, LoaderSettings::default());
    }

    #[test]
    fn malformed_and_missing_files_are_errors() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{{ \"worldRoot\": 42 }}").unwrap();
        assert!(matches!(
            RuntimeSettings::load(file.path()),
            Err(SettingsError::Parse { .. })
        ));
        assert!(matches!(
            RuntimeSettings::load(Path::new("/no/such/settings.json")),
            Err(SettingsError::Io { .. })
        ));
    }

    #[test]
    fn environment_overrides_world_root() {
        let mut settings = RuntimeSettings::default();
        settings.apply_overrides(|key| (key == WORLD_ROOT_ENV).then(|| "/tmp/other".to_string()));
        assert_eq!(settings.world_root, PathBuf::from("/tmp/other"));

        settings.apply_overrides(|_| Some(String::new()));
        assert_eq!(settings.world_root, PathBuf::from("/tmp/other"));
    }
}
