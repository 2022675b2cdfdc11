//! On-disk blueprint units
//!
//! One file per blueprint. The blueprint id is the file's path relative to
//! the world root with the extension dropped and `/` as separator, so
//! `world/npc/guard.js` becomes `npc/guard`.

use ember_core::BlueprintId;
use std::path::{Component, Path};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitFormat {
    /// A serialized [`BlueprintDef`](ember_core::BlueprintDef).
    Json,
    /// JavaScript whose completion value is the definition.
    Script,
}

impl UnitFormat {
    pub fn of(path: &Path) -> Option<Self> {
        match path.extension()?.to_str()? {
            "json" => Some(UnitFormat::Json),
            "js" => Some(UnitFormat::Script),
            _ => None,
        }
    }
}

/// Blueprint id for `path` under `root`, or `None` if it lies outside.
pub fn blueprint_id(root: &Path, path: &Path) -> Option<BlueprintId> {
    let relative = path.strip_prefix(root).ok()?;
    let parts: Vec<String> = relative
        .with_extension("")
        .components()
        .filter_map(|component| match component {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

/// Whether the file name ends with one of `suffixes` (tests, type declarations, ...).
pub fn is_excluded(path: &Path, suffixes: &[String]) -> bool {
    let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
        return false;
    };
    suffixes.iter().any(|suffix| name.ends_with(suffix.as_str()))
}

pub(crate) fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.starts_with('.'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn ids_are_relative_without_extension() {
        let root = PathBuf::from("/srv/world");
        assert_eq!(
            blueprint_id(&root, &root.join("npc").join("guard.js")).as_deref(),
            Some("npc/guard")
        );
        assert_eq!(
            blueprint_id(&root, &root.join("room").join("town").join("gate.json")).as_deref(),
            Some("room/town/gate")
        );
        assert_eq!(blueprint_id(&root, Path::new("/elsewhere/npc.json")), None);
    }

    #[test]
    fn format_follows_extension() {
        assert_eq!(UnitFormat::of(Path::new("a/b.json")), Some(UnitFormat::Json));
        assert_eq!(UnitFormat::of(Path::new("a/b.js")), Some(UnitFormat::Script));
        assert_eq!(UnitFormat::of(Path::new("a/b.md")), None);
        assert_eq!(UnitFormat::of(Path::new("a/b")), None);
    }

    #[test]
    fn exclusion_matches_suffixes() {
        let suffixes = vec![".test.js".to_string(), ".d.ts".to_string()];
        assert!(is_excluded(Path::new("npc/guard.test.js"), &suffixes));
        assert!(is_excluded(Path::new("types.d.ts"), &suffixes));
        assert!(!is_excluded(Path::new("npc/guard.js"), &suffixes));
        assert!(is_hidden(Path::new("npc/.guard.js.swp")));
    }
}
