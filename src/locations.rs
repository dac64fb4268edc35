//! Read-only provider for hierarchical location metadata.
//!
//! Locations live as nested directories under `<data>/galaxy`, each with
//! a `location.yaml` describing it. The provider resolves a bare slug to
//! its root-to-leaf path and reads individual records; everything missing
//! or unparsable is simply absent.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Metadata record for one location, as stored in `location.yaml`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct LocationRecord {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub lore: Option<LoreConfig>,
}

/// Reference from a location to its lore note in the Obsidian vault.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LoreConfig {
    #[serde(default)]
    pub note: String,
    /// Section headings CHARON may read. Empty means everything that is
    /// not excluded.
    #[serde(default)]
    pub charon_sections: Vec<String>,
    /// Heading regexes that are always withheld from CHARON.
    #[serde(default = "default_exclude_patterns")]
    pub exclude_patterns: Vec<String>,
}

pub fn default_exclude_patterns() -> Vec<String> {
    [
        "^GM Notes",
        "^Secrets",
        "^Session",
        "^Adventure Hooks",
        "^Campaign",
    ]
    .iter()
    .map(|p| p.to_string())
    .collect()
}

#[derive(Clone)]
pub struct LocationProvider {
    root: PathBuf,
}

impl LocationProvider {
    /// `data_dir` is the campaign data root; locations live under
    /// `<data_dir>/galaxy`.
    pub fn new(data_dir: &Path) -> Self {
        Self {
            root: data_dir.join("galaxy"),
        }
    }

    /// Reads the record at a slash-delimited path prefix, e.g.
    /// `"sol/earth"`. Missing or unparsable files are absent.
    pub fn location_record(&self, path_prefix: &str) -> Option<LocationRecord> {
        let yaml_path = self.root.join(path_prefix).join("location.yaml");
        let text = fs::read_to_string(&yaml_path).ok()?;
        match serde_yaml::from_str(&text) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!("unparsable location record {:?}: {}", yaml_path, e);
                None
            }
        }
    }

    /// Resolves a bare slug to its root-to-leaf slug chain by searching
    /// the location tree, e.g. `"base-alpha"` ->
    /// `["sol", "earth", "base-alpha"]`.
    pub fn location_path(&self, slug: &str) -> Option<Vec<String>> {
        let mut trail = Vec::new();
        if Self::search(&self.root, slug, &mut trail) {
            Some(trail)
        } else {
            None
        }
    }

    /// Path to a location's CHARON instance config, if one exists.
    pub fn instance_config_path(&self, location_path: &str) -> PathBuf {
        self.root
            .join(location_path)
            .join("charon")
            .join("instance.yaml")
    }

    fn search(dir: &Path, slug: &str, trail: &mut Vec<String>) -> bool {
        let Ok(entries) = fs::read_dir(dir) else {
            return false;
        };
        for entry in entries.flatten() {
            if !entry.path().is_dir() {
                continue;
            }
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if name.starts_with('.') {
                continue;
            }
            trail.push(name.clone());
            if name == slug || Self::search(&entry.path(), slug, trail) {
                return true;
            }
            trail.pop();
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_location(root: &Path, rel: &str, name: &str) {
        let dir = root.join("galaxy").join(rel);
        fs::create_dir_all(&dir).unwrap();
        fs::write(
            dir.join("location.yaml"),
            format!("type: station\nname: {}\nstatus: OPERATIONAL\n", name),
        )
        .unwrap();
    }

    #[test]
    fn test_record_roundtrip() {
        let tmp = TempDir::new().unwrap();
        write_location(tmp.path(), "sol", "Sol System");
        let provider = LocationProvider::new(tmp.path());
        let record = provider.location_record("sol").unwrap();
        assert_eq!(record.name, "Sol System");
        assert_eq!(record.status.as_deref(), Some("OPERATIONAL"));
        assert!(provider.location_record("missing").is_none());
    }

    #[test]
    fn test_location_path_walks_tree() {
        let tmp = TempDir::new().unwrap();
        write_location(tmp.path(), "sol", "Sol");
        write_location(tmp.path(), "sol/earth", "Earth");
        write_location(tmp.path(), "sol/earth/base-alpha", "Base Alpha");

        let provider = LocationProvider::new(tmp.path());
        assert_eq!(
            provider.location_path("base-alpha").unwrap(),
            vec!["sol", "earth", "base-alpha"]
        );
        assert_eq!(provider.location_path("sol").unwrap(), vec!["sol"]);
        assert!(provider.location_path("nonexistent").is_none());
    }

    #[test]
    fn test_unparsable_record_is_absent() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("galaxy").join("bad");
        fs::create_dir_all(&dir).unwrap();
        // A YAML list cannot deserialize into a record mapping.
        fs::write(dir.join("location.yaml"), "- 1\n- 2\n").unwrap();
        let provider = LocationProvider::new(tmp.path());
        assert!(provider.location_record("bad").is_none());
    }
}
