//! Kindle collection index (`system/collections.json`).
//!
//! The device groups documents into collections listed in a JSON object that
//! maps `"<name>@<locale>"` to `{"items": [...], "lastAccess": <millis>}`.
//! Items are `*` followed by the hex SHA-1 of the path the device sees for the
//! document, e.g. `/mnt/us/documents/Papers/paper.pdf`.

use crate::destination::DeviceLayout;
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha1::{Digest, Sha1};
use std::fs;
use std::path::{Path, PathBuf};

pub const COLLECTIONS_FILE: &str = "system/collections.json";
pub const DEFAULT_COLLECTION_NAME: &str = "Papers2@en-US";

/// Collection item id for a document at `device_path`.
pub fn item_id(device_path: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(device_path.as_bytes());
    format!("*{:x}", hasher.finalize())
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Collection {
    #[serde(default)]
    pub items: Vec<String>,
    #[serde(rename = "lastAccess", default)]
    pub last_access: i64,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// The collections file of one mounted device.
#[derive(Debug, Clone)]
pub struct CollectionRegistry {
    path: PathBuf,
    entries: Map<String, Value>,
}

impl CollectionRegistry {
    /// Load the registry below `root`; a missing file yields an empty one.
    pub fn load(root: &Path) -> Result<Self> {
        let path = root.join(COLLECTIONS_FILE);
        if !path.exists() {
            log::debug!("Collections: {:?} does not exist yet", path);
            return Ok(Self {
                path,
                entries: Map::new(),
            });
        }

        let text = fs::read_to_string(&path)
            .context(format!("Failed to read collections file: {:?}", path))?;
        let entries = if text.trim().is_empty() {
            Map::new()
        } else {
            match serde_json::from_str::<Value>(&text)
                .context(format!("Failed to parse collections file: {:?}", path))?
            {
                Value::Object(entries) => entries,
                _ => bail!("Collections file {:?} is not a JSON object", path),
            }
        };
        Ok(Self { path, entries })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn collection(&self, name: &str) -> Option<Collection> {
        self.entries
            .get(name)
            .and_then(|value| serde_json::from_value(value.clone()).ok())
    }

    /// Add `device_paths` to collection `name`, creating it if needed.
    /// Returns how many items were new.
    pub fn add_items<'a>(
        &mut self,
        name: &str,
        device_paths: impl IntoIterator<Item = &'a str>,
    ) -> Result<usize> {
        let mut collection = match self.entries.get(name) {
            Some(value) => serde_json::from_value::<Collection>(value.clone())
                .context(format!("Collection '{}' has an unexpected shape", name))?,
            None => Collection::default(),
        };

        let mut added = 0;
        for device_path in device_paths {
            let id = item_id(device_path);
            if !collection.items.contains(&id) {
                collection.items.push(id);
                added += 1;
            }
        }
        collection.last_access = chrono::Utc::now().timestamp_millis();

        self.entries
            .insert(name.to_string(), serde_json::to_value(&collection)?);
        Ok(added)
    }

    /// Write the registry back, replacing the file atomically.
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .context(format!("Failed to create directory: {:?}", parent))?;
        }
        let content = serde_json::to_string(&self.entries)?;
        let temp = self.path.with_extension("json.tmp");
        fs::write(&temp, content)
            .context(format!("Failed to write collections file: {:?}", temp))?;
        fs::rename(&temp, &self.path)
            .context(format!("Failed to replace collections file: {:?}", self.path))?;
        Ok(())
    }
}

/// Register exported documents in collection `name` on the device at `root`.
pub fn register_exported(
    root: &Path,
    layout: &DeviceLayout,
    name: &str,
    destinations: &[PathBuf],
) -> Result<usize> {
    let device_paths: Vec<String> = destinations
        .iter()
        .filter_map(|destination| layout.device_path(root, destination))
        .collect();
    if device_paths.is_empty() {
        return Ok(0);
    }

    let mut registry = CollectionRegistry::load(root)?;
    let added = registry.add_items(name, device_paths.iter().map(String::as_str))?;
    registry.save()?;
    log::info!(
        "Collections: Added {} of {} document(s) to '{}' in {:?}",
        added,
        device_paths.len(),
        name,
        registry.path()
    );
    Ok(added)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn item_id_hashes_device_path() {
        assert_eq!(
            item_id("/mnt/us/documents/Papers/paper.pdf"),
            "*29f7646a1f6a5347e1192f02a0b70cf95c440c97"
        );
    }

    #[test]
    fn missing_file_loads_empty() {
        let dir = tempdir().unwrap();
        let registry = CollectionRegistry::load(dir.path()).unwrap();
        assert_eq!(registry.names().count(), 0);
        assert_eq!(registry.path(), dir.path().join(COLLECTIONS_FILE));
    }

    #[test]
    fn adds_without_duplicates_and_keeps_other_collections() {
        let dir = tempdir().unwrap();
        let system = dir.path().join("system");
        fs::create_dir(&system).unwrap();
        fs::write(
            system.join("collections.json"),
            json!({
                "Novels@en-US": {"items": ["*abc"], "lastAccess": 1},
                "Papers2@en-US": {"items": [item_id("/mnt/us/documents/Papers/old.pdf")], "lastAccess": 2, "sortOrder": 3}
            })
            .to_string(),
        )
        .unwrap();

        let mut registry = CollectionRegistry::load(dir.path()).unwrap();
        let added = registry
            .add_items(
                DEFAULT_COLLECTION_NAME,
                ["/mnt/us/documents/Papers/old.pdf", "/mnt/us/documents/Papers/new.pdf"],
            )
            .unwrap();
        assert_eq!(added, 1);
        registry.save().unwrap();

        let reloaded = CollectionRegistry::load(dir.path()).unwrap();
        let novels = reloaded.collection("Novels@en-US").unwrap();
        assert_eq!(novels.items, vec!["*abc".to_string()]);
        let papers = reloaded.collection(DEFAULT_COLLECTION_NAME).unwrap();
        assert_eq!(papers.items.len(), 2);
        assert!(papers.last_access > 2);
        assert_eq!(papers.extra.get("sortOrder"), Some(&json!(3)));
        assert!(!system.join("collections.json.tmp").exists());
    }

    #[test]
    fn register_exported_maps_destinations_to_device_paths() {
        let dir = tempdir().unwrap();
        let layout = DeviceLayout::kindle();
        let destination = layout.collection_dir(dir.path()).join("paper.pdf");

        let added =
            register_exported(dir.path(), &layout, DEFAULT_COLLECTION_NAME, &[destination]).unwrap();
        assert_eq!(added, 1);

        let registry = CollectionRegistry::load(dir.path()).unwrap();
        assert_eq!(
            registry.collection(DEFAULT_COLLECTION_NAME).unwrap().items,
            vec!["*29f7646a1f6a5347e1192f02a0b70cf95c440c97".to_string()]
        );
    }

    #[test]
    fn corrupt_file_is_an_error() {
        let dir = tempdir().unwrap();
        fs::create_dir(dir.path().join("system")).unwrap();
        fs::write(dir.path().join(COLLECTIONS_FILE), "[1,2,3]").unwrap();
        assert!(CollectionRegistry::load(dir.path()).is_err());
    }
}
