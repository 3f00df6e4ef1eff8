//! Exporter configuration.
//!
//! Settings live in a small JSON file. Every field is optional; missing ones
//! fall back to the Kindle defaults.

use crate::collections::DEFAULT_COLLECTION_NAME;
use crate::destination::{DeviceLayout, DEFAULT_DEVICE_LOCAL_PREFIX, DEFAULT_DEVICE_SUBPATH};
use crate::record::{ExportScope, OverwritePolicy};
use crate::transfer::{TransferOptions, DEFAULT_CHUNK_SIZE, MIN_CHUNK_SIZE};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExporterConfig {
    /// Folder below the device root that receives the PDFs.
    pub device_subpath: String,
    /// Mount point of the USB volume as seen from the device.
    pub device_local_prefix: String,
    pub collection_name: String,
    pub register_collection: bool,
    pub overwrite_policy: OverwritePolicy,
    pub scope: ExportScope,
    pub workers: usize,
    pub chunk_size: usize,
    pub verify_checksum: bool,
    pub use_titles: bool,
    /// Only accept roots that already contain a `documents` folder.
    pub require_device_marker: bool,
    /// Used when the host does not pass a destination.
    pub device_root: Option<PathBuf>,
}

impl Default for ExporterConfig {
    fn default() -> Self {
        Self {
            device_subpath: DEFAULT_DEVICE_SUBPATH.to_string(),
            device_local_prefix: DEFAULT_DEVICE_LOCAL_PREFIX.to_string(),
            collection_name: DEFAULT_COLLECTION_NAME.to_string(),
            register_collection: true,
            overwrite_policy: OverwritePolicy::SkipExisting,
            scope: ExportScope::AllItems,
            workers: 1,
            chunk_size: DEFAULT_CHUNK_SIZE,
            verify_checksum: false,
            use_titles: false,
            require_device_marker: false,
            device_root: None,
        }
    }
}

impl ExporterConfig {
    /// Load settings from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .context(format!("Failed to read exporter config: {:?}", path))?;
        let config: ExporterConfig = serde_json::from_str(&text)
            .context(format!("Failed to parse exporter config: {:?}", path))?;
        log::debug!("Config: Loaded {:?}", path);
        Ok(config.normalized())
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content).context(format!("Failed to write exporter config: {:?}", path))?;
        Ok(())
    }

    /// Clamp values that would stall or break a transfer.
    pub fn normalized(mut self) -> Self {
        self.workers = self.workers.max(1);
        self.chunk_size = self.chunk_size.max(MIN_CHUNK_SIZE);
        if self.device_subpath.trim().is_empty() {
            self.device_subpath = DEFAULT_DEVICE_SUBPATH.to_string();
        }
        if self.collection_name.trim().is_empty() {
            self.collection_name = DEFAULT_COLLECTION_NAME.to_string();
        }
        self
    }

    pub fn layout(&self) -> DeviceLayout {
        DeviceLayout::new(&self.device_subpath)
            .with_local_prefix(self.device_local_prefix.clone())
            .with_titles(self.use_titles)
    }

    pub fn transfer_options(&self) -> TransferOptions {
        TransferOptions {
            workers: self.workers.max(1),
            chunk_size: self.chunk_size.max(MIN_CHUNK_SIZE),
            verify_checksum: self.verify_checksum,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn defaults_match_kindle_layout() {
        let config = ExporterConfig::default();
        assert_eq!(config.device_subpath, "documents/Papers");
        assert_eq!(config.device_local_prefix, "/mnt/us");
        assert_eq!(config.collection_name, "Papers2@en-US");
        assert_eq!(config.overwrite_policy, OverwritePolicy::SkipExisting);
        assert_eq!(config.transfer_options(), TransferOptions::default());
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("kindle.json");
        fs::write(
            &path,
            r#"{"workers": 0, "overwrite_policy": "fail_on_collision", "scope": "current_group", "chunk_size": 10}"#,
        )
        .unwrap();

        let config = ExporterConfig::load(&path).unwrap();
        assert_eq!(config.workers, 1);
        assert_eq!(config.chunk_size, MIN_CHUNK_SIZE);
        assert_eq!(config.overwrite_policy, OverwritePolicy::FailOnCollision);
        assert_eq!(config.scope, ExportScope::CurrentGroup);
        assert!(config.register_collection);
        assert_eq!(config.device_root, None);
    }

    #[test]
    fn save_then_load_preserves_settings() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("kindle.json");
        let config = ExporterConfig {
            workers: 4,
            use_titles: true,
            device_root: Some(PathBuf::from("/Volumes/Kindle")),
            ..ExporterConfig::default()
        };
        config.save(&path).unwrap();
        assert_eq!(ExporterConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn invalid_file_reports_path() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("broken.json");
        fs::write(&path, "{workers: 2").unwrap();
        let err = ExporterConfig::load(&path).unwrap_err();
        assert!(format!("{err}").contains("broken.json"));
    }
}
