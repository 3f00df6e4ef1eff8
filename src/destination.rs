//! Destination paths on the mounted device.
//!
//! A Kindle expects side-loaded documents below `documents/` on its USB
//! volume. The device itself sees that volume mounted at `/mnt/us`, which is
//! the prefix its collection index uses.

use crate::error::ExporterError;
use crate::record::{ExportRecord, OverwritePolicy};
use std::collections::HashSet;
use std::fmt;
use std::fs::{self, OpenOptions};
use std::path::{Component, Path, PathBuf};

pub const DEFAULT_DEVICE_SUBPATH: &str = "documents/Papers";
pub const DEFAULT_DEVICE_LOCAL_PREFIX: &str = "/mnt/us";

const MAX_FILE_NAME_LEN: usize = 180;

/// Folder convention of the target device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceLayout {
    subpath: PathBuf,
    local_prefix: String,
    use_titles: bool,
}

impl Default for DeviceLayout {
    fn default() -> Self {
        Self::kindle()
    }
}

impl DeviceLayout {
    pub fn new(subpath: impl Into<PathBuf>) -> Self {
        Self {
            subpath: subpath.into(),
            local_prefix: DEFAULT_DEVICE_LOCAL_PREFIX.to_string(),
            use_titles: false,
        }
    }

    pub fn kindle() -> Self {
        Self::new(DEFAULT_DEVICE_SUBPATH)
    }

    pub fn with_local_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.local_prefix = prefix.into();
        self
    }

    /// Name copies after the paper title instead of the source file name.
    pub fn with_titles(mut self, use_titles: bool) -> Self {
        self.use_titles = use_titles;
        self
    }

    pub fn subpath(&self) -> &Path {
        &self.subpath
    }

    /// Folder under `root` that receives the documents.
    pub fn collection_dir(&self, root: &Path) -> PathBuf {
        // Leading separators would make `join` discard the root.
        let relative: PathBuf = self
            .subpath
            .components()
            .filter(|c| matches!(c, Component::Normal(_)))
            .collect();
        root.join(relative)
    }

    /// Path under which the device itself sees `destination`.
    ///
    /// Returns `None` when `destination` does not live under `root`.
    pub fn device_path(&self, root: &Path, destination: &Path) -> Option<String> {
        let relative = destination.strip_prefix(root).ok()?;
        let mut device_path = self.local_prefix.trim_end_matches('/').to_string();
        for component in relative.components() {
            if let Component::Normal(part) = component {
                device_path.push('/');
                device_path.push_str(&part.to_string_lossy());
            }
        }
        Some(device_path)
    }

    /// File name used on the device for `record`.
    pub fn file_name(&self, record: &ExportRecord) -> Option<String> {
        let source_name = record.source().file_name()?.to_string_lossy().into_owned();
        if !self.use_titles {
            return Some(source_name);
        }

        let title = match record.title() {
            Some(title) => sanitize_file_name(title),
            None => return Some(source_name),
        };
        if title.is_empty() {
            return Some(source_name);
        }
        match record.source().extension() {
            Some(ext) => Some(format!("{}.{}", title, ext.to_string_lossy())),
            None => Some(title),
        }
    }
}

/// Make `name` safe for the FAT volume of the device.
pub fn sanitize_file_name(name: &str) -> String {
    let replaced: String = name
        .chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let trimmed = replaced.trim().trim_end_matches(['.', ' ']);
    trimmed.chars().take(MAX_FILE_NAME_LEN).collect::<String>().trim_end().to_string()
}

/// Fail unless `root` is an existing, writable directory.
pub fn check_destination_root(root: &Path) -> Result<(), ExporterError> {
    let invalid = |reason: String| ExporterError::InvalidDestinationRoot {
        path: root.to_path_buf(),
        reason,
    };

    let metadata = fs::metadata(root).map_err(|e| invalid(format!("cannot access: {e}")))?;
    if !metadata.is_dir() {
        return Err(invalid("not a directory".to_string()));
    }

    // Permission bits do not tell the whole story on mounted volumes, so probe.
    let probe = root.join(format!(".kindle-exporter-probe-{}", std::process::id()));
    OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&probe)
        .map_err(|e| invalid(format!("not writable: {e}")))?;
    if let Err(e) = fs::remove_file(&probe) {
        log::warn!("Destination: Failed to remove probe file {:?}: {}", probe, e);
    }
    Ok(())
}

/// Why a record was not copied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    AlreadyExists(PathBuf),
    /// The source path has no file name to copy under.
    NoFileName(PathBuf),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::AlreadyExists(path) => write!(f, "{} already exists", path.display()),
            SkipReason::NoFileName(path) => write!(f, "{} has no file name", path.display()),
        }
    }
}

/// Result of resolving a record's destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Target(PathBuf),
    Skip(SkipReason),
}

/// Resolve the destination of `record` under `root` for a single record.
pub fn resolve_destination(
    record: &ExportRecord,
    root: &Path,
    layout: &DeviceLayout,
    policy: OverwritePolicy,
) -> Result<Resolution, ExporterError> {
    match target_path(record, root, layout) {
        Some(target) => apply_policy(target.exists(), target, policy),
        None => Ok(unnamed(record)),
    }
}

/// Resolves destinations for one job, treating two records that map to the
/// same file as a collision.
#[derive(Debug)]
pub struct DestinationResolver {
    root: PathBuf,
    layout: DeviceLayout,
    policy: OverwritePolicy,
    claimed: HashSet<PathBuf>,
}

impl DestinationResolver {
    pub fn new(root: impl Into<PathBuf>, layout: DeviceLayout, policy: OverwritePolicy) -> Self {
        Self {
            root: root.into(),
            layout,
            policy,
            claimed: HashSet::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn layout(&self) -> &DeviceLayout {
        &self.layout
    }

    pub fn resolve(&mut self, record: &ExportRecord) -> Result<Resolution, ExporterError> {
        let target = match target_path(record, &self.root, &self.layout) {
            Some(target) => target,
            None => return Ok(unnamed(record)),
        };
        let claimed = self.claimed.contains(&target);
        let policy = match self.policy {
            // A file written earlier in this run is never replaced.
            OverwritePolicy::Overwrite if claimed => OverwritePolicy::SkipExisting,
            policy => policy,
        };
        let resolution = apply_policy(claimed || target.exists(), target, policy)?;
        if let Resolution::Target(path) = &resolution {
            self.claimed.insert(path.clone());
        }
        Ok(resolution)
    }
}

fn target_path(record: &ExportRecord, root: &Path, layout: &DeviceLayout) -> Option<PathBuf> {
    let name = layout.file_name(record)?;
    Some(layout.collection_dir(root).join(name))
}

fn unnamed(record: &ExportRecord) -> Resolution {
    log::warn!("Destination: {:?} has no file name, skipping", record.source());
    Resolution::Skip(SkipReason::NoFileName(record.source().to_path_buf()))
}

fn apply_policy(
    exists: bool,
    target: PathBuf,
    policy: OverwritePolicy,
) -> Result<Resolution, ExporterError> {
    if !exists {
        return Ok(Resolution::Target(target));
    }
    match policy {
        OverwritePolicy::Overwrite => Ok(Resolution::Target(target)),
        OverwritePolicy::SkipExisting => Ok(Resolution::Skip(SkipReason::AlreadyExists(target))),
        OverwritePolicy::FailOnCollision => Err(ExporterError::DestinationConflict { path: target }),
    }
}
