//! The Kindle exporter plugin.
//!
//! Copies the PDFs attached to the exported papers into `documents/Papers`
//! on a mounted Kindle and lists them in the device's "Papers" collection.
//! Each export runs on its own thread; the host follows it through the
//! shared [`ExportProgress`].

use crate::collections::register_exported;
use crate::config::ExporterConfig;
use crate::destination::check_destination_root;
use crate::error::{ErrorReport, ExporterError};
use crate::extractor::select_records;
use crate::plugin::ExporterPlugin;
use crate::progress::{ExportDelegate, ExportProgress, JobOutcome};
use crate::record::{ExportScope, RecordCategory, RecordCollection};
use crate::transfer::{execute_job, TransferJob};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

const DEVICE_MARKER_DIR: &str = "documents";

pub struct KindleExporter {
    config: ExporterConfig,
    progress: Arc<ExportProgress>,
    worker: Mutex<Option<JoinHandle<()>>>,
    preparation_error: Mutex<Option<ErrorReport>>,
}

impl Default for KindleExporter {
    fn default() -> Self {
        Self::new(ExporterConfig::default())
    }
}

impl KindleExporter {
    pub fn new(config: ExporterConfig) -> Self {
        Self {
            config: config.normalized(),
            progress: Arc::new(ExportProgress::new()),
            worker: Mutex::new(None),
            preparation_error: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &ExporterConfig {
        &self.config
    }

    pub fn progress(&self) -> Arc<ExportProgress> {
        Arc::clone(&self.progress)
    }

    /// Start an export on a background thread.
    ///
    /// `destination` overrides the collection's `url` entry, which in turn
    /// overrides the configured device root.
    pub fn perform_export(
        &self,
        records: RecordCollection,
        destination: Option<PathBuf>,
    ) -> Result<(), ExporterError> {
        let mut worker = self.worker.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(handle) = worker.as_ref() {
            if !handle.is_finished() {
                return Err(ExporterError::AlreadyRunning);
            }
        }
        if let Some(handle) = worker.take() {
            join_worker(handle, &self.progress);
        }

        self.progress.reset();
        let destination = destination
            .or_else(|| records.destination())
            .or_else(|| self.config.device_root.clone());
        let config = self.config.clone();
        let progress = Arc::clone(&self.progress);

        let handle = thread::Builder::new()
            .name("kindle-export".to_string())
            .spawn(move || run_export(&config, &progress, &records, destination))
            .map_err(|e| ExporterError::Internal(format!("failed to start export thread: {e}")))?;
        *worker = Some(handle);
        Ok(())
    }

    /// Block until the current export, if any, has finished.
    pub fn wait(&self) {
        let handle = self.worker.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(handle) = handle {
            join_worker(handle, &self.progress);
        }
    }

    /// Cancel a running export, wait for it, and reset all state.
    pub fn cleanup(&self) {
        if self.progress.is_running() {
            self.progress.request_cancel();
        }
        self.wait();
        self.progress.reset();
        *self
            .preparation_error
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = None;
        log::debug!("Exporter: Cleaned up for the next export");
    }
}

impl Drop for KindleExporter {
    fn drop(&mut self) {
        let handle = self.worker.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(handle) = handle {
            self.progress.request_cancel();
            join_worker(handle, &self.progress);
        }
    }
}

impl ExporterPlugin for KindleExporter {
    fn menu_titles(&self) -> Vec<String> {
        vec!["Export PDFs to Kindle…".to_string()]
    }

    fn should_show_save_panel(&self) -> bool {
        self.config.device_root.is_none()
    }

    fn allowed_file_types(&self) -> Vec<String> {
        Vec::new()
    }

    fn exportable_types(&self) -> Vec<String> {
        vec![RecordCategory::Papers.key().to_string()]
    }

    fn export_limit(&self) -> ExportScope {
        self.config.scope
    }

    fn requires_internet_connection(&self) -> bool {
        false
    }

    fn set_delegate(&self, delegate: Option<Arc<dyn ExportDelegate>>) {
        self.progress.set_delegate(delegate);
    }

    fn ready_to_perform_export(&self) -> bool {
        let result = match &self.config.device_root {
            // The destination arrives with the records.
            None => Ok(()),
            Some(root) => check_device(root, self.config.require_device_marker),
        };
        let mut preparation_error = self
            .preparation_error
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        match result {
            Ok(()) => {
                *preparation_error = None;
                true
            }
            Err(error) => {
                log::warn!("Exporter: Not ready: {error}");
                *preparation_error = Some(error.report());
                false
            }
        }
    }

    fn export_preparation_error(&self) -> Option<ErrorReport> {
        self.preparation_error
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn can_cancel_export(&self) -> bool {
        true
    }

    fn perform_export_of_records(&self, records: RecordCollection) {
        if let Err(error) = self.perform_export(records, None) {
            log::error!("Exporter: Could not start export: {error}");
        }
    }

    fn cancel_export(&self) {
        self.progress.request_cancel();
    }

    fn items_to_export(&self) -> Option<u64> {
        self.progress.items_to_export()
    }

    fn exported_items(&self) -> u64 {
        self.progress.exported_items()
    }

    fn status_string(&self) -> String {
        self.progress.status_string()
    }

    fn successful_completion(&self) -> bool {
        self.progress.did_succeed().unwrap_or(false)
    }

    fn export_completion_error(&self) -> Option<ErrorReport> {
        self.progress.error()
    }

    fn perform_cleanup(&self) {
        self.cleanup();
    }
}

/// Check that `root` looks like a usable, mounted device.
pub fn check_device(root: &Path, require_marker: bool) -> Result<(), ExporterError> {
    check_destination_root(root)?;
    if require_marker && !root.join(DEVICE_MARKER_DIR).is_dir() {
        return Err(ExporterError::InvalidDestinationRoot {
            path: root.to_path_buf(),
            reason: "no Kindle documents folder found".to_string(),
        });
    }
    Ok(())
}

fn run_export(
    config: &ExporterConfig,
    progress: &ExportProgress,
    records: &RecordCollection,
    destination: Option<PathBuf>,
) {
    progress.begin();

    let root = match destination {
        Some(root) => root,
        None => {
            progress.finish(JobOutcome::PreconditionFailed(
                ExporterError::InvalidDestinationRoot {
                    path: PathBuf::new(),
                    reason: "no destination was given".to_string(),
                },
            ));
            return;
        }
    };
    if config.require_device_marker {
        if let Err(error) = check_device(&root, true) {
            progress.finish(JobOutcome::PreconditionFailed(error));
            return;
        }
    }

    let selection = select_records(records, config.scope);
    for _ in &selection.rejected {
        progress.record_skipped();
    }

    let job = TransferJob::new(&root, selection.records)
        .with_layout(config.layout())
        .with_policy(config.overwrite_policy)
        .with_options(config.transfer_options())
        .with_cancel_flag(progress.cancel_flag());
    let report = execute_job(&job, progress);

    if config.register_collection && !matches!(report.outcome, JobOutcome::PreconditionFailed(_)) {
        let destinations = report.present_destinations();
        if !destinations.is_empty() {
            progress.set_status("Updating Kindle collections…");
            if let Err(e) =
                register_exported(&root, job.layout(), &config.collection_name, &destinations)
            {
                log::warn!("Exporter: Failed to update Kindle collections: {e:#}");
            }
        }
    }

    progress.finish(report.outcome);
}

fn join_worker(handle: JoinHandle<()>, progress: &ExportProgress) {
    if handle.join().is_err() {
        log::error!("Exporter: Export thread panicked");
        if progress.is_running() {
            progress.finish(JobOutcome::PreconditionFailed(ExporterError::Internal(
                "the export stopped unexpectedly".to_string(),
            )));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn plugin_metadata() {
        let exporter = KindleExporter::default();
        assert_eq!(exporter.exportable_types(), vec!["papers".to_string()]);
        assert_eq!(exporter.export_limit(), ExportScope::AllItems);
        assert!(exporter.should_show_save_panel());
        assert!(exporter.can_cancel_export());
        assert!(!exporter.requires_internet_connection());
    }

    #[test]
    fn readiness_reports_missing_device() {
        let dir = tempdir().unwrap();
        let exporter = KindleExporter::new(ExporterConfig {
            device_root: Some(dir.path().join("Kindle")),
            ..ExporterConfig::default()
        });
        assert!(!exporter.ready_to_perform_export());
        let error = exporter.export_preparation_error().unwrap();
        assert_eq!(error.code.as_i32(), 1);
        assert_eq!(error.title, "Kindle not writable");

        std::fs::create_dir(dir.path().join("Kindle")).unwrap();
        assert!(exporter.ready_to_perform_export());
        assert_eq!(exporter.export_preparation_error(), None);
    }

    #[test]
    fn device_marker_is_enforced_when_configured() {
        let dir = tempdir().unwrap();
        assert!(check_device(dir.path(), false).is_ok());
        assert!(check_device(dir.path(), true).is_err());
        std::fs::create_dir(dir.path().join("documents")).unwrap();
        assert!(check_device(dir.path(), true).is_ok());
    }

    #[test]
    fn export_without_destination_fails_precondition() {
        let exporter = KindleExporter::default();
        exporter.perform_export(RecordCollection::new(), None).unwrap();
        exporter.wait();
        assert!(!exporter.successful_completion());
        assert!(matches!(
            exporter.progress().outcome(),
            Some(JobOutcome::PreconditionFailed(ExporterError::InvalidDestinationRoot { .. }))
        ));
    }
}
