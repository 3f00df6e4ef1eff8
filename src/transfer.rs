//! Transfer engine: copies the selected records onto the device.
//!
//! Records are processed in order. Destination resolution always happens on
//! the engine thread so collisions between records of the same job are
//! detected deterministically; with more than one worker the copies
//! themselves are handed to a bounded pool of scoped threads.
//!
//! Each copy is written to a hidden `.part` file next to its destination and
//! renamed into place once its size (and optionally its md5 digest) matches
//! the source. Cancellation is polled before every record and between copy
//! chunks; an interrupted copy leaves nothing behind.

use crate::destination::{
    check_destination_root, DestinationResolver, DeviceLayout, Resolution, SkipReason,
};
use crate::error::ExporterError;
use crate::progress::{ExportProgress, JobOutcome, RecordFailure, TransferResult};
use crate::record::{ExportRecord, OverwritePolicy};
use crossbeam::channel;
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

pub const DEFAULT_CHUNK_SIZE: usize = 256 * 1024;
pub const MIN_CHUNK_SIZE: usize = 4 * 1024;

/// Tuning knobs for a transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferOptions {
    pub workers: usize,
    pub chunk_size: usize,
    pub verify_checksum: bool,
}

impl Default for TransferOptions {
    fn default() -> Self {
        Self {
            workers: 1,
            chunk_size: DEFAULT_CHUNK_SIZE,
            verify_checksum: false,
        }
    }
}

/// One run of the pipeline.
#[derive(Debug, Clone)]
pub struct TransferJob {
    root: PathBuf,
    layout: DeviceLayout,
    policy: OverwritePolicy,
    records: Vec<ExportRecord>,
    options: TransferOptions,
    cancel: Arc<AtomicBool>,
}

impl TransferJob {
    pub fn new(root: impl Into<PathBuf>, records: Vec<ExportRecord>) -> Self {
        Self {
            root: root.into(),
            layout: DeviceLayout::kindle(),
            policy: OverwritePolicy::default(),
            records,
            options: TransferOptions::default(),
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_layout(mut self, layout: DeviceLayout) -> Self {
        self.layout = layout;
        self
    }

    pub fn with_policy(mut self, policy: OverwritePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_options(mut self, options: TransferOptions) -> Self {
        self.options = options;
        self
    }

    /// Share an externally owned cancellation flag.
    pub fn with_cancel_flag(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn layout(&self) -> &DeviceLayout {
        &self.layout
    }

    pub fn records(&self) -> &[ExportRecord] {
        &self.records
    }

    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }
}

/// What happened to each record of a job, in record order, plus the outcome.
///
/// Records never reached because of cancellation have no entry.
#[derive(Debug, Clone)]
pub struct JobReport {
    pub outcome: JobOutcome,
    pub results: Vec<(ExportRecord, TransferResult)>,
}

impl JobReport {
    fn precondition_failed(error: ExporterError) -> Self {
        Self {
            outcome: JobOutcome::PreconditionFailed(error),
            results: Vec::new(),
        }
    }

    /// Destinations that now hold a copy of their record, copied or skipped.
    pub fn present_destinations(&self) -> Vec<PathBuf> {
        self.results
            .iter()
            .filter_map(|(_, result)| match result {
                TransferResult::Copied { destination, .. } => Some(destination.clone()),
                TransferResult::Skipped(SkipReason::AlreadyExists(path)) => Some(path.clone()),
                TransferResult::Skipped(SkipReason::NoFileName(_)) | TransferResult::Failed(_) => None,
            })
            .collect()
    }
}

/// Run `job` to completion and move `progress` into its terminal state.
pub fn run_job(job: &TransferJob, progress: &ExportProgress) -> JobReport {
    let report = execute_job(job, progress);
    progress.finish(report.outcome.clone());
    report
}

/// Run `job` without entering the terminal state, for callers with
/// follow-up work. They must call [`ExportProgress::finish`] themselves.
pub fn execute_job(job: &TransferJob, progress: &ExportProgress) -> JobReport {
    progress.begin();
    log::info!(
        "Transfer: Starting export of {} record(s) to {:?} ({} worker(s))",
        job.records.len(),
        job.root,
        job.options.workers.max(1)
    );

    if job.records.is_empty() {
        return JobReport::precondition_failed(ExporterError::NoRecordsSelected);
    }
    if let Err(error) = check_destination_root(&job.root) {
        log::error!("Transfer: {error}");
        return JobReport::precondition_failed(error);
    }
    let collection_dir = job.layout.collection_dir(&job.root);
    if let Err(e) = fs::create_dir_all(&collection_dir) {
        log::error!("Transfer: Failed to create {:?}: {}", collection_dir, e);
        return JobReport::precondition_failed(ExporterError::InvalidDestinationRoot {
            path: job.root.clone(),
            reason: format!("cannot create {}: {e}", collection_dir.display()),
        });
    }

    progress.set_items_to_export(job.records.len() as u64);
    let mut resolver = DestinationResolver::new(&job.root, job.layout.clone(), job.policy);

    let (results, cancelled) = if job.options.workers <= 1 {
        run_sequential(job, &mut resolver, progress)
    } else {
        run_pooled(job, &mut resolver, progress)
    };

    let failures: Vec<RecordFailure> = results
        .iter()
        .filter_map(|(record, result)| match result {
            TransferResult::Failed(error) => Some(RecordFailure {
                source: record.source().to_path_buf(),
                error: error.clone(),
            }),
            _ => None,
        })
        .collect();

    let outcome = if cancelled {
        JobOutcome::Cancelled
    } else if failures.is_empty() {
        JobOutcome::Success
    } else {
        JobOutcome::PartialFailure(failures)
    };
    JobReport { outcome, results }
}

type Results = Vec<(ExportRecord, TransferResult)>;

fn run_sequential(
    job: &TransferJob,
    resolver: &mut DestinationResolver,
    progress: &ExportProgress,
) -> (Results, bool) {
    let mut results = Vec::with_capacity(job.records.len());

    for record in &job.records {
        if job.is_cancelled() {
            log::info!("Transfer: Cancelled before {:?}", record.source());
            return (results, true);
        }
        let name = record.display_name();
        progress.set_status(format!("Copying {name}"));

        let result = match resolver.resolve(record) {
            Ok(Resolution::Target(destination)) => {
                match copy_record(record, &destination, &job.options, &job.cancel) {
                    Ok(result) => result,
                    Err(Interrupted) => return (results, true),
                }
            }
            Ok(Resolution::Skip(reason)) => TransferResult::Skipped(reason),
            Err(error) => TransferResult::Failed(error),
        };
        progress.record_result(&name, &result);
        results.push((record.clone(), result));
    }

    (results, false)
}

fn run_pooled(
    job: &TransferJob,
    resolver: &mut DestinationResolver,
    progress: &ExportProgress,
) -> (Results, bool) {
    let workers = job.options.workers.min(job.records.len()).max(1);
    let slots: Mutex<Vec<Option<TransferResult>>> = Mutex::new(vec![None; job.records.len()]);
    let interrupted = AtomicBool::new(false);
    let (work_tx, work_rx) = channel::bounded::<(usize, PathBuf)>(workers);

    let store = |index: usize, result: TransferResult| {
        slots.lock().unwrap_or_else(|e| e.into_inner())[index] = Some(result);
    };

    let scope_result = crossbeam::thread::scope(|scope| {
        for worker in 0..workers {
            let work_rx = work_rx.clone();
            let store = &store;
            let interrupted = &interrupted;
            scope.spawn(move |_| {
                for (index, destination) in work_rx.iter() {
                    let record = &job.records[index];
                    if job.is_cancelled() {
                        interrupted.store(true, Ordering::SeqCst);
                        continue;
                    }
                    log::debug!("Transfer: Worker {worker} copying {:?}", record.source());
                    match copy_record(record, &destination, &job.options, &job.cancel) {
                        Ok(result) => {
                            progress.record_result(&record.display_name(), &result);
                            store(index, result);
                        }
                        Err(Interrupted) => interrupted.store(true, Ordering::SeqCst),
                    }
                }
            });
        }
        drop(work_rx);

        for (index, record) in job.records.iter().enumerate() {
            if job.is_cancelled() {
                log::info!("Transfer: Cancelled before {:?}", record.source());
                break;
            }
            match resolver.resolve(record) {
                Ok(Resolution::Target(destination)) => {
                    if work_tx.send((index, destination)).is_err() {
                        log::error!("Transfer: All workers stopped unexpectedly");
                        break;
                    }
                }
                Ok(Resolution::Skip(reason)) => {
                    let result = TransferResult::Skipped(reason);
                    progress.record_result(&record.display_name(), &result);
                    store(index, result);
                }
                Err(error) => {
                    let result = TransferResult::Failed(error);
                    progress.record_result(&record.display_name(), &result);
                    store(index, result);
                }
            }
        }
        drop(work_tx);
    });

    if scope_result.is_err() {
        log::error!("Transfer: A copy worker panicked");
    }

    let slots = slots.into_inner().unwrap_or_else(|e| e.into_inner());
    let results: Results = job
        .records
        .iter()
        .zip(slots)
        .filter_map(|(record, slot)| slot.map(|result| (record.clone(), result)))
        .collect();
    let cancelled = job.is_cancelled() || interrupted.load(Ordering::SeqCst);
    (results, cancelled)
}

/// The copy stopped because cancellation was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Interrupted;

fn copy_record(
    record: &ExportRecord,
    destination: &Path,
    options: &TransferOptions,
    cancel: &AtomicBool,
) -> Result<TransferResult, Interrupted> {
    let partial = partial_path(destination);
    match copy_file(record.source(), &partial, destination, options, cancel) {
        Ok(CopyStatus::Done(bytes)) => {
            log::debug!("Transfer: Copied {:?} -> {:?} ({bytes} bytes)", record.source(), destination);
            Ok(TransferResult::Copied {
                destination: destination.to_path_buf(),
                bytes,
            })
        }
        Ok(CopyStatus::Cancelled) => {
            remove_partial(&partial);
            Err(Interrupted)
        }
        Err(error) => {
            remove_partial(&partial);
            log::warn!("Transfer: {error}");
            Ok(TransferResult::Failed(error))
        }
    }
}

enum CopyStatus {
    Done(u64),
    Cancelled,
}

fn copy_file(
    source: &Path,
    partial: &Path,
    destination: &Path,
    options: &TransferOptions,
    cancel: &AtomicBool,
) -> Result<CopyStatus, ExporterError> {
    let mut input = File::open(source).map_err(|e| ExporterError::from_read_io(source, &e))?;
    let metadata = input
        .metadata()
        .map_err(|e| ExporterError::from_read_io(source, &e))?;
    if !metadata.is_file() {
        return Err(ExporterError::SourceUnreadable {
            path: source.to_path_buf(),
            message: "not a regular file".to_string(),
        });
    }
    let expected = metadata.len();

    let mut output = File::create(partial).map_err(|e| ExporterError::from_write_io(destination, &e))?;
    let mut buffer = vec![0u8; options.chunk_size.max(MIN_CHUNK_SIZE)];
    let mut written: u64 = 0;
    loop {
        if cancel.load(Ordering::SeqCst) {
            return Ok(CopyStatus::Cancelled);
        }
        let n = match input.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(ExporterError::from_read_io(source, &e)),
        };
        output
            .write_all(&buffer[..n])
            .map_err(|e| ExporterError::from_write_io(destination, &e))?;
        written += n as u64;
    }
    output
        .sync_all()
        .map_err(|e| ExporterError::from_write_io(destination, &e))?;
    drop(output);

    verify_size(partial, destination, expected, written)?;
    if options.verify_checksum {
        verify_checksum(source, partial, destination)?;
    }
    replace(partial, destination)?;
    verify_size(destination, destination, expected, written)?;
    Ok(CopyStatus::Done(written))
}

fn verify_size(path: &Path, destination: &Path, expected: u64, written: u64) -> Result<(), ExporterError> {
    let actual = fs::metadata(path)
        .map_err(|e| ExporterError::from_write_io(destination, &e))?
        .len();
    if actual != expected || written != expected {
        return Err(ExporterError::WriteFailure {
            path: destination.to_path_buf(),
            message: format!("size mismatch after copy: expected {expected} bytes, found {actual}"),
        });
    }
    Ok(())
}

fn verify_checksum(source: &Path, partial: &Path, destination: &Path) -> Result<(), ExporterError> {
    let expected = file_md5(source).map_err(|e| ExporterError::from_read_io(source, &e))?;
    let actual = file_md5(partial).map_err(|e| ExporterError::from_write_io(destination, &e))?;
    if expected != actual {
        return Err(ExporterError::WriteFailure {
            path: destination.to_path_buf(),
            message: format!("checksum mismatch after copy: expected {expected:x}, found {actual:x}"),
        });
    }
    Ok(())
}

/// md5 digest of a file, read in chunks.
pub fn file_md5(path: &Path) -> io::Result<md5::Digest> {
    let mut file = File::open(path)?;
    let mut context = md5::Context::new();
    let mut buffer = vec![0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        context.consume(&buffer[..n]);
    }
    Ok(context.compute())
}

fn replace(partial: &Path, destination: &Path) -> Result<(), ExporterError> {
    if let Err(first) = fs::rename(partial, destination) {
        // Some filesystems refuse to rename over an existing file.
        if destination.exists() {
            fs::remove_file(destination).map_err(|e| ExporterError::from_write_io(destination, &e))?;
            fs::rename(partial, destination).map_err(|e| ExporterError::from_write_io(destination, &e))?;
        } else {
            return Err(ExporterError::from_write_io(destination, &first));
        }
    }
    Ok(())
}

fn partial_path(destination: &Path) -> PathBuf {
    let name = destination
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    destination.with_file_name(format!(".{name}.part"))
}

fn remove_partial(partial: &Path) {
    if partial.exists() {
        if let Err(e) = fs::remove_file(partial) {
            log::warn!("Transfer: Failed to remove partial copy {:?}: {}", partial, e);
        }
    }
}
