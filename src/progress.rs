//! Progress and completion state of an export run.
//!
//! [`ExportProgress`] is shared between the thread running the transfer and
//! whoever watches it. Watchers can poll it at any time, register an
//! [`ExportDelegate`] for begin/status/end callbacks, or [`subscribe`] to a
//! channel of [`ExportEvent`]s.
//!
//! [`subscribe`]: ExportProgress::subscribe

use crate::destination::SkipReason;
use crate::error::{ErrorCode, ErrorReport, ExporterError};
use crossbeam::channel::{self, Receiver, Sender, TrySendError};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

const UNKNOWN_TOTAL: u64 = u64::MAX;
const EVENT_CAPACITY: usize = 64;

/// Result of one record's copy attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferResult {
    Copied { destination: PathBuf, bytes: u64 },
    Skipped(SkipReason),
    Failed(ExporterError),
}

/// A record that failed to transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordFailure {
    pub source: PathBuf,
    #[serde(serialize_with = "serialize_error")]
    pub error: ExporterError,
}

/// Terminal state of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Success,
    PartialFailure(Vec<RecordFailure>),
    Cancelled,
    PreconditionFailed(ExporterError),
}

impl JobOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, JobOutcome::Success)
    }

    pub fn name(&self) -> &'static str {
        match self {
            JobOutcome::Success => "success",
            JobOutcome::PartialFailure(_) => "partial_failure",
            JobOutcome::Cancelled => "cancelled",
            JobOutcome::PreconditionFailed(_) => "precondition_failed",
        }
    }

    /// Error to show the user for this outcome, if any.
    pub fn error_report(&self) -> Option<ErrorReport> {
        match self {
            JobOutcome::Success | JobOutcome::Cancelled => None,
            JobOutcome::PreconditionFailed(error) => Some(error.report()),
            JobOutcome::PartialFailure(failures) => {
                let first = failures.first()?;
                if failures.len() == 1 {
                    return Some(first.error.report());
                }
                let code = if failures.iter().all(|f| f.error.code() == first.error.code()) {
                    first.error.code()
                } else {
                    ErrorCode::FileWrite
                };
                Some(ErrorReport::new(
                    code,
                    "Some papers could not be copied",
                    format!(
                        "{} files could not be copied to your Kindle. The first problem was: {}",
                        failures.len(),
                        first.error.description()
                    ),
                ))
            }
        }
    }
}

/// Callbacks mirroring the host delegate. Called from the export thread.
pub trait ExportDelegate: Send + Sync {
    fn did_begin_export(&self, progress: &ExportProgress);
    fn update_status(&self, progress: &ExportProgress);
    fn did_end_export(&self, progress: &ExportProgress);
}

/// Events published to [`ExportProgress::subscribe`] receivers.
///
/// Slow subscribers may miss intermediate `StatusChanged` events; the polled
/// state is always current.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportEvent {
    Started,
    StatusChanged {
        exported: u64,
        total: Option<u64>,
        status: String,
    },
    Ended(JobOutcome),
}

/// Serializable view of the progress state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgressSnapshot {
    pub items_to_export: Option<u64>,
    pub exported_items: u64,
    pub skipped_items: u64,
    pub failed_items: u64,
    pub status: String,
    pub running: bool,
    pub cancelled: bool,
    pub outcome: Option<&'static str>,
    pub succeeded: Option<bool>,
    pub error: Option<ErrorReport>,
}

pub struct ExportProgress {
    items_to_export: AtomicU64,
    exported_items: AtomicU64,
    skipped_items: AtomicU64,
    failed_items: AtomicU64,
    running: AtomicBool,
    cancel_flag: Arc<AtomicBool>,
    status: RwLock<String>,
    outcome: RwLock<Option<JobOutcome>>,
    delegate: RwLock<Option<Arc<dyn ExportDelegate>>>,
    subscribers: Mutex<Vec<Sender<ExportEvent>>>,
}

impl Default for ExportProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ExportProgress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExportProgress")
            .field("snapshot", &self.snapshot())
            .finish()
    }
}

impl ExportProgress {
    pub fn new() -> Self {
        Self {
            items_to_export: AtomicU64::new(UNKNOWN_TOTAL),
            exported_items: AtomicU64::new(0),
            skipped_items: AtomicU64::new(0),
            failed_items: AtomicU64::new(0),
            running: AtomicBool::new(false),
            cancel_flag: Arc::new(AtomicBool::new(false)),
            status: RwLock::new(String::new()),
            outcome: RwLock::new(None),
            delegate: RwLock::new(None),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    pub fn set_delegate(&self, delegate: Option<Arc<dyn ExportDelegate>>) {
        *self.delegate.write().unwrap_or_else(|e| e.into_inner()) = delegate;
    }

    /// Receive events from now on. The channel is bounded; status events
    /// that do not fit are dropped for that subscriber. The last slot is
    /// kept for `Ended`, so a subscriber that drains between runs always
    /// receives each run's terminal event.
    pub fn subscribe(&self) -> Receiver<ExportEvent> {
        let (sender, receiver) = channel::bounded(EVENT_CAPACITY);
        self.subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(sender);
        receiver
    }

    // --- polled state ---

    /// Total number of items, or `None` while still unknown.
    pub fn items_to_export(&self) -> Option<u64> {
        match self.items_to_export.load(Ordering::SeqCst) {
            UNKNOWN_TOTAL => None,
            total => Some(total),
        }
    }

    pub fn exported_items(&self) -> u64 {
        self.exported_items.load(Ordering::SeqCst)
    }

    pub fn skipped_items(&self) -> u64 {
        self.skipped_items.load(Ordering::SeqCst)
    }

    pub fn failed_items(&self) -> u64 {
        self.failed_items.load(Ordering::SeqCst)
    }

    pub fn status_string(&self) -> String {
        self.status.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel_flag.load(Ordering::SeqCst)
    }

    /// Flag shared with the transfer engine.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel_flag)
    }

    pub fn request_cancel(&self) {
        if !self.cancel_flag.swap(true, Ordering::SeqCst) {
            log::info!("Progress: Cancellation requested");
        }
    }

    pub fn outcome(&self) -> Option<JobOutcome> {
        self.outcome.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Whether the run succeeded; `None` until it reached a terminal state.
    pub fn did_succeed(&self) -> Option<bool> {
        self.outcome
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(JobOutcome::is_success)
    }

    pub fn error(&self) -> Option<ErrorReport> {
        self.outcome
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .and_then(JobOutcome::error_report)
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        let outcome = self.outcome();
        ProgressSnapshot {
            items_to_export: self.items_to_export(),
            exported_items: self.exported_items(),
            skipped_items: self.skipped_items(),
            failed_items: self.failed_items(),
            status: self.status_string(),
            running: self.is_running(),
            cancelled: self.is_cancelled(),
            outcome: outcome.as_ref().map(JobOutcome::name),
            succeeded: outcome.as_ref().map(JobOutcome::is_success),
            error: outcome.as_ref().and_then(JobOutcome::error_report),
        }
    }

    // --- updates from the export thread ---

    /// Enter the running state. A no-op while already running.
    pub fn begin(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        *self.outcome.write().unwrap_or_else(|e| e.into_inner()) = None;
        self.store_status("Preparing export…".to_string());
        self.publish(ExportEvent::Started);
        if let Some(delegate) = self.current_delegate() {
            delegate.did_begin_export(self);
        }
    }

    /// Fix the total. Returns `false` if a different total was already fixed.
    pub fn set_items_to_export(&self, total: u64) -> bool {
        let total = total.min(UNKNOWN_TOTAL - 1);
        match self.items_to_export.compare_exchange(
            UNKNOWN_TOTAL,
            total,
            Ordering::SeqCst,
            Ordering::SeqCst,
        ) {
            Ok(_) => {
                self.notify_status();
                true
            }
            Err(current) if current == total => true,
            Err(current) => {
                log::warn!(
                    "Progress: Ignoring attempt to change items to export from {current} to {total}"
                );
                false
            }
        }
    }

    pub fn set_status(&self, status: impl Into<String>) {
        self.store_status(status.into());
        self.notify_status();
    }

    /// A record excluded before transfer.
    pub fn record_skipped(&self) {
        self.skipped_items.fetch_add(1, Ordering::SeqCst);
        self.notify_status();
    }

    pub fn record_result(&self, name: &str, result: &TransferResult) {
        let status = match result {
            TransferResult::Copied { .. } => {
                let exported = self.exported_items.fetch_add(1, Ordering::SeqCst) + 1;
                match self.items_to_export() {
                    Some(total) => format!("Copied {exported} of {total}: {name}"),
                    None => format!("Copied {exported}: {name}"),
                }
            }
            TransferResult::Skipped(reason) => {
                self.skipped_items.fetch_add(1, Ordering::SeqCst);
                format!("Skipped {name}: {reason}")
            }
            TransferResult::Failed(error) => {
                self.failed_items.fetch_add(1, Ordering::SeqCst);
                format!("Failed {name}: {}", error.title())
            }
        };
        self.set_status(status);
    }

    /// Enter the terminal state.
    pub fn finish(&self, outcome: JobOutcome) {
        let status = match &outcome {
            JobOutcome::Success => format!("Exported {} papers to Kindle", self.exported_items()),
            JobOutcome::PartialFailure(failures) => format!(
                "Exported {} papers, {} failed",
                self.exported_items(),
                failures.len()
            ),
            JobOutcome::Cancelled => format!("Cancelled after {} papers", self.exported_items()),
            JobOutcome::PreconditionFailed(error) => error.title().to_string(),
        };
        log::info!("Progress: Export finished ({}): {}", outcome.name(), status);

        self.store_status(status);
        *self.outcome.write().unwrap_or_else(|e| e.into_inner()) = Some(outcome.clone());
        self.running.store(false, Ordering::SeqCst);

        self.notify_status();
        self.publish(ExportEvent::Ended(outcome));
        if let Some(delegate) = self.current_delegate() {
            delegate.did_end_export(self);
        }
    }

    /// Prepare for another run. Subscribers and delegate are kept.
    pub fn reset(&self) {
        self.items_to_export.store(UNKNOWN_TOTAL, Ordering::SeqCst);
        self.exported_items.store(0, Ordering::SeqCst);
        self.skipped_items.store(0, Ordering::SeqCst);
        self.failed_items.store(0, Ordering::SeqCst);
        self.running.store(false, Ordering::SeqCst);
        self.cancel_flag.store(false, Ordering::SeqCst);
        self.store_status(String::new());
        *self.outcome.write().unwrap_or_else(|e| e.into_inner()) = None;
    }

    fn store_status(&self, status: String) {
        *self.status.write().unwrap_or_else(|e| e.into_inner()) = status;
    }

    fn current_delegate(&self) -> Option<Arc<dyn ExportDelegate>> {
        self.delegate.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn notify_status(&self) {
        self.publish(ExportEvent::StatusChanged {
            exported: self.exported_items(),
            total: self.items_to_export(),
            status: self.status_string(),
        });
        if let Some(delegate) = self.current_delegate() {
            delegate.update_status(self);
        }
    }

    fn publish(&self, event: ExportEvent) {
        let terminal = matches!(event, ExportEvent::Ended(_));
        // Senders are only used under this lock, so the reserved slot holds.
        let mut subscribers = self.subscribers.lock().unwrap_or_else(|e| e.into_inner());
        subscribers.retain(|sender| {
            if !terminal && sender.len() + 1 >= EVENT_CAPACITY {
                return true;
            }
            match sender.try_send(event.clone()) {
                Ok(()) | Err(TrySendError::Full(_)) => true,
                Err(TrySendError::Disconnected(_)) => false,
            }
        });
    }
}

fn serialize_error<S: serde::Serializer>(error: &ExporterError, serializer: S) -> Result<S::Ok, S::Error> {
    error.report().serialize(serializer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct CountingDelegate {
        began: AtomicUsize,
        updates: AtomicUsize,
        ended: AtomicUsize,
    }

    impl ExportDelegate for CountingDelegate {
        fn did_begin_export(&self, _progress: &ExportProgress) {
            self.began.fetch_add(1, Ordering::SeqCst);
        }
        fn update_status(&self, _progress: &ExportProgress) {
            self.updates.fetch_add(1, Ordering::SeqCst);
        }
        fn did_end_export(&self, progress: &ExportProgress) {
            assert!(!progress.is_running());
            assert!(progress.did_succeed().is_some());
            self.ended.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn copied(name: &str) -> TransferResult {
        TransferResult::Copied {
            destination: PathBuf::from(name),
            bytes: 1,
        }
    }

    #[test]
    fn total_is_unknown_until_fixed_and_then_stays() {
        let progress = ExportProgress::new();
        assert_eq!(progress.items_to_export(), None);
        assert!(progress.set_items_to_export(3));
        assert!(progress.set_items_to_export(3));
        assert!(!progress.set_items_to_export(5));
        assert_eq!(progress.items_to_export(), Some(3));
    }

    #[test]
    fn did_succeed_is_guarded_before_completion() {
        let progress = ExportProgress::new();
        assert_eq!(progress.did_succeed(), None);
        assert_eq!(progress.error(), None);
        progress.begin();
        assert_eq!(progress.did_succeed(), None);
        progress.finish(JobOutcome::Success);
        assert_eq!(progress.did_succeed(), Some(true));
    }

    #[test]
    fn results_update_counters_and_status() {
        let progress = ExportProgress::new();
        progress.set_items_to_export(3);
        progress.record_result("a.pdf", &copied("a"));
        assert_eq!(progress.status_string(), "Copied 1 of 3: a.pdf");
        progress.record_result(
            "b.pdf",
            &TransferResult::Skipped(SkipReason::AlreadyExists(PathBuf::from("b.pdf"))),
        );
        progress.record_result(
            "c.pdf",
            &TransferResult::Failed(ExporterError::InsufficientSpace {
                path: PathBuf::from("c.pdf"),
            }),
        );
        progress.record_skipped();

        assert_eq!(progress.exported_items(), 1);
        assert_eq!(progress.skipped_items(), 2);
        assert_eq!(progress.failed_items(), 1);
        assert_eq!(progress.status_string(), "Failed c.pdf: Kindle is full");
    }

    #[test]
    fn delegate_sees_the_lifecycle() {
        let progress = ExportProgress::new();
        let delegate = Arc::new(CountingDelegate::default());
        progress.set_delegate(Some(delegate.clone()));

        progress.begin();
        progress.begin();
        progress.set_items_to_export(1);
        progress.record_result("a.pdf", &copied("a"));
        progress.finish(JobOutcome::Success);

        assert_eq!(delegate.began.load(Ordering::SeqCst), 1);
        assert_eq!(delegate.ended.load(Ordering::SeqCst), 1);
        assert!(delegate.updates.load(Ordering::SeqCst) >= 3);
    }

    #[test]
    fn subscribers_receive_start_and_end() {
        let progress = ExportProgress::new();
        let events = progress.subscribe();

        progress.begin();
        progress.finish(JobOutcome::Cancelled);

        let received: Vec<ExportEvent> = events.try_iter().collect();
        assert_eq!(received.first(), Some(&ExportEvent::Started));
        assert_eq!(received.last(), Some(&ExportEvent::Ended(JobOutcome::Cancelled)));
    }

    #[test]
    fn slow_subscriber_still_receives_end() {
        let progress = ExportProgress::new();
        let events = progress.subscribe();

        progress.begin();
        for i in 0..(EVENT_CAPACITY * 2) {
            progress.set_status(format!("step {i}"));
        }
        progress.finish(JobOutcome::Success);

        let received: Vec<ExportEvent> = events.try_iter().collect();
        assert_eq!(received.len(), EVENT_CAPACITY);
        assert_eq!(received.first(), Some(&ExportEvent::Started));
        assert_eq!(received.last(), Some(&ExportEvent::Ended(JobOutcome::Success)));
    }

    #[test]
    fn dropped_subscribers_are_forgotten() {
        let progress = ExportProgress::new();
        drop(progress.subscribe());
        progress.set_status("hello");
        assert!(progress.subscribers.lock().unwrap().is_empty());
    }

    #[test]
    fn partial_failure_reports_summary() {
        let failures = vec![
            RecordFailure {
                source: PathBuf::from("a.pdf"),
                error: ExporterError::InsufficientSpace {
                    path: PathBuf::from("a.pdf"),
                },
            },
            RecordFailure {
                source: PathBuf::from("b.pdf"),
                error: ExporterError::InsufficientSpace {
                    path: PathBuf::from("b.pdf"),
                },
            },
        ];
        let report = JobOutcome::PartialFailure(failures).error_report().unwrap();
        assert_eq!(report.code, ErrorCode::InsufficientDiskSpace);
        assert_eq!(report.title, "Some papers could not be copied");
        assert!(report.description.starts_with("2 files"));
        assert_eq!(JobOutcome::Cancelled.error_report(), None);
    }

    #[test]
    fn reset_clears_run_state() {
        let progress = ExportProgress::new();
        progress.set_items_to_export(2);
        progress.record_result("a.pdf", &copied("a"));
        progress.request_cancel();
        progress.finish(JobOutcome::Cancelled);

        progress.reset();
        let snapshot = progress.snapshot();
        assert_eq!(snapshot.items_to_export, None);
        assert_eq!(snapshot.exported_items, 0);
        assert!(!snapshot.cancelled);
        assert_eq!(snapshot.outcome, None);
        assert_eq!(snapshot.status, "");
    }
}
