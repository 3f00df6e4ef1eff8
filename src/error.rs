//! Error taxonomy shared by the export pipeline and the host-facing surface.
//!
//! Every [`ExporterError`] maps onto a stable numeric [`ErrorCode`] and a
//! `title` / `description` pair, the two keys a Papers host expects to find on
//! an exporter error before showing it as `"title: description"`.

use serde::Serialize;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Domain every exporter error is reported under.
pub const ERROR_DOMAIN: &str = "Papers Exporter Error";

/// Numeric error codes understood by the host application.
///
/// The 1 series covers local file/data problems, the 100 series networking
/// problems. Values are fixed and must not be renumbered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[repr(i32)]
pub enum ErrorCode {
    Unknown = 0,
    DestinationNotWritable = 1,
    InsufficientDiskSpace = 2,
    DataParse = 3,
    FileWrite = 4,
    NoNetwork = 100,
    HostUnreachable = 101,
    NetworkTimeout = 102,
    ResponseFormat = 103,
    UrlOpen = 104,
}

impl ErrorCode {
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    pub fn from_i32(code: i32) -> Option<Self> {
        let code = match code {
            0 => ErrorCode::Unknown,
            1 => ErrorCode::DestinationNotWritable,
            2 => ErrorCode::InsufficientDiskSpace,
            3 => ErrorCode::DataParse,
            4 => ErrorCode::FileWrite,
            100 => ErrorCode::NoNetwork,
            101 => ErrorCode::HostUnreachable,
            102 => ErrorCode::NetworkTimeout,
            103 => ErrorCode::ResponseFormat,
            104 => ErrorCode::UrlOpen,
            _ => return None,
        };
        Some(code)
    }

    /// True for the 1 series (local file and data problems).
    pub fn is_local(self) -> bool {
        (1..=4).contains(&self.as_i32())
    }

    /// True for the 100 series (networking problems).
    pub fn is_network(self) -> bool {
        (100..=104).contains(&self.as_i32())
    }
}

/// Errors raised by the export pipeline.
///
/// Variants carry plain strings rather than source errors so results can be
/// cloned into progress snapshots and across worker threads.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExporterError {
    #[error("record {index} is malformed: {reason}")]
    MalformedRecord { index: usize, reason: String },

    #[error("record {index} duplicates an earlier record ({uri})")]
    DuplicateRecord { index: usize, uri: String },

    #[error("destination {path:?} is not usable: {reason}")]
    InvalidDestinationRoot { path: PathBuf, reason: String },

    #[error("destination {path:?} already exists")]
    DestinationConflict { path: PathBuf },

    #[error("not enough space on the device to write {path:?}")]
    InsufficientSpace { path: PathBuf },

    #[error("failed to write {path:?}: {message}")]
    WriteFailure { path: PathBuf, message: String },

    #[error("failed to read {path:?}: {message}")]
    SourceUnreadable { path: PathBuf, message: String },

    #[error("no records selected for export")]
    NoRecordsSelected,

    #[error("could not parse export records: {0}")]
    Parse(String),

    #[error("an export is already running")]
    AlreadyRunning,

    #[error("internal exporter error: {0}")]
    Internal(String),
}

impl ExporterError {
    /// Classify an I/O error hit while writing `path`.
    pub fn from_write_io(path: &Path, err: &io::Error) -> Self {
        if is_out_of_space(err) {
            ExporterError::InsufficientSpace {
                path: path.to_path_buf(),
            }
        } else {
            ExporterError::WriteFailure {
                path: path.to_path_buf(),
                message: err.to_string(),
            }
        }
    }

    pub fn from_read_io(path: &Path, err: &io::Error) -> Self {
        ExporterError::SourceUnreadable {
            path: path.to_path_buf(),
            message: err.to_string(),
        }
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            ExporterError::MalformedRecord { .. }
            | ExporterError::DuplicateRecord { .. }
            | ExporterError::NoRecordsSelected
            | ExporterError::Parse(_) => ErrorCode::DataParse,
            ExporterError::InvalidDestinationRoot { .. } => ErrorCode::DestinationNotWritable,
            ExporterError::InsufficientSpace { .. } => ErrorCode::InsufficientDiskSpace,
            ExporterError::DestinationConflict { .. }
            | ExporterError::WriteFailure { .. }
            | ExporterError::SourceUnreadable { .. } => ErrorCode::FileWrite,
            ExporterError::AlreadyRunning | ExporterError::Internal(_) => ErrorCode::Unknown,
        }
    }

    /// Short, user-facing headline.
    pub fn title(&self) -> &'static str {
        match self {
            ExporterError::MalformedRecord { .. } => "Incomplete paper record",
            ExporterError::DuplicateRecord { .. } => "Duplicate paper record",
            ExporterError::InvalidDestinationRoot { .. } => "Kindle not writable",
            ExporterError::DestinationConflict { .. } => "File already on Kindle",
            ExporterError::InsufficientSpace { .. } => "Kindle is full",
            ExporterError::WriteFailure { .. } => "Could not write file",
            ExporterError::SourceUnreadable { .. } => "Could not read PDF",
            ExporterError::NoRecordsSelected => "Nothing to export",
            ExporterError::Parse(_) => "Could not read export data",
            ExporterError::AlreadyRunning => "Export in progress",
            ExporterError::Internal(_) => "Export failed",
        }
    }

    /// Longer explanation, suitable for display under the title.
    pub fn description(&self) -> String {
        match self {
            ExporterError::InvalidDestinationRoot { path, reason } => format!(
                "The folder {} cannot be used as export destination ({reason}). Make sure your Kindle is connected and mounted.",
                path.display()
            ),
            ExporterError::InsufficientSpace { path } => format!(
                "There is not enough free space on the device to copy {}. Remove some documents from your Kindle and try again.",
                path.display()
            ),
            ExporterError::NoRecordsSelected => {
                "None of the selected papers has a PDF file attached.".to_string()
            }
            ExporterError::AlreadyRunning => {
                "Wait for the current export to finish or cancel it first.".to_string()
            }
            other => {
                let mut text = other.to_string();
                if let Some(first) = text.get(..1) {
                    let upper = first.to_uppercase();
                    text.replace_range(..1, &upper);
                }
                text.push('.');
                text
            }
        }
    }

    pub fn report(&self) -> ErrorReport {
        ErrorReport {
            domain: ERROR_DOMAIN,
            code: self.code(),
            title: self.title().to_string(),
            description: self.description(),
        }
    }
}

/// The host-facing shape of an error: domain, code and a two-part message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorReport {
    pub domain: &'static str,
    pub code: ErrorCode,
    pub title: String,
    pub description: String,
}

impl ErrorReport {
    pub fn new(code: ErrorCode, title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            domain: ERROR_DOMAIN,
            code,
            title: title.into(),
            description: description.into(),
        }
    }
}

impl fmt::Display for ErrorReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.title, self.description)
    }
}

fn is_out_of_space(err: &io::Error) -> bool {
    match err.raw_os_error() {
        // ENOSPC on Linux and macOS
        #[cfg(unix)]
        Some(28) => true,
        // ERROR_HANDLE_DISK_FULL, ERROR_DISK_FULL
        #[cfg(windows)]
        Some(39) | Some(112) => true,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_keep_their_numeric_groups() {
        assert_eq!(ErrorCode::Unknown.as_i32(), 0);
        assert_eq!(ErrorCode::DestinationNotWritable.as_i32(), 1);
        assert_eq!(ErrorCode::FileWrite.as_i32(), 4);
        assert_eq!(ErrorCode::UrlOpen.as_i32(), 104);

        assert!(ErrorCode::InsufficientDiskSpace.is_local());
        assert!(!ErrorCode::InsufficientDiskSpace.is_network());
        assert!(ErrorCode::NetworkTimeout.is_network());
        assert_eq!(ErrorCode::from_i32(101), Some(ErrorCode::HostUnreachable));
        assert_eq!(ErrorCode::from_i32(5), None);
    }

    #[test]
    fn variants_map_to_host_codes() {
        let root = ExporterError::InvalidDestinationRoot {
            path: PathBuf::from("/Volumes/Kindle"),
            reason: "does not exist".into(),
        };
        assert_eq!(root.code(), ErrorCode::DestinationNotWritable);

        let full = ExporterError::InsufficientSpace {
            path: PathBuf::from("a.pdf"),
        };
        assert_eq!(full.code(), ErrorCode::InsufficientDiskSpace);

        assert_eq!(
            ExporterError::MalformedRecord {
                index: 2,
                reason: "missing path".into()
            }
            .code(),
            ErrorCode::DataParse
        );
        assert_eq!(ExporterError::AlreadyRunning.code(), ErrorCode::Unknown);
    }

    #[test]
    fn report_carries_title_and_description() {
        let err = ExporterError::WriteFailure {
            path: PathBuf::from("paper.pdf"),
            message: "permission denied".into(),
        };
        let report = err.report();
        assert_eq!(report.domain, ERROR_DOMAIN);
        assert_eq!(report.title, "Could not write file");
        assert!(report.description.starts_with("Failed to write"));
        assert!(report.description.ends_with('.'));
        assert_eq!(
            report.to_string(),
            format!("{}: {}", report.title, report.description)
        );
    }

    #[cfg(unix)]
    #[test]
    fn enospc_is_classified_as_insufficient_space() {
        let err = io::Error::from_raw_os_error(28);
        let classified = ExporterError::from_write_io(Path::new("x.pdf"), &err);
        assert!(matches!(classified, ExporterError::InsufficientSpace { .. }));

        let other = io::Error::new(io::ErrorKind::PermissionDenied, "nope");
        let classified = ExporterError::from_write_io(Path::new("x.pdf"), &other);
        assert!(matches!(classified, ExporterError::WriteFailure { .. }));
    }
}
