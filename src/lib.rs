//! Kindle Exporter Core Library
//!
//! Exporter plugin for the Papers reference manager that copies the PDFs of a
//! library, group or selection onto a mounted Kindle.
//!
//! # Architecture
//!
//! This library is designed to be loaded by the Papers host, either through
//! the [`plugin::ExporterPlugin`] trait from Rust or through the C ABI in
//! [`ffi`]. A run flows through four stages:
//!
//! ## Record Extraction (`extractor` module)
//! - `select_records()` - Pick the exportable papers from the host records
//!
//! ## Destination Resolution (`destination` module)
//! - `check_destination_root()` - Verify the device is mounted and writable
//! - `DestinationResolver` - Map records to `documents/Papers/<file>`
//!
//! ## Transfer (`transfer` module)
//! - `run_job()` - Copy files sequentially or on a worker pool, cancellable
//!
//! ## Progress Reporting (`progress` module)
//! - `ExportProgress` - Pollable counters, status text and terminal outcome
//! - `ExportDelegate` - Begin/status/end callbacks for the host
//!
//! After copying, [`exporter::KindleExporter`] registers the documents in the
//! device's collection index (`collections` module).

pub mod collections;
pub mod config;
pub mod destination;
pub mod error;
pub mod exporter;
pub mod extractor;
pub mod ffi;
pub mod logging;
pub mod plugin;
pub mod progress;
pub mod record;
pub mod transfer;

pub use config::ExporterConfig;
pub use destination::{DestinationResolver, DeviceLayout, Resolution, SkipReason};
pub use error::{ErrorCode, ErrorReport, ExporterError};
pub use exporter::KindleExporter;
pub use extractor::{select_records, Selection};
pub use plugin::ExporterPlugin;
pub use progress::{ExportDelegate, ExportEvent, ExportProgress, JobOutcome, TransferResult};
pub use record::{ExportRecord, ExportScope, OverwritePolicy, RecordCategory, RecordCollection};
pub use transfer::{run_job, JobReport, TransferJob, TransferOptions};
