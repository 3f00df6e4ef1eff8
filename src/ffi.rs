//! FFI (Foreign Function Interface) bindings for the Papers host.
//!
//! This module exposes the Kindle exporter through C-compatible functions so
//! the host bundle can drive an export without knowing any Rust types.
//!
//! # Memory Management
//!
//! - Rust allocates the exporter handle and every returned string
//! - The calling code MUST release them with `kindle_exporter_free` and
//!   `kindle_exporter_free_string`
//! - Strings are null-terminated UTF-8
//!
//! # Usage from the host
//!
//! ```c
//! KindleExporter *exporter = kindle_exporter_new(NULL);
//! if (kindle_exporter_ready(exporter)) {
//!     kindle_exporter_perform_export(exporter, records_json, "/Volumes/Kindle");
//!     while (kindle_exporter_is_running(exporter)) { /* poll progress */ }
//! }
//! kindle_exporter_free(exporter);
//! ```

use crate::config::ExporterConfig;
use crate::error::ErrorReport;
use crate::exporter::KindleExporter;
use crate::logging;
use crate::plugin::ExporterPlugin;
use crate::record::{path_from_location, RecordCollection};
use std::ffi::{CStr, CString};
use std::os::raw::{c_char, c_int, c_longlong};
use std::path::Path;
use std::ptr;

// ============================================================================
// Result Codes
// ============================================================================

/// Result code for calls that can fail.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CResultCode {
    Success = 0,
    Error = 1,
    InvalidArgument = 2,
    AlreadyRunning = 3,
}

// ============================================================================
// Lifecycle
// ============================================================================

/// Create an exporter. `config_path` may be null for the default settings.
/// Returns null if the config file cannot be loaded.
/// Caller MUST call kindle_exporter_free() when done.
#[no_mangle]
pub extern "C" fn kindle_exporter_new(config_path: *const c_char) -> *mut KindleExporter {
    if let Err(e) = logging::init(log::LevelFilter::Info, None) {
        eprintln!("Error initializing logging: {}", e);
    }

    let config = if config_path.is_null() {
        ExporterConfig::default()
    } else {
        let path = match unsafe { c_str_to_str(config_path) } {
            Some(path) => path,
            None => return ptr::null_mut(),
        };
        match ExporterConfig::load(Path::new(path)) {
            Ok(config) => config,
            Err(e) => {
                log::error!("FFI: Error loading config: {:#}", e);
                return ptr::null_mut();
            }
        }
    };

    Box::into_raw(Box::new(KindleExporter::new(config)))
}

/// Free an exporter. A running export is cancelled first.
#[no_mangle]
pub extern "C" fn kindle_exporter_free(exporter: *mut KindleExporter) {
    if !exporter.is_null() {
        unsafe {
            let _ = Box::from_raw(exporter);
        }
    }
}

/// Returns 1 if the exporter can start, 0 otherwise (see
/// kindle_exporter_preparation_error_*).
#[no_mangle]
pub extern "C" fn kindle_exporter_ready(exporter: *const KindleExporter) -> c_int {
    match unsafe { exporter.as_ref() } {
        Some(exporter) => exporter.ready_to_perform_export() as c_int,
        None => 0,
    }
}

/// Start exporting the JSON record collection `records_json` to `destination`.
/// `destination` may be null to use the collection's `url` or the configured
/// device root. Returns immediately.
#[no_mangle]
pub extern "C" fn kindle_exporter_perform_export(
    exporter: *const KindleExporter,
    records_json: *const c_char,
    destination: *const c_char,
) -> CResultCode {
    let exporter = match unsafe { exporter.as_ref() } {
        Some(exporter) => exporter,
        None => return CResultCode::InvalidArgument,
    };
    let json = match unsafe { c_str_to_str(records_json) } {
        Some(json) => json,
        None => return CResultCode::InvalidArgument,
    };
    let destination = if destination.is_null() {
        None
    } else {
        match unsafe { c_str_to_str(destination) } {
            Some(location) => path_from_location(location),
            None => return CResultCode::InvalidArgument,
        }
    };

    let records = match RecordCollection::from_json_str(json) {
        Ok(records) => records,
        Err(e) => {
            log::error!("FFI: Error parsing records: {}", e);
            return CResultCode::InvalidArgument;
        }
    };

    match exporter.perform_export(records, destination) {
        Ok(()) => CResultCode::Success,
        Err(crate::error::ExporterError::AlreadyRunning) => CResultCode::AlreadyRunning,
        Err(e) => {
            log::error!("FFI: Error starting export: {}", e);
            CResultCode::Error
        }
    }
}

/// Request cancellation of the running export.
#[no_mangle]
pub extern "C" fn kindle_exporter_cancel(exporter: *const KindleExporter) {
    if let Some(exporter) = unsafe { exporter.as_ref() } {
        exporter.cancel_export();
    }
}

/// Block until the running export has finished.
#[no_mangle]
pub extern "C" fn kindle_exporter_wait(exporter: *const KindleExporter) {
    if let Some(exporter) = unsafe { exporter.as_ref() } {
        exporter.wait();
    }
}

/// Reset the exporter for the next export.
#[no_mangle]
pub extern "C" fn kindle_exporter_cleanup(exporter: *const KindleExporter) {
    if let Some(exporter) = unsafe { exporter.as_ref() } {
        exporter.perform_cleanup();
    }
}

// ============================================================================
// Progress
// ============================================================================

/// Total number of items, or -1 while unknown.
#[no_mangle]
pub extern "C" fn kindle_exporter_items_to_export(exporter: *const KindleExporter) -> c_longlong {
    match unsafe { exporter.as_ref() } {
        Some(exporter) => exporter
            .items_to_export()
            .map(|total| total.min(c_longlong::MAX as u64) as c_longlong)
            .unwrap_or(-1),
        None => -1,
    }
}

#[no_mangle]
pub extern "C" fn kindle_exporter_exported_items(exporter: *const KindleExporter) -> c_longlong {
    match unsafe { exporter.as_ref() } {
        Some(exporter) => exporter.exported_items().min(c_longlong::MAX as u64) as c_longlong,
        None => 0,
    }
}

#[no_mangle]
pub extern "C" fn kindle_exporter_is_running(exporter: *const KindleExporter) -> c_int {
    match unsafe { exporter.as_ref() } {
        Some(exporter) => exporter.progress().is_running() as c_int,
        None => 0,
    }
}

/// Current status text. Caller MUST call kindle_exporter_free_string() when done.
#[no_mangle]
pub extern "C" fn kindle_exporter_status_string(exporter: *const KindleExporter) -> *mut c_char {
    match unsafe { exporter.as_ref() } {
        Some(exporter) => string_to_c_char(&exporter.status_string()),
        None => ptr::null_mut(),
    }
}

/// Progress as a JSON document. Caller MUST call kindle_exporter_free_string().
#[no_mangle]
pub extern "C" fn kindle_exporter_progress_json(exporter: *const KindleExporter) -> *mut c_char {
    let exporter = match unsafe { exporter.as_ref() } {
        Some(exporter) => exporter,
        None => return ptr::null_mut(),
    };
    match serde_json::to_string(&exporter.progress().snapshot()) {
        Ok(json) => string_to_c_char(&json),
        Err(e) => {
            log::error!("FFI: Error serializing progress: {}", e);
            ptr::null_mut()
        }
    }
}

// ============================================================================
// Completion
// ============================================================================

/// 1 on success, 0 on failure, -1 while the export has not finished.
#[no_mangle]
pub extern "C" fn kindle_exporter_successful_completion(exporter: *const KindleExporter) -> c_int {
    match unsafe { exporter.as_ref() }.and_then(|e| e.progress().did_succeed()) {
        Some(true) => 1,
        Some(false) => 0,
        None => -1,
    }
}

/// Error code of the completion error, or -1 when there is none.
#[no_mangle]
pub extern "C" fn kindle_exporter_completion_error_code(exporter: *const KindleExporter) -> c_int {
    completion_error(exporter)
        .map(|report| report.code.as_i32())
        .unwrap_or(-1)
}

/// Caller MUST call kindle_exporter_free_string() when done.
#[no_mangle]
pub extern "C" fn kindle_exporter_completion_error_title(exporter: *const KindleExporter) -> *mut c_char {
    completion_error(exporter)
        .map(|report| string_to_c_char(&report.title))
        .unwrap_or(ptr::null_mut())
}

/// Caller MUST call kindle_exporter_free_string() when done.
#[no_mangle]
pub extern "C" fn kindle_exporter_completion_error_description(
    exporter: *const KindleExporter,
) -> *mut c_char {
    completion_error(exporter)
        .map(|report| string_to_c_char(&report.description))
        .unwrap_or(ptr::null_mut())
}

/// Error code of the preparation error, or -1 when there is none.
#[no_mangle]
pub extern "C" fn kindle_exporter_preparation_error_code(exporter: *const KindleExporter) -> c_int {
    preparation_error(exporter)
        .map(|report| report.code.as_i32())
        .unwrap_or(-1)
}

/// Caller MUST call kindle_exporter_free_string() when done.
#[no_mangle]
pub extern "C" fn kindle_exporter_preparation_error_message(
    exporter: *const KindleExporter,
) -> *mut c_char {
    preparation_error(exporter)
        .map(|report| string_to_c_char(&report.to_string()))
        .unwrap_or(ptr::null_mut())
}

// ============================================================================
// String Management
// ============================================================================

/// Free a string returned by FFI functions.
#[no_mangle]
pub extern "C" fn kindle_exporter_free_string(s: *mut c_char) {
    free_c_char(s);
}

// ============================================================================
// Helper Functions
// ============================================================================

fn completion_error(exporter: *const KindleExporter) -> Option<ErrorReport> {
    unsafe { exporter.as_ref() }.and_then(|e| e.export_completion_error())
}

fn preparation_error(exporter: *const KindleExporter) -> Option<ErrorReport> {
    unsafe { exporter.as_ref() }.and_then(|e| e.export_preparation_error())
}

/// # Safety
/// `s` must be null or point to a null-terminated string.
unsafe fn c_str_to_str<'a>(s: *const c_char) -> Option<&'a str> {
    if s.is_null() {
        return None;
    }
    CStr::from_ptr(s).to_str().ok()
}

fn string_to_c_char(s: &str) -> *mut c_char {
    match CString::new(s) {
        Ok(c_str) => c_str.into_raw(),
        Err(_) => ptr::null_mut(),
    }
}

fn free_c_char(s: *mut c_char) {
    if !s.is_null() {
        unsafe {
            let _ = CString::from_raw(s);
        }
    }
}
