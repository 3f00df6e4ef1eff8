use crate::error::ErrorReport;
use crate::progress::ExportDelegate;
use crate::record::{ExportScope, RecordCollection};
use std::sync::Arc;

/// Lifecycle contract between a Papers host and an exporter plugin.
///
/// A host drives a plugin through one cycle per export:
///
/// 1. `ready_to_perform_export`, reading `export_preparation_error` on `false`
/// 2. `perform_export_of_records`, which returns at once; the plugin calls
///    the delegate's begin, status and end callbacks from its own thread
/// 3. `successful_completion`, reading `export_completion_error` on `false`
/// 4. `perform_cleanup` before the next cycle
pub trait ExporterPlugin {
    fn menu_titles(&self) -> Vec<String>;

    /// Whether the host should ask the user for a destination first.
    fn should_show_save_panel(&self) -> bool;

    fn allowed_file_types(&self) -> Vec<String>;

    /// Record categories the plugin wants to receive.
    fn exportable_types(&self) -> Vec<String>;

    fn export_limit(&self) -> ExportScope;

    fn requires_internet_connection(&self) -> bool;

    fn set_delegate(&self, delegate: Option<Arc<dyn ExportDelegate>>);

    fn ready_to_perform_export(&self) -> bool;

    fn export_preparation_error(&self) -> Option<ErrorReport>;

    fn can_cancel_export(&self) -> bool;

    /// Start exporting `records`. The destination is taken from the
    /// collection's `url` entry when present.
    fn perform_export_of_records(&self, records: RecordCollection);

    fn cancel_export(&self);

    fn items_to_export(&self) -> Option<u64>;

    fn exported_items(&self) -> u64;

    fn status_string(&self) -> String;

    fn successful_completion(&self) -> bool;

    fn export_completion_error(&self) -> Option<ErrorReport>;

    fn perform_cleanup(&self);
}
