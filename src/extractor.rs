//! Selection of exportable records from a host collection.
//!
//! The host narrows the collection to the active group or selection before
//! handing it over, so extraction only has to walk the `papers` array, keep
//! host order, and weed out records that cannot be exported:
//! - records without a usable `path` are malformed
//! - records whose `uri` was already seen are duplicates
//!
//! Rejected records never reach the transfer engine; callers count them as
//! skips.

use crate::error::ExporterError;
use crate::record::{path_from_location, ExportRecord, ExportScope, RecordCategory, RecordCollection};
use serde_json::Value;
use std::collections::HashSet;

/// A record that was left out of the export, with the reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedRecord {
    pub index: usize,
    pub error: ExporterError,
}

/// Outcome of [`select_records`].
#[derive(Debug, Clone, Default)]
pub struct Selection {
    pub scope: ExportScope,
    pub records: Vec<ExportRecord>,
    pub rejected: Vec<RejectedRecord>,
}

impl Selection {
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Select the records to export for `scope`, in host order.
pub fn select_records(collection: &RecordCollection, scope: ExportScope) -> Selection {
    let papers = collection.category(RecordCategory::Papers);
    log::debug!(
        "Extractor: Selecting from {} paper record(s) for scope '{}'",
        papers.len(),
        scope
    );

    let mut selection = Selection {
        scope,
        ..Selection::default()
    };
    let mut seen_uris = HashSet::new();

    for (index, value) in papers.iter().enumerate() {
        let outcome = extract_record(index, value).and_then(|record| {
            let duplicate = record.uri().map(str::to_string).filter(|uri| !seen_uris.insert(uri.clone()));
            match duplicate {
                Some(uri) => Err(ExporterError::DuplicateRecord { index, uri }),
                None => Ok(record),
            }
        });

        match outcome {
            Ok(record) => selection.records.push(record),
            Err(error) => {
                log::warn!("Extractor: Skipping paper record {index}: {error}");
                selection.rejected.push(RejectedRecord { index, error });
            }
        }
    }

    log::info!(
        "Extractor: {} record(s) selected, {} rejected",
        selection.records.len(),
        selection.rejected.len()
    );
    selection
}

/// Build an [`ExportRecord`] from one `papers` map.
pub fn extract_record(index: usize, value: &Value) -> Result<ExportRecord, ExporterError> {
    let malformed = |reason: &str| ExporterError::MalformedRecord {
        index,
        reason: reason.to_string(),
    };

    let map = value
        .as_object()
        .ok_or_else(|| malformed("record is not a key/value map"))?;

    let field = RecordCategory::Papers.required_field();
    let source = match map.get(field) {
        None | Some(Value::Null) => return Err(malformed("missing required field 'path'")),
        Some(Value::String(location)) => path_from_location(location)
            .ok_or_else(|| malformed("field 'path' is empty"))?,
        Some(_) => return Err(malformed("field 'path' is not a string")),
    };
    if source.file_name().is_none() {
        return Err(malformed("field 'path' does not name a file"));
    }

    let mut record = ExportRecord::new(source).with_index(index);
    if let Some(title) = non_empty_str(map.get("title")) {
        record = record.with_title(title);
    }
    if let Some(uri) = non_empty_str(map.get("uri")) {
        record = record.with_uri(uri);
    }
    Ok(record)
}

fn non_empty_str(value: Option<&Value>) -> Option<&str> {
    value
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::path::Path;

    fn collection(papers: Value) -> RecordCollection {
        let mut collection = RecordCollection::new();
        if let Value::Array(items) = papers {
            for item in items {
                collection.push(RecordCategory::Papers, item);
            }
        }
        collection
    }

    #[test]
    fn keeps_host_order() {
        let input = collection(json!([
            {"path": "/p/c.pdf"},
            {"path": "/p/a.pdf"},
            {"path": "/p/b.pdf"}
        ]));
        let selection = select_records(&input, ExportScope::AllItems);
        let sources: Vec<&Path> = selection.records.iter().map(|r| r.source()).collect();
        assert_eq!(
            sources,
            vec![Path::new("/p/c.pdf"), Path::new("/p/a.pdf"), Path::new("/p/b.pdf")]
        );
        assert!(selection.rejected.is_empty());
    }

    #[test]
    fn missing_path_is_rejected_not_fatal() {
        let input = collection(json!([
            {"title": "No PDF attached"},
            {"path": ""},
            {"path": 42},
            {"path": "/p/ok.pdf", "title": "Fine"}
        ]));
        let selection = select_records(&input, ExportScope::CurrentSelection);

        assert_eq!(selection.scope, ExportScope::CurrentSelection);
        assert_eq!(selection.records.len(), 1);
        assert_eq!(selection.records[0].index(), 3);
        assert_eq!(selection.records[0].title(), Some("Fine"));

        let indices: Vec<usize> = selection.rejected.iter().map(|r| r.index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
        assert!(selection
            .rejected
            .iter()
            .all(|r| matches!(r.error, ExporterError::MalformedRecord { .. })));
    }

    #[test]
    fn paths_without_file_name_are_rejected() {
        let input = collection(json!([
            {"path": "/"},
            {"path": "/p/drafts/.."},
            {"path": "file:///"},
            {"path": "/p/ok.pdf"}
        ]));
        let selection = select_records(&input, ExportScope::AllItems);

        assert_eq!(selection.records.len(), 1);
        assert_eq!(selection.records[0].source(), Path::new("/p/ok.pdf"));
        let indices: Vec<usize> = selection.rejected.iter().map(|r| r.index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
        assert!(selection
            .rejected
            .iter()
            .all(|r| matches!(r.error, ExporterError::MalformedRecord { .. })));
    }

    #[test]
    fn duplicate_uris_are_rejected() {
        let input = collection(json!([
            {"path": "/p/a.pdf", "uri": "x-coredata://lib/Paper/p1"},
            {"path": "/p/a-copy.pdf", "uri": "x-coredata://lib/Paper/p1"},
            {"path": "/p/b.pdf", "uri": "x-coredata://lib/Paper/p2"}
        ]));
        let selection = select_records(&input, ExportScope::AllItems);
        assert_eq!(selection.records.len(), 2);
        assert_eq!(
            selection.rejected,
            vec![RejectedRecord {
                index: 1,
                error: ExporterError::DuplicateRecord {
                    index: 1,
                    uri: "x-coredata://lib/Paper/p1".into()
                }
            }]
        );
    }

    #[test]
    fn accepts_file_url_paths() {
        let record = extract_record(0, &json!({"path": "file:///Users/griek/Papers/1550875.pdf"}))
            .unwrap();
        assert_eq!(record.source(), Path::new("/Users/griek/Papers/1550875.pdf"));
        assert_eq!(record.uri(), None);
    }

    #[test]
    fn empty_collection_selects_nothing() {
        let selection = select_records(&RecordCollection::new(), ExportScope::AllItems);
        assert!(selection.is_empty());
        assert!(selection.rejected.is_empty());
    }
}
