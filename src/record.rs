//! Records handed over by the host and the values derived from them.

use crate::error::ExporterError;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use url::Url;

/// Top-level categories of a record collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordCategory {
    Papers,
    Authors,
    Journals,
    Keywords,
    PublicationTypes,
}

impl RecordCategory {
    pub const ALL: [RecordCategory; 5] = [
        RecordCategory::Papers,
        RecordCategory::Authors,
        RecordCategory::Journals,
        RecordCategory::Keywords,
        RecordCategory::PublicationTypes,
    ];

    /// Key of this category in the collection.
    pub fn key(self) -> &'static str {
        match self {
            RecordCategory::Papers => "papers",
            RecordCategory::Authors => "authors",
            RecordCategory::Journals => "journals",
            RecordCategory::Keywords => "keywords",
            RecordCategory::PublicationTypes => "publicationTypes",
        }
    }

    /// Field a record of this category must carry to be usable.
    pub fn required_field(self) -> &'static str {
        match self {
            RecordCategory::Papers => "path",
            RecordCategory::Authors => "lastName",
            RecordCategory::Journals | RecordCategory::Keywords | RecordCategory::PublicationTypes => {
                "name"
            }
        }
    }
}

impl FromStr for RecordCategory {
    type Err = ExporterError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        RecordCategory::ALL
            .into_iter()
            .find(|category| category.key().eq_ignore_ascii_case(s))
            .ok_or_else(|| ExporterError::Parse(format!("unknown record category '{s}'")))
    }
}

/// Key under which the host stores the destination picked in its save panel.
const URL_KEY: &str = "url";

/// The record set supplied by the host: arrays of key/value maps keyed by
/// category, plus an optional destination `url`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordCollection {
    root: Map<String, Value>,
}

impl RecordCollection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json_str(text: &str) -> std::result::Result<Self, ExporterError> {
        match serde_json::from_str::<Value>(text) {
            Ok(Value::Object(root)) => Ok(Self { root }),
            Ok(_) => Err(ExporterError::Parse(
                "export records must be a JSON object keyed by category".to_string(),
            )),
            Err(e) => Err(ExporterError::Parse(e.to_string())),
        }
    }

    /// Read a collection from a JSON file.
    pub fn from_path(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .context(format!("Failed to read export records: {:?}", path))?;
        let collection = Self::from_json_str(&text)
            .context(format!("Failed to parse export records: {:?}", path))?;
        Ok(collection)
    }

    /// Records of one category, in host order. Missing categories are empty.
    pub fn category(&self, category: RecordCategory) -> &[Value] {
        match self.root.get(category.key()) {
            Some(Value::Array(items)) => items,
            _ => &[],
        }
    }

    pub fn push(&mut self, category: RecordCategory, record: Value) {
        let entry = self
            .root
            .entry(category.key().to_string())
            .or_insert_with(|| Value::Array(Vec::new()));
        if !entry.is_array() {
            *entry = Value::Array(Vec::new());
        }
        if let Value::Array(items) = entry {
            items.push(record);
        }
    }

    pub fn set_destination_url(&mut self, url: &str) {
        self.root
            .insert(URL_KEY.to_string(), Value::String(url.to_string()));
    }

    /// Destination chosen by the host, if it supplied one.
    pub fn destination(&self) -> Option<PathBuf> {
        self.root
            .get(URL_KEY)
            .and_then(Value::as_str)
            .and_then(path_from_location)
    }
}

/// Turn a `file://` URL or a plain path into a filesystem path.
///
/// URLs with any other scheme yield `None`.
pub fn path_from_location(location: &str) -> Option<PathBuf> {
    let trimmed = location.trim();
    if trimmed.is_empty() {
        return None;
    }
    match Url::parse(trimmed) {
        Ok(url) if url.scheme() == "file" => url.to_file_path().ok(),
        // Single-letter schemes are Windows drive letters.
        Ok(url) if url.scheme().len() > 1 => None,
        _ => Some(PathBuf::from(trimmed)),
    }
}

/// One file to transfer. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportRecord {
    index: usize,
    source: PathBuf,
    title: Option<String>,
    uri: Option<String>,
}

impl ExportRecord {
    pub fn new(source: impl Into<PathBuf>) -> Self {
        Self {
            index: 0,
            source: source.into(),
            title: None,
            uri: None,
        }
    }

    pub fn with_index(mut self, index: usize) -> Self {
        self.index = index;
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_uri(mut self, uri: impl Into<String>) -> Self {
        self.uri = Some(uri.into());
        self
    }

    /// Position of the record in the host collection.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    pub fn uri(&self) -> Option<&str> {
        self.uri.as_deref()
    }

    /// Name used in status messages.
    pub fn display_name(&self) -> String {
        match (&self.title, self.source.file_name()) {
            (Some(title), _) => title.clone(),
            (None, Some(name)) => name.to_string_lossy().into_owned(),
            (None, None) => self.source.display().to_string(),
        }
    }
}

/// Which part of the library the host hands over. Numeric values match the
/// host's export limit constants.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(i32)]
pub enum ExportScope {
    #[default]
    AllItems = 0,
    CurrentGroup = 1,
    CurrentSelection = 2,
}

impl ExportScope {
    pub fn as_limit(self) -> i32 {
        self as i32
    }

    pub fn from_limit(limit: i32) -> Option<Self> {
        match limit {
            0 => Some(ExportScope::AllItems),
            1 => Some(ExportScope::CurrentGroup),
            2 => Some(ExportScope::CurrentSelection),
            _ => None,
        }
    }
}

impl FromStr for ExportScope {
    type Err = ExporterError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "all" | "library" | "all_items" => Ok(ExportScope::AllItems),
            "group" | "current_group" => Ok(ExportScope::CurrentGroup),
            "selection" | "current_selection" => Ok(ExportScope::CurrentSelection),
            other => Err(ExporterError::Parse(format!("unknown export scope '{other}'"))),
        }
    }
}

impl fmt::Display for ExportScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExportScope::AllItems => "library",
            ExportScope::CurrentGroup => "group",
            ExportScope::CurrentSelection => "selection",
        };
        f.write_str(name)
    }
}

/// What to do when the destination file already exists.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverwritePolicy {
    Overwrite,
    #[default]
    SkipExisting,
    FailOnCollision,
}

impl FromStr for OverwritePolicy {
    type Err = ExporterError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "overwrite" => Ok(OverwritePolicy::Overwrite),
            "skip" | "skip_existing" => Ok(OverwritePolicy::SkipExisting),
            "fail" | "fail_on_collision" => Ok(OverwritePolicy::FailOnCollision),
            other => Err(ExporterError::Parse(format!(
                "unknown overwrite policy '{other}'"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_category_keyed_collection() {
        let collection = RecordCollection::from_json_str(
            r#"{
                "papers": [{"path": "/tmp/a.pdf", "title": "A"}, {"path": "/tmp/b.pdf"}],
                "authors": [{"lastName": "Griekspoor"}],
                "url": "file:///Volumes/Kindle"
            }"#,
        )
        .unwrap();

        assert_eq!(collection.category(RecordCategory::Papers).len(), 2);
        assert_eq!(collection.category(RecordCategory::Authors).len(), 1);
        assert!(collection.category(RecordCategory::Keywords).is_empty());
        assert_eq!(
            collection.destination(),
            Some(PathBuf::from("/Volumes/Kindle"))
        );
    }

    #[test]
    fn rejects_non_object_collection() {
        let err = RecordCollection::from_json_str("[1, 2]").unwrap_err();
        assert!(matches!(err, ExporterError::Parse(_)));
        assert!(RecordCollection::from_json_str("{not json").is_err());
    }

    #[test]
    fn push_creates_category() {
        let mut collection = RecordCollection::new();
        collection.push(RecordCategory::Papers, json!({"path": "/x.pdf"}));
        collection.push(RecordCategory::Papers, json!({"path": "/y.pdf"}));
        assert_eq!(collection.category(RecordCategory::Papers).len(), 2);
        assert_eq!(collection.destination(), None);
    }

    #[test]
    fn locations_accept_file_urls() {
        assert_eq!(
            path_from_location("file://localhost/Volumes/My%20Kindle/"),
            Some(PathBuf::from("/Volumes/My Kindle/"))
        );
        assert_eq!(path_from_location("/mnt/kindle"), Some(PathBuf::from("/mnt/kindle")));
        assert_eq!(path_from_location("  "), None);
        assert_eq!(path_from_location("https://example.org/paper.pdf"), None);
    }

    #[cfg(unix)]
    #[test]
    fn file_urls_are_percent_decoded() {
        assert_eq!(
            path_from_location("file:///Users/x/Papers/M%C3%BCller%202007.pdf"),
            Some(PathBuf::from("/Users/x/Papers/Müller 2007.pdf"))
        );
        assert_eq!(
            path_from_location("file:///Users/x/100%2520.pdf"),
            Some(PathBuf::from("/Users/x/100%20.pdf"))
        );
        // Plain paths are taken literally.
        assert_eq!(
            path_from_location("/Users/x/100%20.pdf"),
            Some(PathBuf::from("/Users/x/100%20.pdf"))
        );
    }

    #[test]
    fn scope_matches_host_limits() {
        assert_eq!(ExportScope::from_limit(0), Some(ExportScope::AllItems));
        assert_eq!(ExportScope::from_limit(2), Some(ExportScope::CurrentSelection));
        assert_eq!(ExportScope::from_limit(3), None);
        assert_eq!(ExportScope::CurrentGroup.as_limit(), 1);
        assert_eq!("selection".parse::<ExportScope>().unwrap(), ExportScope::CurrentSelection);
    }

    #[test]
    fn policy_and_category_parse() {
        assert_eq!("skip".parse::<OverwritePolicy>().unwrap(), OverwritePolicy::SkipExisting);
        assert_eq!("Overwrite".parse::<OverwritePolicy>().unwrap(), OverwritePolicy::Overwrite);
        assert!("replace".parse::<OverwritePolicy>().is_err());
        assert_eq!(
            "publicationtypes".parse::<RecordCategory>().unwrap(),
            RecordCategory::PublicationTypes
        );
        assert_eq!(RecordCategory::Authors.required_field(), "lastName");
    }

    #[test]
    fn display_name_prefers_title() {
        let record = ExportRecord::new("/papers/1550875.pdf");
        assert_eq!(record.display_name(), "1550875.pdf");
        let record = record.with_title("Human MicroRNA targets");
        assert_eq!(record.display_name(), "Human MicroRNA targets");
    }
}
