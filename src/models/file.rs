use chrono::serde::{ts_microseconds, ts_microseconds_option};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Metadata;

pub(crate) const FILENAME: &str = "filename";
pub(crate) const STATUS: &str = "status";
pub(crate) const LENGTH: &str = "length";
pub(crate) const FINISHED_AT: &str = "finishedAt";
pub(crate) const DELETED_AT: &str = "deletedAt";
pub(crate) const SHA256: &str = "sha256";
pub(crate) const METADATA: &str = "metadata";

/// Visibility state of a file.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum FileStatus {
    /// Upload in progress (or abandoned). Hidden from name lookups.
    Incomplete,
    Complete,
    /// Soft-deleted. Still reachable by id.
    Deleted,
}

impl FileStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileStatus::Incomplete => "Incomplete",
            FileStatus::Complete => "Complete",
            FileStatus::Deleted => "Deleted",
        }
    }
}

/// Descriptor of one stored file.
///
/// `length` and `sha256` are meaningful once the status has reached
/// [`FileStatus::Complete`]; they are written once, when the upload closes.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FileRecord {
    /// Assigned by the store on insert.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,

    /// Not unique: several records sharing a name are revisions.
    pub filename: String,

    pub status: FileStatus,

    #[serde(default)]
    pub length: u64,

    pub chunk_size: usize,

    #[serde(default, with = "ts_microseconds_option")]
    pub finished_at: Option<DateTime<Utc>>,

    #[serde(with = "ts_microseconds")]
    pub started_at: DateTime<Utc>,

    #[serde(default, with = "ts_microseconds_option")]
    pub deleted_at: Option<DateTime<Utc>>,

    /// Lowercase hex SHA-256 of the content.
    #[serde(default)]
    pub sha256: String,

    #[serde(default)]
    pub metadata: Metadata,
}

impl FileRecord {
    pub(crate) fn incomplete(
        filename: impl Into<String>,
        chunk_size: usize,
        started_at: DateTime<Utc>,
        metadata: Metadata,
    ) -> Self {
        Self {
            id: String::new(),
            filename: filename.into(),
            status: FileStatus::Incomplete,
            length: 0,
            chunk_size,
            finished_at: None,
            started_at,
            deleted_at: None,
            sha256: String::new(),
            metadata,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.status == FileStatus::Complete
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{from_document, now_micros, to_document};
    use serde_json::json;

    #[test]
    fn test_persisted_layout() {
        let started = now_micros();
        let mut record = FileRecord::incomplete("/a.txt", 1024, started, Metadata::new());
        let doc = to_document(&record).unwrap();

        assert!(!doc.contains_key("id"));
        assert_eq!(doc["status"], json!("Incomplete"));
        assert_eq!(doc["chunkSize"], json!(1024));
        assert_eq!(doc["finishedAt"], json!(null));
        assert_eq!(doc["startedAt"], json!(started.timestamp_micros()));

        record.id = "abc".into();
        record.status = FileStatus::Complete;
        record.finished_at = Some(started);
        let doc = to_document(&record).unwrap();
        assert_eq!(doc["id"], json!("abc"));
        assert_eq!(from_document::<FileRecord>(doc).unwrap(), record);
    }

    #[test]
    fn test_status_names() {
        for status in [FileStatus::Incomplete, FileStatus::Complete, FileStatus::Deleted] {
            assert_eq!(serde_json::to_value(status).unwrap(), json!(status.as_str()));
        }
    }
}
