//! Records persisted by a bucket.
//!
//! Both record types round-trip through [`Document`] so that any store
//! adapter sees the same camelCase layout.

pub mod change;
pub mod chunk;
pub mod file;

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Serialize, de::DeserializeOwned};
use serde_json::{Map, Value};

use crate::errors::{GridError, GridResult};
use crate::store::Document;

pub use change::FileChange;
pub use chunk::ChunkRecord;
pub use file::{FileRecord, FileStatus};

/// User-supplied metadata attached to a file.
pub type Metadata = Map<String, Value>;

pub(crate) fn to_document<T: Serialize>(record: &T) -> GridResult<Document> {
    match serde_json::to_value(record)? {
        Value::Object(document) => Ok(document),
        _ => Err(GridError::InvalidArgument("record is not a JSON object")),
    }
}

pub(crate) fn from_document<T: DeserializeOwned>(document: Document) -> GridResult<T> {
    Ok(serde_json::from_value(Value::Object(document))?)
}

/// Current time at the precision records are stored with.
pub(crate) fn now_micros() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}
