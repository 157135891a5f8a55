use thiserror::Error;

use crate::store::StoreError;

/// Errors surfaced by bucket operations and file sessions.
#[derive(Debug, Error)]
pub enum GridError {
    #[error("file does not exist")]
    NotExist,

    #[error("file revision does not exist")]
    RevisionNotExist,

    /// The content read back does not hash to the digest stored at close.
    #[error("sha256 mismatch: expected {expected}, got {actual}")]
    HashMismatch { expected: String, actual: String },

    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// Some chunks of a single write were stored before the store failed.
    /// Only `accepted` bytes count towards the file.
    #[error("short write: {accepted} of {requested} bytes stored")]
    ShortWrite {
        accepted: usize,
        requested: usize,
        #[source]
        source: StoreError,
    },

    #[error("invalid filename pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    #[error("malformed record: {0}")]
    Decode(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type GridResult<T> = Result<T, GridError>;
