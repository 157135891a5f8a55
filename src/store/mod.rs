//! Store adapter contract.
//!
//! A bucket never talks to a database directly. Everything goes through
//! [`DocumentStore`], which models an ordered document collection with
//! compound secondary indexes, atomic single-document writes that report
//! affected counts, and a live change feed. Two adapters ship with the
//! crate: [`MemoryStore`] and [`SqliteStore`].

mod feed;
pub mod memory;
pub mod query;
pub mod sqlite;

use std::fmt;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde_json::{Map, Value};
use thiserror::Error;

pub use memory::MemoryStore;
pub use query::{Filter, IndexRange, KeyBound, Order, Query};
pub use sqlite::SqliteStore;

/// A JSON object as persisted by a store.
pub type Document = Map<String, Value>;

/// Field holding the store-generated identifier of every document.
pub const ID_FIELD: &str = "id";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("collection `{0}` not found")]
    CollectionNotFound(String),
    #[error("index `{index}` not found on `{collection}`")]
    IndexNotFound { collection: String, index: String },
    #[error("invalid document: {0}")]
    InvalidDocument(String),
    #[error("invalid identifier `{0}`")]
    InvalidIdentifier(String),
    #[error("change feed fell behind by {0} events")]
    Lagged(u64),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Fully qualified collection identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Collection {
    pub database: String,
    pub name: String,
}

impl Collection {
    pub fn new(database: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.database, self.name)
    }
}

/// Compound secondary index definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSpec {
    pub name: String,
    pub fields: Vec<String>,
}

impl IndexSpec {
    pub fn new(name: impl Into<String>, fields: &[&str]) -> Self {
        Self {
            name: name.into(),
            fields: fields.iter().map(|field| field.to_string()).collect(),
        }
    }
}

/// Outcome of an update-by-id.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateResult {
    /// Matched and changed.
    pub replaced: u64,
    /// Matched, but the patch left the document as it was.
    pub unchanged: u64,
}

impl UpdateResult {
    pub fn matched(&self) -> u64 {
        self.replaced + self.unchanged
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeleteResult {
    pub deleted: u64,
}

/// Before/after images of one document write.
#[derive(Debug, Clone, PartialEq)]
pub struct Change {
    pub old_val: Option<Document>,
    pub new_val: Option<Document>,
}

/// Lazy, finite, non-restartable scan result. Dropping it releases the scan.
pub type DocumentCursor = BoxStream<'static, StoreResult<Document>>;

/// Lazy, unbounded change subscription. Dropping it unsubscribes.
pub type ChangeFeed = BoxStream<'static, StoreResult<Change>>;

/// Ordered document database as seen by a file bucket.
///
/// Implementations must be safe to share between tasks; every method is a
/// single round trip and the only place a bucket operation suspends.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Names of the collections that exist in `database`.
    async fn collections(&self, database: &str) -> StoreResult<Vec<String>>;

    async fn create_collection(&self, collection: &Collection) -> StoreResult<()>;

    /// Names of the secondary indexes defined on `collection`.
    async fn indexes(&self, collection: &Collection) -> StoreResult<Vec<String>>;

    async fn create_index(&self, collection: &Collection, index: &IndexSpec) -> StoreResult<()>;

    /// Resolve once the index can serve range scans.
    async fn wait_for_index(&self, collection: &Collection, name: &str) -> StoreResult<()>;

    /// Insert one document, returning it as persisted (with its generated id).
    async fn insert(&self, collection: &Collection, document: Document) -> StoreResult<Document>;

    async fn get(&self, collection: &Collection, id: &str) -> StoreResult<Option<Document>>;

    /// Merge the top-level fields of `patch` into the document. Fields present
    /// in the patch replace the stored value wholesale.
    async fn update(
        &self,
        collection: &Collection,
        id: &str,
        patch: Document,
    ) -> StoreResult<UpdateResult>;

    async fn delete(&self, collection: &Collection, id: &str) -> StoreResult<DeleteResult>;

    /// Delete every document whose index key falls inside `range`.
    async fn delete_range(
        &self,
        collection: &Collection,
        range: &IndexRange,
    ) -> StoreResult<DeleteResult>;

    async fn scan(&self, collection: &Collection, query: &Query) -> StoreResult<DocumentCursor>;

    /// Subscribe to writes touching documents inside the query scope.
    async fn changes(&self, collection: &Collection, query: &Query) -> StoreResult<ChangeFeed>;
}

/// Merge `patch` into `document`, reporting whether anything changed.
pub(crate) fn merge_patch(document: &mut Document, patch: Document) -> StoreResult<bool> {
    if let Some(id) = patch.get(ID_FIELD) {
        if document.get(ID_FIELD) != Some(id) {
            return Err(StoreError::InvalidDocument(
                "the primary key cannot be changed".into(),
            ));
        }
    }

    let mut changed = false;
    for (field, value) in patch {
        if document.get(&field) != Some(&value) {
            document.insert(field, value);
            changed = true;
        }
    }
    Ok(changed)
}
