//! A named pair of collections holding file records and their chunks.

use std::fmt;
use std::sync::Arc;

use futures::{StreamExt, TryStreamExt, stream::BoxStream};
use serde_json::json;
use tracing::{debug, info};

use crate::config::BucketOptions;
use crate::errors::{GridError, GridResult};
use crate::models::{FileRecord, chunk, file, from_document};
use crate::store::{Collection, DocumentStore, IndexRange, IndexSpec, Query};

/// Index over file records used by name and revision lookups.
pub const FILE_INDEX: &str = "file_ix";
/// Index over chunk records used to stream and purge a file's content.
pub const CHUNK_INDEX: &str = "chunk_ix";

/// Lazy sequence of file records returned by the list operations.
pub type FileCursor = BoxStream<'static, GridResult<FileRecord>>;

/// Handle on one bucket. Cheap to clone and safe to share between tasks.
#[derive(Clone)]
pub struct Bucket {
    store: Arc<dyn DocumentStore>,
    options: BucketOptions,
    files: Collection,
    chunks: Collection,
}

impl fmt::Debug for Bucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bucket")
            .field("files", &self.files)
            .field("chunks", &self.chunks)
            .field("chunk_size", &self.options.chunk_size)
            .finish()
    }
}

impl Bucket {
    pub fn new(store: Arc<dyn DocumentStore>, options: BucketOptions) -> Self {
        let options = options.normalized();
        let files = Collection::new(
            options.database_name.clone(),
            format!("{}_files", options.bucket_name),
        );
        let chunks = Collection::new(
            options.database_name.clone(),
            format!("{}_chunks", options.bucket_name),
        );

        Self {
            store,
            options,
            files,
            chunks,
        }
    }

    pub fn database_name(&self) -> &str {
        &self.options.database_name
    }

    pub fn bucket_name(&self) -> &str {
        &self.options.bucket_name
    }

    pub fn chunk_size(&self) -> usize {
        self.options.chunk_size
    }

    pub fn files_collection(&self) -> &Collection {
        &self.files
    }

    pub fn chunks_collection(&self) -> &Collection {
        &self.chunks
    }

    /// Create the bucket's collections and indexes if they are missing, then
    /// wait until both indexes can serve queries. Safe to call repeatedly.
    pub async fn init(&self) -> GridResult<()> {
        let existing = self.store.collections(&self.options.database_name).await?;
        for collection in [&self.files, &self.chunks] {
            if !existing.contains(&collection.name) {
                self.store.create_collection(collection).await?;
                debug!("created collection {}", collection);
            }
        }

        let indexes = [
            (
                &self.files,
                IndexSpec::new(FILE_INDEX, &[file::STATUS, file::FILENAME, file::FINISHED_AT]),
            ),
            (
                &self.chunks,
                IndexSpec::new(CHUNK_INDEX, &[chunk::FILE_ID, chunk::NUM]),
            ),
        ];
        for (collection, index) in &indexes {
            let existing = self.store.indexes(collection).await?;
            if !existing.contains(&index.name) {
                self.store.create_index(collection, index).await?;
                debug!("created index {} on {}", index.name, collection);
            }
            self.store.wait_for_index(collection, &index.name).await?;
        }

        info!(
            "bucket {} ready in database {}",
            self.options.bucket_name, self.options.database_name
        );
        Ok(())
    }

    /// The store this bucket was built on.
    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    /// Every chunk of `file_id`, in ascending `num` order.
    pub(crate) fn chunk_range(&self, file_id: &str) -> IndexRange {
        IndexRange::prefix(CHUNK_INDEX, vec![json!(file_id)])
    }

    /// Fetch one file record by id, whatever its status.
    pub(crate) async fn fetch_file(&self, id: &str) -> GridResult<FileRecord> {
        match self.store.get(&self.files, id).await? {
            Some(document) => from_document(document),
            None => Err(GridError::NotExist),
        }
    }

    /// Run `query` against the file collection, decoding lazily.
    pub(crate) async fn scan_files(&self, query: &Query) -> GridResult<FileCursor> {
        let cursor = self.store.scan(&self.files, query).await?;
        Ok(cursor
            .map_err(GridError::from)
            .and_then(|document| futures::future::ready(from_document::<FileRecord>(document)))
            .boxed())
    }
}
