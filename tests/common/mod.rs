//! Shared helpers for the integration tests. Import with `mod common;`.
#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use futures::TryStreamExt;
use grid_store::store::{
    ChangeFeed, Collection, DeleteResult, Document, DocumentCursor, IndexRange, IndexSpec, Query,
    StoreError, StoreResult, UpdateResult,
};
use grid_store::{
    Bucket, BucketOptions, DocumentStore, FileCursor, FileHandle, FileRecord, FileStatus,
    GridError, ListOptions, MemoryStore, SqliteStore, StoreConfig,
};
use tracing_subscriber::EnvFilter;

pub const DATABASE: &str = "test";

/// Route `tracing` output through the test harness. Honors `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// An initialised bucket over a fresh [`MemoryStore`].
pub async fn memory_bucket(chunk_size: usize) -> Bucket {
    bucket_on(Arc::new(MemoryStore::new()), chunk_size).await
}

/// An initialised bucket over a private in-memory SQLite database.
pub async fn sqlite_bucket(chunk_size: usize) -> Bucket {
    let store = SqliteStore::connect(&StoreConfig::new("sqlite::memory:"))
        .await
        .expect("failed to open sqlite store");
    bucket_on(Arc::new(store), chunk_size).await
}

pub async fn bucket_on(store: Arc<dyn DocumentStore>, chunk_size: usize) -> Bucket {
    init_tracing();
    let bucket = Bucket::new(store, BucketOptions::new(DATABASE).with_chunk_size(chunk_size));
    bucket.init().await.expect("failed to initialise bucket");
    bucket
}

/// Deterministic, non-repeating-looking test content.
pub fn sample_bytes(len: usize) -> Vec<u8> {
    let mut state: u32 = 0x9e37_79b9;
    (0..len)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            (state & 0xff) as u8
        })
        .collect()
}

pub async fn collect(cursor: FileCursor) -> Vec<FileRecord> {
    cursor.try_collect().await.expect("listing failed")
}

pub async fn chunk_count(bucket: &Bucket, file_id: &str) -> usize {
    let range = IndexRange::prefix(grid_store::CHUNK_INDEX, vec![serde_json::json!(file_id)]);
    let chunks: Vec<Document> = bucket
        .store()
        .scan(bucket.chunks_collection(), &Query::range(range))
        .await
        .expect("chunk scan failed")
        .try_collect()
        .await
        .expect("chunk scan failed");
    chunks.len()
}

/// Run `tasks` upload, rename, read and delete sequences at once on clones
/// of `bucket`, then check every file ended up soft-deleted and unlisted.
pub async fn churn(bucket: &Bucket, tasks: usize) {
    let mut handles = Vec::new();
    for task in 0..tasks {
        let bucket = bucket.clone();
        handles.push(tokio::spawn(async move {
            let name = format!("/task/{:02}", task);
            let content = sample_bytes(50 + task * 7);

            let record = bucket.upload(&name, None, &content).await?;
            bucket.rename(&record.id, &format!("{}-renamed", name)).await?;
            let mut session = bucket.open_id(&record.id).await?;
            assert_eq!(session.read_to_end().await?, content);
            bucket.delete(&record.id).await?;
            Ok::<_, GridError>(record.id)
        }));
    }

    let mut ids = Vec::new();
    for handle in handles {
        ids.push(handle.await.expect("task panicked").expect("task failed"));
    }

    for id in &ids {
        let session = bucket.open_id(id).await.expect("record vanished");
        assert_eq!(session.record().status, FileStatus::Deleted);
        assert!(session.record().filename.ends_with("-renamed"));
    }
    let listed = bucket
        .list_by_pattern("^/task/", ListOptions::new())
        .await
        .expect("listing failed");
    assert!(collect(listed).await.is_empty());
}

/// Wraps a store and fails every chunk insert after the first `allowed`.
pub struct FlakyStore {
    inner: MemoryStore,
    allowed: usize,
    inserted: AtomicUsize,
}

impl FlakyStore {
    pub fn new(allowed: usize) -> Self {
        Self {
            inner: MemoryStore::new(),
            allowed,
            inserted: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl DocumentStore for FlakyStore {
    async fn collections(&self, database: &str) -> StoreResult<Vec<String>> {
        self.inner.collections(database).await
    }

    async fn create_collection(&self, collection: &Collection) -> StoreResult<()> {
        self.inner.create_collection(collection).await
    }

    async fn indexes(&self, collection: &Collection) -> StoreResult<Vec<String>> {
        self.inner.indexes(collection).await
    }

    async fn create_index(&self, collection: &Collection, index: &IndexSpec) -> StoreResult<()> {
        self.inner.create_index(collection, index).await
    }

    async fn wait_for_index(&self, collection: &Collection, name: &str) -> StoreResult<()> {
        self.inner.wait_for_index(collection, name).await
    }

    async fn insert(&self, collection: &Collection, document: Document) -> StoreResult<Document> {
        if collection.name.ends_with("_chunks")
            && self.inserted.fetch_add(1, Ordering::SeqCst) >= self.allowed
        {
            return Err(StoreError::Io(std::io::Error::other("injected insert failure")));
        }
        self.inner.insert(collection, document).await
    }

    async fn get(&self, collection: &Collection, id: &str) -> StoreResult<Option<Document>> {
        self.inner.get(collection, id).await
    }

    async fn update(
        &self,
        collection: &Collection,
        id: &str,
        patch: Document,
    ) -> StoreResult<UpdateResult> {
        self.inner.update(collection, id, patch).await
    }

    async fn delete(&self, collection: &Collection, id: &str) -> StoreResult<DeleteResult> {
        self.inner.delete(collection, id).await
    }

    async fn delete_range(
        &self,
        collection: &Collection,
        range: &IndexRange,
    ) -> StoreResult<DeleteResult> {
        self.inner.delete_range(collection, range).await
    }

    async fn scan(&self, collection: &Collection, query: &Query) -> StoreResult<DocumentCursor> {
        self.inner.scan(collection, query).await
    }

    async fn changes(&self, collection: &Collection, query: &Query) -> StoreResult<ChangeFeed> {
        self.inner.changes(collection, query).await
    }
}
