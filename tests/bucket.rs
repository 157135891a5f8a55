//! Bucket setup.

mod common;

use std::sync::Arc;

use grid_store::{Bucket, BucketOptions, CHUNK_INDEX, DocumentStore, FILE_INDEX, MemoryStore};

#[tokio::test]
async fn init_creates_collections_and_indexes() {
    common::init_tracing();
    let store = Arc::new(MemoryStore::new());
    let bucket = Bucket::new(store.clone(), BucketOptions::new("media").with_bucket_name("photos"));

    bucket.init().await.unwrap();

    assert_eq!(
        store.collections("media").await.unwrap(),
        vec!["photos_chunks", "photos_files"]
    );
    assert_eq!(
        store.indexes(bucket.files_collection()).await.unwrap(),
        vec![FILE_INDEX]
    );
    assert_eq!(
        store.indexes(bucket.chunks_collection()).await.unwrap(),
        vec![CHUNK_INDEX]
    );
}

#[tokio::test]
async fn init_is_idempotent() {
    let bucket = common::memory_bucket(16).await;
    let record = bucket.upload("/kept.txt", None, b"survives").await.unwrap();

    bucket.init().await.unwrap();
    bucket.init().await.unwrap();

    let mut session = bucket.open_id(&record.id).await.unwrap();
    assert_eq!(session.read_to_end().await.unwrap(), b"survives");
}

#[tokio::test]
async fn options_fall_back_to_defaults() {
    let bucket = Bucket::new(
        Arc::new(MemoryStore::new()),
        BucketOptions::new("media").with_bucket_name("").with_chunk_size(0),
    );

    assert_eq!(bucket.database_name(), "media");
    assert_eq!(bucket.bucket_name(), "fs");
    assert_eq!(bucket.chunk_size(), 255 * 1024);
    assert_eq!(bucket.files_collection().name, "fs_files");
    assert_eq!(bucket.chunks_collection().name, "fs_chunks");
}

#[tokio::test]
async fn operations_fail_before_init() {
    let bucket = Bucket::new(Arc::new(MemoryStore::new()), BucketOptions::new("media"));
    assert!(bucket.create("/early", None).await.is_err());
}
