//! Upload behaviour.

mod common;

use std::io;
use std::sync::Arc;

use bytes::Bytes;
use futures::StreamExt;
use common::{FlakyStore, chunk_count, sample_bytes};
use grid_store::{FileHandle, FileStatus, GridError, ListOptions};
use sha2::{Digest, Sha256};

const EMPTY_SHA256: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

#[tokio::test]
async fn round_trip_across_chunk_sizes() {
    let content = sample_bytes(1000);
    let expected = format!("{:x}", Sha256::digest(&content));

    for chunk_size in [1, 100, 255 * 1024] {
        let bucket = common::memory_bucket(chunk_size).await;
        let record = bucket.upload("/data.bin", None, &content).await.unwrap();

        assert_eq!(record.status, FileStatus::Complete);
        assert_eq!(record.length, 1000);
        assert_eq!(record.chunk_size, chunk_size);
        assert_eq!(record.sha256, expected);
        assert!(record.finished_at.is_some());
        assert_eq!(
            chunk_count(&bucket, &record.id).await,
            content.len().div_ceil(chunk_size)
        );

        let mut session = bucket.open("/data.bin").await.unwrap();
        assert_eq!(session.read_to_end().await.unwrap(), content);
    }
}

#[tokio::test]
async fn empty_file() {
    let bucket = common::memory_bucket(8).await;
    let mut session = bucket.create("/empty", None).await.unwrap();
    assert_eq!(session.write(&[]).await.unwrap(), 0);
    session.close().await.unwrap();

    assert_eq!(session.record().length, 0);
    assert_eq!(session.record().sha256, EMPTY_SHA256);
    assert_eq!(chunk_count(&bucket, session.id()).await, 0);

    let mut reader = bucket.open("/empty").await.unwrap();
    let mut buf = [0u8; 16];
    assert_eq!(reader.read(&mut buf).await.unwrap(), 0);
}

#[tokio::test]
async fn several_writes_number_chunks_contiguously() {
    let bucket = common::memory_bucket(4).await;
    let mut session = bucket.create("/parts", None).await.unwrap();
    assert_eq!(session.write(b"abcdef").await.unwrap(), 6);
    assert_eq!(session.write(b"ghij").await.unwrap(), 4);
    session.close().await.unwrap();

    // "abcd" "ef" "ghij": a short chunk may sit in the middle of a file
    assert_eq!(chunk_count(&bucket, session.id()).await, 3);
    let mut reader = bucket.open("/parts").await.unwrap();
    assert_eq!(reader.read_to_end().await.unwrap(), b"abcdefghij");
}

#[tokio::test]
async fn closed_session_rejects_writes_and_second_close() {
    let bucket = common::memory_bucket(8).await;
    let mut session = bucket.create("/once", None).await.unwrap();
    session.write(b"data").await.unwrap();
    session.close().await.unwrap();

    assert!(matches!(
        session.write(b"more").await,
        Err(GridError::InvalidArgument(_))
    ));
    assert!(matches!(
        session.close().await,
        Err(GridError::InvalidArgument(_))
    ));
}

#[tokio::test]
async fn incomplete_upload_is_invisible_by_name() {
    let bucket = common::memory_bucket(8).await;
    let mut session = bucket.create("/pending", None).await.unwrap();
    session.write(b"half").await.unwrap();

    assert!(matches!(
        bucket.open("/pending").await,
        Err(GridError::NotExist)
    ));
    let listed = common::collect(
        bucket
            .list_by_filename("/pending", ListOptions::new())
            .await
            .unwrap(),
    )
    .await;
    assert!(listed.is_empty());

    let by_id = bucket.open_id(session.id()).await.unwrap();
    assert_eq!(by_id.record().status, FileStatus::Incomplete);
    assert!(by_id.record().finished_at.is_none());
}

#[tokio::test]
async fn close_after_hard_delete() {
    let bucket = common::memory_bucket(8).await;
    let mut session = bucket.create("/gone", None).await.unwrap();
    session.write(b"data").await.unwrap();
    bucket.hard_delete(session.id()).await.unwrap();

    assert!(matches!(session.close().await, Err(GridError::NotExist)));
}

#[tokio::test]
async fn partial_write_reports_accepted_bytes() {
    common::init_tracing();
    let bucket = common::bucket_on(Arc::new(FlakyStore::new(2)), 4).await;
    let mut session = bucket.create("/flaky", None).await.unwrap();

    match session.write(b"0123456789").await {
        Err(GridError::ShortWrite {
            accepted,
            requested,
            ..
        }) => {
            assert_eq!(accepted, 8);
            assert_eq!(requested, 10);
        }
        other => panic!("expected a short write, got {:?}", other),
    }
    assert_eq!(session.record().length, 8);

    // nothing stored this time: the store error comes back untranslated
    assert!(matches!(
        session.write(b"89").await,
        Err(GridError::Store(_))
    ));

    session.close().await.unwrap();
    assert_eq!(
        session.record().sha256,
        format!("{:x}", Sha256::digest(b"01234567"))
    );
    let mut reader = bucket.open("/flaky").await.unwrap();
    assert_eq!(reader.read_to_end().await.unwrap(), b"01234567");
}

#[tokio::test]
async fn upload_stream_coalesces_into_full_chunks() {
    let bucket = common::memory_bucket(4).await;
    let pieces = ["ab", "cdefg", "h", "ijklmnop", "q"]
        .into_iter()
        .map(|piece| Ok(Bytes::from_static(piece.as_bytes())));

    let record = bucket
        .upload_stream("/streamed", None, futures::stream::iter(pieces))
        .await
        .unwrap();

    assert_eq!(record.length, 17);
    assert_eq!(chunk_count(&bucket, &record.id).await, 5);
    assert_eq!(
        record.sha256,
        format!("{:x}", Sha256::digest(b"abcdefghijklmnopq"))
    );

    let mut reader = bucket.open_record(record);
    assert_eq!(reader.read_to_end().await.unwrap(), b"abcdefghijklmnopq");
}

#[tokio::test]
async fn upload_stream_error_leaves_incomplete_record() {
    let bucket = common::memory_bucket(4).await;
    let pieces = vec![
        Ok(Bytes::from_static(b"abcdef")),
        Err(std::io::Error::other("client went away")),
    ];

    let err = bucket
        .upload_stream("/aborted", None, futures::stream::iter(pieces))
        .await
        .unwrap_err();
    assert!(matches!(err, GridError::Io(_)));
    assert!(matches!(
        bucket.open("/aborted").await,
        Err(GridError::NotExist)
    ));
}

#[tokio::test]
async fn streamed_upload_hash_matches_a_fresh_read() {
    let bucket = common::memory_bucket(64).await;
    let content = sample_bytes(1000);
    let blocks: Vec<io::Result<Bytes>> = content
        .chunks(37)
        .map(|block| Ok(Bytes::copy_from_slice(block)))
        .collect();

    let mut tee = Sha256::new();
    let stream = futures::stream::iter(blocks).inspect(|block| {
        if let Ok(block) = block {
            tee.update(block);
        }
    });
    let record = bucket.upload_stream("/tee", None, stream).await.unwrap();
    let streamed = format!("{:x}", tee.finalize());
    assert_eq!(record.sha256, streamed);

    let mut session = bucket.open("/tee").await.unwrap();
    let read_back = session.read_to_end().await.unwrap();
    assert_eq!(format!("{:x}", Sha256::digest(&read_back)), streamed);
}

#[tokio::test]
async fn concurrent_sessions_share_a_bucket() {
    common::churn(&common::memory_bucket(16).await, 24).await;
    common::churn(&common::sqlite_bucket(16).await, 24).await;
}
