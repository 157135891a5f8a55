//! Upload path: split into chunks, hash, persist, then commit the record.

use std::io;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt, pin_mut};
use serde_json::json;
use sha2::{Digest, Sha256};
use tracing::debug;

use super::FileHandle;
use super::bucket::Bucket;
use crate::errors::{GridError, GridResult};
use crate::models::{
    ChunkRecord, FileRecord, FileStatus, Metadata, file, from_document, now_micros, to_document,
};
use crate::store::Document;

/// An open upload. Content written here stays invisible to name lookups
/// until [`FileHandle::close`] promotes the record to `Complete`.
pub struct WriteSession {
    bucket: Bucket,
    record: FileRecord,
    next_num: u64,
    hasher: Sha256,
    closed: bool,
}

impl Bucket {
    /// Start a new revision of `filename`. Names need not be unique.
    pub async fn create(
        &self,
        filename: &str,
        metadata: Option<Metadata>,
    ) -> GridResult<WriteSession> {
        let record = FileRecord::incomplete(
            filename,
            self.chunk_size(),
            now_micros(),
            metadata.unwrap_or_default(),
        );
        let stored = self
            .store()
            .insert(self.files_collection(), to_document(&record)?)
            .await?;
        let record: FileRecord = from_document(stored)?;
        debug!("opened upload {} for {}", record.id, record.filename);

        Ok(WriteSession {
            bucket: self.clone(),
            record,
            next_num: 0,
            hasher: Sha256::new(),
            closed: false,
        })
    }

    /// Store `data` as a complete file in one call.
    pub async fn upload(
        &self,
        filename: &str,
        metadata: Option<Metadata>,
        data: &[u8],
    ) -> GridResult<FileRecord> {
        let mut session = self.create(filename, metadata).await?;
        session.write(data).await?;
        session.close().await?;
        Ok(session.record.clone())
    }

    /// Drain `stream` into a new file, writing whole chunks as they fill up.
    ///
    /// A stream error aborts the upload and leaves the `Incomplete` record
    /// behind, as for any upload that is never closed.
    pub async fn upload_stream<S>(
        &self,
        filename: &str,
        metadata: Option<Metadata>,
        stream: S,
    ) -> GridResult<FileRecord>
    where
        S: Stream<Item = io::Result<Bytes>> + Send,
    {
        let mut session = self.create(filename, metadata).await?;
        let chunk_size = session.record.chunk_size;
        let mut pending = BytesMut::with_capacity(chunk_size);

        pin_mut!(stream);
        while let Some(block) = stream.next().await {
            pending.extend_from_slice(&block?);
            let full = pending.len() - pending.len() % chunk_size;
            if full > 0 {
                let ready = pending.split_to(full).freeze();
                session.write(&ready).await?;
            }
        }
        if !pending.is_empty() {
            session.write(&pending).await?;
        }

        session.close().await?;
        Ok(session.record.clone())
    }
}

impl WriteSession {
    pub fn id(&self) -> &str {
        &self.record.id
    }

    /// Append `buf`, one chunk per `chunk_size` block.
    ///
    /// Length, hash and chunk numbering only advance for chunks the store
    /// accepted. If the store fails after part of `buf` was stored the call
    /// returns [`GridError::ShortWrite`]; if nothing was stored the store
    /// error is returned as is.
    pub async fn write(&mut self, buf: &[u8]) -> GridResult<usize> {
        if self.closed {
            return Err(GridError::InvalidArgument("write on a closed file"));
        }

        let mut accepted = 0;
        for block in buf.chunks(self.record.chunk_size) {
            let chunk = ChunkRecord::new(
                self.record.id.as_str(),
                self.next_num,
                Bytes::copy_from_slice(block),
            );
            let inserted = self
                .bucket
                .store()
                .insert(self.bucket.chunks_collection(), to_document(&chunk)?)
                .await;

            if let Err(source) = inserted {
                if accepted == 0 {
                    return Err(source.into());
                }
                return Err(GridError::ShortWrite {
                    accepted,
                    requested: buf.len(),
                    source,
                });
            }

            self.hasher.update(block);
            self.next_num += 1;
            self.record.length += block.len() as u64;
            accepted += block.len();
        }

        Ok(accepted)
    }
}

#[async_trait]
impl FileHandle for WriteSession {
    fn record(&self) -> &FileRecord {
        &self.record
    }

    /// Commit length, digest and completion time in a single update.
    async fn close(&mut self) -> GridResult<()> {
        if self.closed {
            return Err(GridError::InvalidArgument("file already closed"));
        }

        let finished_at = now_micros();
        let sha256 = format!("{:x}", self.hasher.clone().finalize());
        let patch = Document::from_iter([
            (file::STATUS.to_string(), json!(FileStatus::Complete)),
            (file::LENGTH.to_string(), json!(self.record.length)),
            (file::SHA256.to_string(), json!(sha256.as_str())),
            (
                file::FINISHED_AT.to_string(),
                json!(finished_at.timestamp_micros()),
            ),
        ]);

        let result = self
            .bucket
            .store()
            .update(self.bucket.files_collection(), &self.record.id, patch)
            .await?;
        self.closed = true;
        if result.matched() == 0 {
            return Err(GridError::NotExist);
        }

        self.record.status = FileStatus::Complete;
        self.record.finished_at = Some(finished_at);
        self.record.sha256 = sha256;
        debug!(
            "completed {} ({} bytes in {} chunks)",
            self.record.id, self.record.length, self.next_num
        );
        Ok(())
    }
}

impl Drop for WriteSession {
    fn drop(&mut self) {
        if !self.closed {
            debug!("upload {} dropped before close", self.record.id);
        }
    }
}
