//! Download path: resolve a record, stream its chunks, verify the digest.

use async_trait::async_trait;
use bytes::{Buf, Bytes};
use futures::{StreamExt, TryStreamExt, stream::BoxStream};
use serde_json::json;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use super::FileHandle;
use super::bucket::{Bucket, FILE_INDEX};
use super::revision::Revision;
use crate::errors::{GridError, GridResult};
use crate::models::{ChunkRecord, FileRecord, FileStatus, from_document};
use crate::store::{DocumentCursor, IndexRange, Query};

enum ReadState {
    /// No chunk has been requested yet.
    Unopened,
    Streaming {
        cursor: DocumentCursor,
        hasher: Sha256,
    },
    /// Every chunk has been pulled; `actual` is the digest of all of them.
    Drained {
        actual: String,
    },
    Closed,
}

/// An open download of one file record.
///
/// The chunk cursor is opened lazily by the first read and released by
/// [`FileHandle::close`] or when the session is dropped.
pub struct ReadSession {
    bucket: Bucket,
    record: FileRecord,
    state: ReadState,
    pending: Bytes,
}

impl Bucket {
    /// Open a file by id, whatever its status.
    pub async fn open_id(&self, id: &str) -> GridResult<ReadSession> {
        let record = self.fetch_file(id).await?;
        Ok(self.open_record(record))
    }

    /// Open the latest completed revision of `filename`.
    pub async fn open(&self, filename: &str) -> GridResult<ReadSession> {
        self.open_revision(filename, Revision::LATEST).await
    }

    /// Open a completed revision of `filename`, ordered by completion time.
    pub async fn open_revision(
        &self,
        filename: &str,
        revision: impl Into<Revision>,
    ) -> GridResult<ReadSession> {
        let revision = revision.into();
        let offset = revision.offset();
        let range = IndexRange::prefix(
            FILE_INDEX,
            vec![json!(FileStatus::Complete), json!(filename)],
        )
        .ordered(revision.order());
        let query = Query::range(range).limit(offset.saturating_add(1));

        let found: Vec<FileRecord> = self.scan_files(&query).await?.try_collect().await?;
        if found.is_empty() {
            return Err(GridError::NotExist);
        }
        match found.into_iter().nth(offset) {
            Some(record) => Ok(self.open_record(record)),
            None => Err(GridError::RevisionNotExist),
        }
    }

    /// Start reading an already resolved record.
    pub fn open_record(&self, record: FileRecord) -> ReadSession {
        ReadSession {
            bucket: self.clone(),
            record,
            state: ReadState::Unopened,
            pending: Bytes::new(),
        }
    }
}

impl ReadSession {
    pub fn id(&self) -> &str {
        &self.record.id
    }

    /// Fill `buf` with the next bytes of the file.
    ///
    /// Returns `Ok(0)` at the end of the content once the digest has been
    /// checked, or [`GridError::HashMismatch`] in its place. An empty `buf`
    /// returns 0 without touching the store.
    pub async fn read(&mut self, buf: &mut [u8]) -> GridResult<usize> {
        if matches!(self.state, ReadState::Closed) {
            return Err(GridError::InvalidArgument("read on a closed file"));
        }
        if buf.is_empty() {
            return Ok(0);
        }

        let mut filled = 0;
        while filled < buf.len() {
            if self.pending.is_empty() {
                match self.pull().await? {
                    Some(data) => self.pending = data,
                    None => break,
                }
            }
            let n = self.pending.len().min(buf.len() - filled);
            buf[filled..filled + n].copy_from_slice(&self.pending[..n]);
            self.pending.advance(n);
            filled += n;
        }

        if filled == 0 {
            self.verify()?;
        }
        Ok(filled)
    }

    /// Read and verify the remaining content.
    pub async fn read_to_end(&mut self) -> GridResult<Vec<u8>> {
        let mut content = Vec::with_capacity(self.record.length as usize);
        while let Some(block) = self.next_block().await? {
            content.extend_from_slice(&block);
        }
        Ok(content)
    }

    /// Turn the session into a stream of chunk-sized blocks. The stream ends
    /// after the digest has been checked; a mismatch is its last item.
    pub fn into_stream(self) -> BoxStream<'static, GridResult<Bytes>> {
        futures::stream::unfold(Some(self), |session| async move {
            let mut session = session?;
            match session.next_block().await {
                Ok(Some(block)) => Some((Ok(block), Some(session))),
                Ok(None) => None,
                Err(err) => Some((Err(err), None)),
            }
        })
        .boxed()
    }

    async fn next_block(&mut self) -> GridResult<Option<Bytes>> {
        if matches!(self.state, ReadState::Closed) {
            return Err(GridError::InvalidArgument("read on a closed file"));
        }
        if !self.pending.is_empty() {
            return Ok(Some(std::mem::take(&mut self.pending)));
        }
        match self.pull().await? {
            Some(data) => Ok(Some(data)),
            None => self.verify().map(|_| None),
        }
    }

    /// Next chunk payload from the cursor, hashed as it is taken.
    async fn pull(&mut self) -> GridResult<Option<Bytes>> {
        loop {
            match &mut self.state {
                ReadState::Unopened => {
                    let query = Query::range(self.bucket.chunk_range(&self.record.id));
                    let cursor = self
                        .bucket
                        .store()
                        .scan(self.bucket.chunks_collection(), &query)
                        .await?;
                    self.state = ReadState::Streaming {
                        cursor,
                        hasher: Sha256::new(),
                    };
                }
                ReadState::Streaming { cursor, hasher } => match cursor.try_next().await? {
                    Some(document) => {
                        let chunk: ChunkRecord = from_document(document)?;
                        hasher.update(&chunk.data);
                        return Ok(Some(chunk.data));
                    }
                    None => {
                        let actual = format!("{:x}", hasher.clone().finalize());
                        self.state = ReadState::Drained { actual };
                        return Ok(None);
                    }
                },
                ReadState::Drained { .. } | ReadState::Closed => return Ok(None),
            }
        }
    }

    fn verify(&self) -> GridResult<()> {
        match &self.state {
            ReadState::Drained { actual } if *actual != self.record.sha256 => {
                warn!(
                    "sha256 mismatch on {}: expected {}, got {}",
                    self.record.id, self.record.sha256, actual
                );
                Err(GridError::HashMismatch {
                    expected: self.record.sha256.clone(),
                    actual: actual.clone(),
                })
            }
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl FileHandle for ReadSession {
    fn record(&self) -> &FileRecord {
        &self.record
    }

    async fn close(&mut self) -> GridResult<()> {
        if matches!(self.state, ReadState::Closed) {
            return Err(GridError::InvalidArgument("file already closed"));
        }
        self.state = ReadState::Closed;
        self.pending = Bytes::new();
        debug!("closed download of {}", self.record.id);
        Ok(())
    }
}
