//! Single-record mutations keyed by file id.

use serde_json::{Value, json};
use tracing::info;

use super::bucket::Bucket;
use crate::errors::{GridError, GridResult};
use crate::models::{FileStatus, Metadata, file, now_micros};
use crate::store::Document;

impl Bucket {
    /// Soft delete: hide the file from name lookups but keep its content.
    pub async fn delete(&self, id: &str) -> GridResult<()> {
        let patch = Document::from_iter([
            (file::STATUS.to_string(), json!(FileStatus::Deleted)),
            (
                file::DELETED_AT.to_string(),
                json!(now_micros().timestamp_micros()),
            ),
        ]);
        self.update_file(id, patch).await
    }

    /// Remove the record, then every chunk of it.
    ///
    /// The two steps are not atomic: a failure in between leaves chunks no
    /// record refers to.
    pub async fn hard_delete(&self, id: &str) -> GridResult<()> {
        let removed = self.store().delete(self.files_collection(), id).await?;
        if removed.deleted == 0 {
            return Err(GridError::NotExist);
        }

        let chunks = self
            .store()
            .delete_range(self.chunks_collection(), &self.chunk_range(id))
            .await?;
        info!("hard deleted {} and {} chunks", id, chunks.deleted);
        Ok(())
    }

    pub async fn rename(&self, id: &str, filename: &str) -> GridResult<()> {
        let patch = Document::from_iter([(file::FILENAME.to_string(), json!(filename))]);
        self.update_file(id, patch).await
    }

    /// Replace the whole metadata object.
    pub async fn replace_metadata(&self, id: &str, metadata: Metadata) -> GridResult<()> {
        let patch = Document::from_iter([(file::METADATA.to_string(), Value::Object(metadata))]);
        self.update_file(id, patch).await
    }

    /// Existence is decided by the matched count, so a no-op update succeeds.
    async fn update_file(&self, id: &str, patch: Document) -> GridResult<()> {
        let result = self
            .store()
            .update(self.files_collection(), id, patch)
            .await?;
        if result.matched() == 0 {
            return Err(GridError::NotExist);
        }
        Ok(())
    }
}
