//! File-level operations layered over a [`crate::store::DocumentStore`].

pub mod bucket;
pub mod list;
pub mod modify;
pub mod reader;
pub mod revision;
pub mod watch;
pub mod writer;

use async_trait::async_trait;

use crate::errors::GridResult;
use crate::models::FileRecord;

/// Behaviour shared by read and write sessions.
#[async_trait]
pub trait FileHandle: Send {
    /// The record this session was opened on, as last known to the session.
    fn record(&self) -> &FileRecord;

    /// Finish the session. A second close fails with `InvalidArgument`.
    async fn close(&mut self) -> GridResult<()>;
}
