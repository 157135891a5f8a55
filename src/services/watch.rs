//! Live change subscriptions over completed file records.

use std::pin::Pin;
use std::task::{Context, Poll, ready};

use futures::{Stream, StreamExt};
use tracing::debug;

use super::bucket::Bucket;
use super::list::FileScope;
use crate::errors::{GridError, GridResult};
use crate::models::{FileChange, Metadata};
use crate::store::{ChangeFeed, Order};

/// Unbounded stream of changes to files inside a scope.
///
/// A side of a change that falls outside the scope is reported as `None`,
/// so completing an upload arrives with no `old_val`. Dropping the watch or
/// calling [`FileWatch::close`] ends the subscription.
pub struct FileWatch {
    feed: Option<ChangeFeed>,
}

impl FileWatch {
    pub fn close(&mut self) {
        if self.feed.take().is_some() {
            debug!("file watch closed");
        }
    }
}

impl Stream for FileWatch {
    type Item = GridResult<FileChange>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let Some(feed) = self.feed.as_mut() else {
            return Poll::Ready(None);
        };
        match ready!(feed.poll_next_unpin(cx)) {
            Some(Ok(change)) => Poll::Ready(Some(FileChange::from_change(change))),
            Some(Err(err)) => Poll::Ready(Some(Err(GridError::from(err)))),
            None => {
                self.feed = None;
                Poll::Ready(None)
            }
        }
    }
}

impl Bucket {
    pub async fn watch_by_pattern(&self, pattern: &str) -> GridResult<FileWatch> {
        self.watch(FileScope::pattern(pattern)?).await
    }

    pub async fn watch_by_filename(&self, filename: &str) -> GridResult<FileWatch> {
        self.watch(FileScope::Filename(filename.to_string())).await
    }

    pub async fn watch_by_metadata(&self, metadata: &Metadata) -> GridResult<FileWatch> {
        self.watch(FileScope::Metadata(metadata.clone())).await
    }

    async fn watch(&self, scope: FileScope) -> GridResult<FileWatch> {
        let query = scope.query(Order::Asc);
        let feed = self
            .store()
            .changes(self.files_collection(), &query)
            .await?;
        Ok(FileWatch { feed: Some(feed) })
    }
}
