//! In-process change fan-out used by both adapters.

use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::broadcast::{self, error::RecvError};

use super::query::{Matcher, Query};
use super::{ChangeFeed, Collection, Document, StoreError};

const DEFAULT_CAPACITY: usize = 1024;

#[derive(Debug)]
struct ChangeEvent {
    collection: Collection,
    old_val: Option<Document>,
    new_val: Option<Document>,
}

#[derive(Debug)]
pub(crate) struct ChangeHub {
    sender: broadcast::Sender<Arc<ChangeEvent>>,
}

impl Default for ChangeHub {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl ChangeHub {
    pub(crate) fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Called after a write is committed. Having no subscribers is fine.
    pub(crate) fn publish(
        &self,
        collection: &Collection,
        old_val: Option<Document>,
        new_val: Option<Document>,
    ) {
        let _ = self.sender.send(Arc::new(ChangeEvent {
            collection: collection.clone(),
            old_val,
            new_val,
        }));
    }

    pub(crate) fn subscribe(
        &self,
        collection: &Collection,
        query: &Query,
        key_fields: Vec<String>,
    ) -> ChangeFeed {
        let receiver = self.sender.subscribe();
        let matcher = Matcher::new(query, key_fields);

        futures::stream::unfold(
            (receiver, collection.clone(), matcher),
            |(mut receiver, collection, matcher)| async move {
                loop {
                    match receiver.recv().await {
                        Ok(event) => {
                            if event.collection != collection {
                                continue;
                            }
                            let projected =
                                matcher.project(event.old_val.as_ref(), event.new_val.as_ref());
                            if let Some(change) = projected {
                                return Some((Ok(change), (receiver, collection, matcher)));
                            }
                        }
                        Err(RecvError::Lagged(missed)) => {
                            return Some((
                                Err(StoreError::Lagged(missed)),
                                (receiver, collection, matcher),
                            ));
                        }
                        Err(RecvError::Closed) => return None,
                    }
                }
            },
        )
        .boxed()
    }
}
