//! In-process [`DocumentStore`].
//!
//! Documents live in insertion order; index scans are computed on demand by
//! sorting the matching documents on their compound key, with the insertion
//! sequence as the tie-breaker. Scans return a snapshot taken under the
//! lock, streamed lazily to the caller.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use super::feed::ChangeHub;
use super::query::{self, IndexRange, Order, Query};
use super::{
    ChangeFeed, Collection, DeleteResult, Document, DocumentCursor, DocumentStore, ID_FIELD,
    IndexSpec, StoreError, StoreResult, UpdateResult, merge_patch,
};

#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<HashMap<Collection, Table>>,
    hub: ChangeHub,
}

#[derive(Debug, Default)]
struct Table {
    rows: BTreeMap<u64, Document>,
    ids: HashMap<String, u64>,
    next_seq: u64,
    indexes: HashMap<String, Vec<String>>,
}

impl Table {
    fn index_fields(&self, collection: &Collection, index: &str) -> StoreResult<Vec<String>> {
        self.indexes
            .get(index)
            .cloned()
            .ok_or_else(|| StoreError::IndexNotFound {
                collection: collection.to_string(),
                index: index.to_string(),
            })
    }

    /// Sequence numbers of the rows inside `range`, in range order.
    fn range_seqs(&self, fields: &[String], range: &IndexRange) -> Vec<u64> {
        let mut keyed: Vec<(Vec<Value>, u64)> = self
            .rows
            .iter()
            .map(|(seq, doc)| (query::index_key(doc, fields), *seq))
            .filter(|(key, _)| range.contains(key))
            .collect();

        keyed.sort_by(|(a, a_seq), (b, b_seq)| {
            query::compare_keys(a, b).then_with(|| a_seq.cmp(b_seq))
        });
        if range.order == Order::Desc {
            keyed.reverse();
        }

        keyed.into_iter().map(|(_, seq)| seq).collect()
    }
}

fn missing(collection: &Collection) -> StoreError {
    StoreError::CollectionNotFound(collection.to_string())
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn collections(&self, database: &str) -> StoreResult<Vec<String>> {
        let tables = self.tables.lock().await;
        let mut names: Vec<String> = tables
            .keys()
            .filter(|collection| collection.database == database)
            .map(|collection| collection.name.clone())
            .collect();
        names.sort();
        Ok(names)
    }

    async fn create_collection(&self, collection: &Collection) -> StoreResult<()> {
        let mut tables = self.tables.lock().await;
        tables.entry(collection.clone()).or_default();
        debug!("memory store: collection {} ready", collection);
        Ok(())
    }

    async fn indexes(&self, collection: &Collection) -> StoreResult<Vec<String>> {
        let tables = self.tables.lock().await;
        let table = tables.get(collection).ok_or_else(|| missing(collection))?;
        let mut names: Vec<String> = table.indexes.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    async fn create_index(&self, collection: &Collection, index: &IndexSpec) -> StoreResult<()> {
        let mut tables = self.tables.lock().await;
        let table = tables.get_mut(collection).ok_or_else(|| missing(collection))?;
        table
            .indexes
            .insert(index.name.clone(), index.fields.clone());
        Ok(())
    }

    async fn wait_for_index(&self, collection: &Collection, name: &str) -> StoreResult<()> {
        let tables = self.tables.lock().await;
        let table = tables.get(collection).ok_or_else(|| missing(collection))?;
        table.index_fields(collection, name).map(|_| ())
    }

    async fn insert(&self, collection: &Collection, mut document: Document) -> StoreResult<Document> {
        let mut tables = self.tables.lock().await;
        let table = tables.get_mut(collection).ok_or_else(|| missing(collection))?;

        let id = match document.get(ID_FIELD) {
            Some(Value::String(id)) => id.clone(),
            Some(_) => {
                return Err(StoreError::InvalidDocument("`id` must be a string".into()));
            }
            None => Uuid::new_v4().to_string(),
        };
        if table.ids.contains_key(&id) {
            return Err(StoreError::InvalidDocument(format!(
                "duplicate primary key `{}`",
                id
            )));
        }
        document.insert(ID_FIELD.to_string(), Value::String(id.clone()));

        let seq = table.next_seq;
        table.next_seq += 1;
        table.ids.insert(id, seq);
        table.rows.insert(seq, document.clone());

        self.hub.publish(collection, None, Some(document.clone()));
        Ok(document)
    }

    async fn get(&self, collection: &Collection, id: &str) -> StoreResult<Option<Document>> {
        let tables = self.tables.lock().await;
        let table = tables.get(collection).ok_or_else(|| missing(collection))?;
        Ok(table
            .ids
            .get(id)
            .and_then(|seq| table.rows.get(seq))
            .cloned())
    }

    async fn update(
        &self,
        collection: &Collection,
        id: &str,
        patch: Document,
    ) -> StoreResult<UpdateResult> {
        let mut tables = self.tables.lock().await;
        let table = tables.get_mut(collection).ok_or_else(|| missing(collection))?;

        let Some(document) = table.ids.get(id).and_then(|seq| table.rows.get_mut(seq)) else {
            return Ok(UpdateResult::default());
        };

        let before = document.clone();
        if !merge_patch(document, patch)? {
            return Ok(UpdateResult {
                replaced: 0,
                unchanged: 1,
            });
        }

        self.hub.publish(collection, Some(before), Some(document.clone()));
        Ok(UpdateResult {
            replaced: 1,
            unchanged: 0,
        })
    }

    async fn delete(&self, collection: &Collection, id: &str) -> StoreResult<DeleteResult> {
        let mut tables = self.tables.lock().await;
        let table = tables.get_mut(collection).ok_or_else(|| missing(collection))?;

        let Some(seq) = table.ids.remove(id) else {
            return Ok(DeleteResult::default());
        };
        if let Some(old) = table.rows.remove(&seq) {
            self.hub.publish(collection, Some(old), None);
        }
        Ok(DeleteResult { deleted: 1 })
    }

    async fn delete_range(
        &self,
        collection: &Collection,
        range: &IndexRange,
    ) -> StoreResult<DeleteResult> {
        let mut tables = self.tables.lock().await;
        let table = tables.get_mut(collection).ok_or_else(|| missing(collection))?;
        let fields = table.index_fields(collection, &range.index)?;

        let mut deleted = 0;
        for seq in table.range_seqs(&fields, range) {
            let Some(old) = table.rows.remove(&seq) else {
                continue;
            };
            if let Some(Value::String(id)) = old.get(ID_FIELD) {
                table.ids.remove(id);
            }
            deleted += 1;
            self.hub.publish(collection, Some(old), None);
        }

        Ok(DeleteResult { deleted })
    }

    async fn scan(&self, collection: &Collection, query: &Query) -> StoreResult<DocumentCursor> {
        let tables = self.tables.lock().await;
        let table = tables.get(collection).ok_or_else(|| missing(collection))?;

        let snapshot: Vec<Document> = match &query.range {
            Some(range) => {
                let fields = table.index_fields(collection, &range.index)?;
                table
                    .range_seqs(&fields, range)
                    .into_iter()
                    .filter_map(|seq| table.rows.get(&seq).cloned())
                    .collect()
            }
            None => table.rows.values().cloned().collect(),
        };

        let cursor = futures::stream::iter(snapshot.into_iter().map(Ok)).boxed();
        Ok(query::refine(cursor, query))
    }

    async fn changes(&self, collection: &Collection, query: &Query) -> StoreResult<ChangeFeed> {
        let tables = self.tables.lock().await;
        let table = tables.get(collection).ok_or_else(|| missing(collection))?;

        let key_fields = match &query.range {
            Some(range) => table.index_fields(collection, &range.index)?,
            None => Vec::new(),
        };
        Ok(self.hub.subscribe(collection, query, key_fields))
    }
}
