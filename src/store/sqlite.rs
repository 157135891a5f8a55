//! SQLite-backed [`DocumentStore`].
//!
//! Each collection is a table `"<database>__<collection>"` holding one JSON
//! document per row. Compound indexes are expression indexes over
//! `json_extract(doc, '$.<field>')`; their field lists are recorded in
//! `_grid_indexes` so range scans can be rebuilt from the index name.
//! Scans page through the result in fixed batches, so a cursor never holds a
//! connection between polls. Change notifications are published in-process
//! after each committed write: writes from other processes sharing the file
//! are not observed.

use std::collections::VecDeque;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool, Transaction};
use tracing::debug;
use uuid::Uuid;

use super::feed::ChangeHub;
use super::query::{self, IndexRange, KeyBound, Order, Query};
use super::{
    ChangeFeed, Collection, DeleteResult, Document, DocumentCursor, DocumentStore, ID_FIELD,
    IndexSpec, StoreError, StoreResult, UpdateResult, merge_patch,
};
use crate::config::StoreConfig;

const INDEX_TABLE: &str = "_grid_indexes";
const SCAN_BATCH: i64 = 64;

#[derive(Debug)]
pub struct SqliteStore {
    pool: SqlitePool,
    hub: ChangeHub,
}

impl SqliteStore {
    /// Open (creating if needed) the database named by `config`.
    pub async fn connect(config: &StoreConfig) -> StoreResult<Self> {
        let mut pool_options = SqlitePoolOptions::new().max_connections(config.max_connections);

        if config.is_in_memory() {
            // Every connection to `:memory:` is its own database, so pin one.
            pool_options = pool_options
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None);
        } else {
            let db_path = config
                .database_url
                .trim_start_matches("sqlite://")
                .trim_start_matches("sqlite:")
                .trim_start_matches("file:");
            let db_path = db_path.split_once('?').map_or(db_path, |(path, _)| path);
            if let Some(parent) = Path::new(db_path).parent() {
                if !parent.as_os_str().is_empty() && !parent.exists() {
                    tokio::fs::create_dir_all(parent).await?;
                    debug!("created missing directory {:?}", parent);
                }
            }
        }

        let options = SqliteConnectOptions::from_str(&config.database_url)?.create_if_missing(true);
        let pool = pool_options.connect_with(options).await?;
        Self::from_pool(pool).await
    }

    /// Wrap an existing pool, creating the bookkeeping table if absent.
    pub async fn from_pool(pool: SqlitePool) -> StoreResult<Self> {
        let store = Self {
            pool,
            hub: ChangeHub::default(),
        };
        store.migrate().await?;
        Ok(store)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn migrate(&self) -> StoreResult<()> {
        sqlx::query(&format!(
            "CREATE TABLE IF NOT EXISTS {} (
                collection TEXT NOT NULL,
                name       TEXT NOT NULL,
                fields     TEXT NOT NULL,
                PRIMARY KEY (collection, name)
            )",
            INDEX_TABLE
        ))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Read-modify-write transactions take the write lock up front. A
    /// deferred transaction that read first fails with SQLITE_BUSY on upgrade
    /// instead of waiting out the busy timeout.
    async fn begin_write(&self) -> StoreResult<Transaction<'static, Sqlite>> {
        Ok(self.pool.begin_with("BEGIN IMMEDIATE").await?)
    }

    async fn index_fields(&self, table: &str, index: &str) -> StoreResult<Vec<String>> {
        let row = sqlx::query(&format!(
            "SELECT fields FROM {} WHERE collection = ? AND name = ?",
            INDEX_TABLE
        ))
        .bind(table)
        .bind(index)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                let fields: String = row.try_get("fields")?;
                Ok(serde_json::from_str(&fields)?)
            }
            None => Err(StoreError::IndexNotFound {
                collection: table.to_string(),
                index: index.to_string(),
            }),
        }
    }
}

#[async_trait]
impl DocumentStore for SqliteStore {
    async fn collections(&self, database: &str) -> StoreResult<Vec<String>> {
        ensure_identifier(database)?;
        let prefix = format!("{}__", database);

        let rows = sqlx::query("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")
            .fetch_all(&self.pool)
            .await?;

        let mut names = Vec::new();
        for row in rows {
            let name: String = row.try_get("name")?;
            if let Some(collection) = name.strip_prefix(&prefix) {
                names.push(collection.to_string());
            }
        }
        Ok(names)
    }

    async fn create_collection(&self, collection: &Collection) -> StoreResult<()> {
        let table = table_name(collection)?;
        sqlx::query(&format!(
            "CREATE TABLE IF NOT EXISTS {} (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id  TEXT NOT NULL UNIQUE,
                doc TEXT NOT NULL
            )",
            quote(&table)
        ))
        .execute(&self.pool)
        .await?;
        debug!("sqlite store: table {} ready", table);
        Ok(())
    }

    async fn indexes(&self, collection: &Collection) -> StoreResult<Vec<String>> {
        let table = table_name(collection)?;
        let rows = sqlx::query(&format!(
            "SELECT name FROM {} WHERE collection = ? ORDER BY name",
            INDEX_TABLE
        ))
        .bind(&table)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| row.try_get::<String, _>("name").map_err(StoreError::from))
            .collect()
    }

    async fn create_index(&self, collection: &Collection, index: &IndexSpec) -> StoreResult<()> {
        let table = table_name(collection)?;
        ensure_identifier(&index.name)?;
        for field in &index.fields {
            ensure_identifier(field)?;
        }

        let exprs = index
            .fields
            .iter()
            .map(|field| key_expr(field))
            .collect::<Vec<_>>()
            .join(", ");

        let mut tx = self.begin_write().await?;
        sqlx::query(&format!(
            "CREATE INDEX IF NOT EXISTS {} ON {} ({})",
            quote(&format!("{}__{}", table, index.name)),
            quote(&table),
            exprs
        ))
        .execute(&mut *tx)
        .await?;
        sqlx::query(&format!(
            "INSERT OR REPLACE INTO {} (collection, name, fields) VALUES (?, ?, ?)",
            INDEX_TABLE
        ))
        .bind(&table)
        .bind(&index.name)
        .bind(serde_json::to_string(&index.fields)?)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        Ok(())
    }

    async fn wait_for_index(&self, collection: &Collection, name: &str) -> StoreResult<()> {
        // SQLite builds indexes synchronously inside CREATE INDEX.
        let table = table_name(collection)?;
        self.index_fields(&table, name).await.map(|_| ())
    }

    async fn insert(&self, collection: &Collection, mut document: Document) -> StoreResult<Document> {
        let table = table_name(collection)?;
        let id = match document.get(ID_FIELD) {
            Some(Value::String(id)) => id.clone(),
            Some(_) => {
                return Err(StoreError::InvalidDocument("`id` must be a string".into()));
            }
            None => Uuid::new_v4().to_string(),
        };
        document.insert(ID_FIELD.to_string(), Value::String(id.clone()));

        let result = sqlx::query(&format!("INSERT INTO {} (id, doc) VALUES (?, ?)", quote(&table)))
            .bind(&id)
            .bind(serde_json::to_string(&document)?)
            .execute(&self.pool)
            .await;

        match result {
            Ok(_) => {
                self.hub.publish(collection, None, Some(document.clone()));
                Ok(document)
            }
            Err(err) if is_unique_violation(&err) => Err(StoreError::InvalidDocument(format!(
                "duplicate primary key `{}`",
                id
            ))),
            Err(err) => Err(StoreError::Sqlx(err)),
        }
    }

    async fn get(&self, collection: &Collection, id: &str) -> StoreResult<Option<Document>> {
        let table = table_name(collection)?;
        let row = sqlx::query(&format!("SELECT doc FROM {} WHERE id = ?", quote(&table)))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(parse_document).transpose()
    }

    async fn update(
        &self,
        collection: &Collection,
        id: &str,
        patch: Document,
    ) -> StoreResult<UpdateResult> {
        let table = table_name(collection)?;
        let mut tx = self.begin_write().await?;

        let row = sqlx::query(&format!("SELECT doc FROM {} WHERE id = ?", quote(&table)))
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?;
        let Some(row) = row else {
            return Ok(UpdateResult::default());
        };

        let before = parse_document(&row)?;
        let mut after = before.clone();
        if !merge_patch(&mut after, patch)? {
            return Ok(UpdateResult {
                replaced: 0,
                unchanged: 1,
            });
        }

        sqlx::query(&format!("UPDATE {} SET doc = ? WHERE id = ?", quote(&table)))
            .bind(serde_json::to_string(&after)?)
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        self.hub.publish(collection, Some(before), Some(after));
        Ok(UpdateResult {
            replaced: 1,
            unchanged: 0,
        })
    }

    async fn delete(&self, collection: &Collection, id: &str) -> StoreResult<DeleteResult> {
        let table = table_name(collection)?;
        let mut tx = self.begin_write().await?;

        let row = sqlx::query(&format!("SELECT doc FROM {} WHERE id = ?", quote(&table)))
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?;
        let Some(row) = row else {
            return Ok(DeleteResult::default());
        };
        let before = parse_document(&row)?;

        let result = sqlx::query(&format!("DELETE FROM {} WHERE id = ?", quote(&table)))
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        if result.rows_affected() > 0 {
            self.hub.publish(collection, Some(before), None);
        }
        Ok(DeleteResult {
            deleted: result.rows_affected(),
        })
    }

    async fn delete_range(
        &self,
        collection: &Collection,
        range: &IndexRange,
    ) -> StoreResult<DeleteResult> {
        let table = table_name(collection)?;
        let fields = self.index_fields(&table, &range.index).await?;
        let mut tx = self.begin_write().await?;

        let mut select = QueryBuilder::<Sqlite>::new(format!(
            "SELECT doc FROM {} WHERE 1 = 1",
            quote(&table)
        ));
        push_range(&mut select, &fields, range);
        let rows = select.build().fetch_all(&mut *tx).await?;
        let removed = rows
            .iter()
            .map(parse_document)
            .collect::<StoreResult<Vec<_>>>()?;

        let mut delete =
            QueryBuilder::<Sqlite>::new(format!("DELETE FROM {} WHERE 1 = 1", quote(&table)));
        push_range(&mut delete, &fields, range);
        let result = delete.build().execute(&mut *tx).await?;
        tx.commit().await?;

        for old in removed {
            self.hub.publish(collection, Some(old), None);
        }
        Ok(DeleteResult {
            deleted: result.rows_affected(),
        })
    }

    async fn scan(&self, collection: &Collection, query: &Query) -> StoreResult<DocumentCursor> {
        let table = table_name(collection)?;
        let fields = match &query.range {
            Some(range) => self.index_fields(&table, &range.index).await?,
            None => Vec::new(),
        };

        let state = ScanState {
            pool: self.pool.clone(),
            plan: Arc::new(ScanPlan {
                table,
                fields,
                range: query.range.clone(),
            }),
            last: None,
            buffer: VecDeque::new(),
            done: false,
        };

        let cursor = futures::stream::unfold(state, |mut state| async move {
            loop {
                if let Some(document) = state.buffer.pop_front() {
                    return Some((Ok(document), state));
                }
                if state.done {
                    return None;
                }
                if let Err(err) = state.fetch_batch().await {
                    state.done = true;
                    return Some((Err(err), state));
                }
            }
        })
        .boxed();

        Ok(query::refine(cursor, query))
    }

    async fn changes(&self, collection: &Collection, query: &Query) -> StoreResult<ChangeFeed> {
        let table = table_name(collection)?;
        let key_fields = match &query.range {
            Some(range) => self.index_fields(&table, &range.index).await?,
            None => Vec::new(),
        };
        Ok(self.hub.subscribe(collection, query, key_fields))
    }
}

#[derive(Debug)]
struct ScanPlan {
    table: String,
    fields: Vec<String>,
    range: Option<IndexRange>,
}

impl ScanPlan {
    fn order(&self) -> Order {
        self.range.as_ref().map_or(Order::Asc, |range| range.order)
    }
}

/// Position of the last row handed out: its index key and insertion sequence.
struct ScanMark {
    key: Vec<Value>,
    seq: i64,
}

struct ScanState {
    pool: SqlitePool,
    plan: Arc<ScanPlan>,
    last: Option<ScanMark>,
    buffer: VecDeque<Document>,
    done: bool,
}

impl ScanState {
    /// Fetch the next batch strictly after the last row seen, so writes
    /// committed between batches never shift the cursor.
    async fn fetch_batch(&mut self) -> StoreResult<()> {
        let plan = &self.plan;
        let order = plan.order();
        let direction = match order {
            Order::Asc => "ASC",
            Order::Desc => "DESC",
        };

        let mut builder = QueryBuilder::<Sqlite>::new(format!(
            "SELECT seq, doc FROM {} WHERE 1 = 1",
            quote(&plan.table)
        ));
        if let Some(range) = &plan.range {
            push_range(&mut builder, &plan.fields, range);
        }
        if let Some(mark) = &self.last {
            push_after(&mut builder, &plan.fields, order, mark);
        }

        builder.push(" ORDER BY ");
        for field in &plan.fields {
            builder.push(format!("{} {}, ", key_expr(field), direction));
        }
        builder.push(format!("seq {} LIMIT ", direction));
        builder.push_bind(SCAN_BATCH);

        let rows = builder.build().fetch_all(&self.pool).await?;
        if (rows.len() as i64) < SCAN_BATCH {
            self.done = true;
        }
        for row in &rows {
            let document = parse_document(row)?;
            self.last = Some(ScanMark {
                key: query::index_key(&document, &plan.fields),
                seq: row.try_get("seq")?,
            });
            self.buffer.push_back(document);
        }
        Ok(())
    }
}

/// Restrict to rows after `mark` in scan order, comparing `(key.., seq)`
/// lexicographically. NULL sorts first, as in SQLite's ORDER BY.
fn push_after(
    builder: &mut QueryBuilder<'_, Sqlite>,
    fields: &[String],
    order: Order,
    mark: &ScanMark,
) {
    builder.push(" AND (");
    for (position, field) in fields.iter().enumerate() {
        builder.push("(");
        push_equal_prefix(builder, &fields[..position], &mark.key);
        push_beyond(builder, &key_expr(field), &mark.key[position], order);
        builder.push(") OR ");
    }
    builder.push("(");
    push_equal_prefix(builder, fields, &mark.key);
    builder.push(match order {
        Order::Asc => "seq > ",
        Order::Desc => "seq < ",
    });
    builder.push_bind(mark.seq);
    builder.push("))");
}

fn push_equal_prefix(builder: &mut QueryBuilder<'_, Sqlite>, fields: &[String], key: &[Value]) {
    for (field, value) in fields.iter().zip(key) {
        builder.push(format!("{} IS ", key_expr(field)));
        push_value(builder, value.clone());
        builder.push(" AND ");
    }
}

fn push_beyond(builder: &mut QueryBuilder<'_, Sqlite>, expr: &str, value: &Value, order: Order) {
    match (order, value) {
        (Order::Asc, Value::Null) => {
            builder.push(format!("{} IS NOT NULL", expr));
        }
        (Order::Asc, value) => {
            builder.push(format!("{} > ", expr));
            push_value(builder, value.clone());
        }
        (Order::Desc, Value::Null) => {
            builder.push("0");
        }
        (Order::Desc, value) => {
            builder.push(format!("({} IS NULL OR {} < ", expr, expr));
            push_value(builder, value.clone());
            builder.push(")");
        }
    }
}

/// Append the range conditions. Comparisons stop at the first sentinel: a
/// lower bound ending in `Max` or an upper bound ending in `Min` is strict.
fn push_range(builder: &mut QueryBuilder<'_, Sqlite>, fields: &[String], range: &IndexRange) {
    push_bound(builder, fields, &range.lower, ">", KeyBound::Max);
    push_bound(builder, fields, &range.upper, "<", KeyBound::Min);
}

fn push_bound(
    builder: &mut QueryBuilder<'_, Sqlite>,
    fields: &[String],
    bound: &[KeyBound],
    operator: &str,
    strict_sentinel: KeyBound,
) {
    let mut values = Vec::new();
    let mut strict = false;
    for component in bound {
        match component {
            KeyBound::Value(value) => values.push(value.clone()),
            sentinel => {
                strict = *sentinel == strict_sentinel;
                break;
            }
        }
    }
    values.truncate(fields.len());
    if values.is_empty() {
        return;
    }

    let exprs = fields[..values.len()]
        .iter()
        .map(|field| key_expr(field))
        .collect::<Vec<_>>()
        .join(", ");
    builder.push(format!(
        " AND ({}) {}{} (",
        exprs,
        operator,
        if strict { "" } else { "=" }
    ));
    for (position, value) in values.into_iter().enumerate() {
        if position > 0 {
            builder.push(", ");
        }
        push_value(builder, value);
    }
    builder.push(")");
}

/// Bind a JSON value the way `json_extract` would return it.
fn push_value(builder: &mut QueryBuilder<'_, Sqlite>, value: Value) {
    match value {
        Value::Null => {
            builder.push("NULL");
        }
        Value::Bool(flag) => {
            builder.push_bind(i64::from(flag));
        }
        Value::Number(number) => match number.as_i64() {
            Some(int) => {
                builder.push_bind(int);
            }
            None => {
                builder.push_bind(number.as_f64().unwrap_or_default());
            }
        },
        Value::String(text) => {
            builder.push_bind(text);
        }
        other => {
            builder.push_bind(other.to_string());
        }
    }
}

fn parse_document(row: &SqliteRow) -> StoreResult<Document> {
    let text: String = row.try_get("doc")?;
    Ok(serde_json::from_str(&text)?)
}

fn key_expr(field: &str) -> String {
    format!("json_extract(doc, '$.{}')", field)
}

fn quote(identifier: &str) -> String {
    format!("\"{}\"", identifier)
}

fn table_name(collection: &Collection) -> StoreResult<String> {
    ensure_identifier(&collection.database)?;
    ensure_identifier(&collection.name)?;
    Ok(format!("{}__{}", collection.database, collection.name))
}

/// Identifiers are spliced into SQL, so only a conservative alphabet passes.
fn ensure_identifier(identifier: &str) -> StoreResult<()> {
    let valid = !identifier.is_empty()
        && identifier
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidIdentifier(identifier.to_string()))
    }
}

/// Return true if SQLx error indicates a unique constraint violation.
fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db_err) if db_err.message().to_ascii_lowercase().contains("unique")
    )
}
