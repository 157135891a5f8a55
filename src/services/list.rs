//! Queries over completed file records.

use regex::Regex;
use serde_json::{Value, json};

use super::bucket::{Bucket, FILE_INDEX, FileCursor};
use crate::errors::GridResult;
use crate::models::{FileStatus, Metadata, file};
use crate::store::{Filter, IndexRange, Order, Query};

/// Pagination and direction of a list call. Zero means no skip and no limit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ListOptions {
    pub skip: usize,
    pub limit: usize,
    pub descending: bool,
}

impl ListOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_skip(mut self, skip: usize) -> Self {
        self.skip = skip;
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn descending(mut self) -> Self {
        self.descending = true;
        self
    }

    fn order(&self) -> Order {
        if self.descending { Order::Desc } else { Order::Asc }
    }

    fn paginate(&self, query: Query) -> Query {
        page(query, self.skip, self.limit)
    }
}

fn page(query: Query, skip: usize, limit: usize) -> Query {
    let query = query.skip(skip);
    if limit > 0 { query.limit(limit) } else { query }
}

/// Which completed records a list or watch call covers.
#[derive(Debug, Clone)]
pub(crate) enum FileScope {
    /// Filenames matched by a regular expression, in filename order.
    Pattern(Regex),
    /// One filename, in completion order.
    Filename(String),
    /// Records whose metadata equals the given object.
    Metadata(Metadata),
}

impl FileScope {
    pub(crate) fn pattern(pattern: &str) -> GridResult<Self> {
        Ok(FileScope::Pattern(Regex::new(pattern)?))
    }

    pub(crate) fn query(&self, order: Order) -> Query {
        let complete = json!(FileStatus::Complete);
        match self {
            FileScope::Pattern(regex) => {
                Query::range(IndexRange::prefix(FILE_INDEX, vec![complete]).ordered(order))
                    .filter(Filter::Matches(file::FILENAME.into(), regex.clone()))
            }
            FileScope::Filename(filename) => Query::range(
                IndexRange::prefix(FILE_INDEX, vec![complete, json!(filename)]).ordered(order),
            ),
            FileScope::Metadata(metadata) => Query::all()
                .filter(Filter::Eq(file::METADATA.into(), Value::Object(metadata.clone())))
                .filter(Filter::Eq(file::STATUS.into(), complete)),
        }
    }
}

impl Bucket {
    /// Completed files whose name matches the regular expression `pattern`.
    pub async fn list_by_pattern(
        &self,
        pattern: &str,
        options: ListOptions,
    ) -> GridResult<FileCursor> {
        let query = FileScope::pattern(pattern)?.query(options.order());
        self.scan_files(&options.paginate(query)).await
    }

    /// Completed revisions of `filename`, oldest first unless descending.
    pub async fn list_by_filename(
        &self,
        filename: &str,
        options: ListOptions,
    ) -> GridResult<FileCursor> {
        let query = FileScope::Filename(filename.to_string()).query(options.order());
        self.scan_files(&options.paginate(query)).await
    }

    /// Completed files whose metadata equals `metadata`. Order is unspecified.
    pub async fn list_by_metadata(
        &self,
        metadata: &Metadata,
        skip: usize,
        limit: usize,
    ) -> GridResult<FileCursor> {
        let query = FileScope::Metadata(metadata.clone()).query(Order::Asc);
        self.scan_files(&page(query, skip, limit)).await
    }
}
