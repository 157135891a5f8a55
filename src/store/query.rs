//! Query vocabulary shared by every store adapter.
//!
//! Adapters may push range evaluation down into their engine, but the
//! semantics are pinned here: [`compare_values`] defines the total order over
//! JSON values, [`IndexRange::contains`] the range membership test, and
//! [`Matcher`] the before/after projection used by change feeds.

use std::cmp::Ordering;
use std::future;

use futures::{StreamExt, TryStreamExt};
use regex::Regex;
use serde_json::Value;

use super::{Change, Document, DocumentCursor};

/// Direction of an ordered scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Order {
    #[default]
    Asc,
    Desc,
}

/// One component of a compound range bound.
///
/// `Min` and `Max` are open-ended sentinels: once one is reached the
/// remaining components are not compared.
#[derive(Debug, Clone, PartialEq)]
pub enum KeyBound {
    Min,
    Value(Value),
    Max,
}

/// Inclusive range over a named compound index.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexRange {
    pub index: String,
    pub lower: Vec<KeyBound>,
    pub upper: Vec<KeyBound>,
    pub order: Order,
}

impl IndexRange {
    /// Every key that starts with `prefix`.
    pub fn prefix(index: impl Into<String>, prefix: Vec<Value>) -> Self {
        let lower = prefix
            .iter()
            .cloned()
            .map(KeyBound::Value)
            .chain(std::iter::once(KeyBound::Min))
            .collect();
        let upper = prefix
            .into_iter()
            .map(KeyBound::Value)
            .chain(std::iter::once(KeyBound::Max))
            .collect();

        Self {
            index: index.into(),
            lower,
            upper,
            order: Order::Asc,
        }
    }

    pub fn ordered(mut self, order: Order) -> Self {
        self.order = order;
        self
    }

    pub fn contains(&self, key: &[Value]) -> bool {
        compare_to_bound(key, &self.lower) != Ordering::Less
            && compare_to_bound(key, &self.upper) != Ordering::Greater
    }
}

/// Post-scan predicate over a document field.
#[derive(Debug, Clone)]
pub enum Filter {
    /// Field equals the value (objects compare structurally).
    Eq(String, Value),
    /// Field is a string matched by the regular expression.
    Matches(String, Regex),
}

impl Filter {
    pub fn matches(&self, document: &Document) -> bool {
        match self {
            Filter::Eq(field, value) => document.get(field).unwrap_or(&Value::Null) == value,
            Filter::Matches(field, regex) => document
                .get(field)
                .and_then(Value::as_str)
                .is_some_and(|text| regex.is_match(text)),
        }
    }
}

/// A scan or change-feed scope.
///
/// Without a range the scan walks the collection in natural (insertion)
/// order. `skip` is applied after filtering and before `limit`.
#[derive(Debug, Clone, Default)]
pub struct Query {
    pub range: Option<IndexRange>,
    pub filters: Vec<Filter>,
    pub skip: usize,
    pub limit: Option<usize>,
}

impl Query {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn range(range: IndexRange) -> Self {
        Self {
            range: Some(range),
            ..Self::default()
        }
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn skip(mut self, skip: usize) -> Self {
        self.skip = skip;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// A query bound to the field list of its index.
#[derive(Debug, Clone)]
pub struct Matcher {
    key_fields: Vec<String>,
    range: Option<IndexRange>,
    filters: Vec<Filter>,
}

impl Matcher {
    /// `key_fields` must be the fields of `query.range.index` (empty when the
    /// query has no range).
    pub fn new(query: &Query, key_fields: Vec<String>) -> Self {
        Self {
            key_fields,
            range: query.range.clone(),
            filters: query.filters.clone(),
        }
    }

    pub fn matches(&self, document: &Document) -> bool {
        let in_range = match &self.range {
            Some(range) => range.contains(&index_key(document, &self.key_fields)),
            None => true,
        };
        in_range && self.filters.iter().all(|filter| filter.matches(document))
    }

    /// Project a raw before/after pair onto this scope. A side that falls
    /// outside the scope is reported as absent; `None` when neither matches.
    pub fn project(&self, old_val: Option<&Document>, new_val: Option<&Document>) -> Option<Change> {
        let old_val = old_val.filter(|doc| self.matches(doc)).cloned();
        let new_val = new_val.filter(|doc| self.matches(doc)).cloned();
        if old_val.is_none() && new_val.is_none() {
            return None;
        }
        Some(Change { old_val, new_val })
    }
}

/// Extract the compound key of `document`; missing fields become `null`.
pub fn index_key(document: &Document, fields: &[String]) -> Vec<Value> {
    fields
        .iter()
        .map(|field| document.get(field).cloned().unwrap_or(Value::Null))
        .collect()
}

/// Compare two compound keys component by component.
pub fn compare_keys(a: &[Value], b: &[Value]) -> Ordering {
    for (left, right) in a.iter().zip(b) {
        match compare_values(left, right) {
            Ordering::Equal => continue,
            other => return other,
        }
    }
    a.len().cmp(&b.len())
}

fn compare_to_bound(key: &[Value], bound: &[KeyBound]) -> Ordering {
    for (position, component) in bound.iter().enumerate() {
        match component {
            KeyBound::Min => return Ordering::Greater,
            KeyBound::Max => return Ordering::Less,
            KeyBound::Value(value) => {
                let Some(part) = key.get(position) else {
                    return Ordering::Less;
                };
                match compare_values(part, value) {
                    Ordering::Equal => continue,
                    other => return other,
                }
            }
        }
    }
    Ordering::Equal
}

/// Total order over JSON values: null < bool < number < string < array < object.
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    fn rank(value: &Value) -> u8 {
        match value {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Number(_) => 2,
            Value::String(_) => 3,
            Value::Array(_) => 4,
            Value::Object(_) => 5,
        }
    }

    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => x.cmp(&y),
            _ => {
                let x = x.as_f64().unwrap_or(f64::NAN);
                let y = y.as_f64().unwrap_or(f64::NAN);
                x.total_cmp(&y)
            }
        },
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Array(x), Value::Array(y)) => compare_keys(x, y),
        (Value::Object(x), Value::Object(y)) => {
            let x = Value::Object(x.clone()).to_string();
            let y = Value::Object(y.clone()).to_string();
            x.cmp(&y)
        }
        _ => rank(a).cmp(&rank(b)),
    }
}

/// Apply filters, skip and limit lazily on top of an ordered cursor.
pub(crate) fn refine(cursor: DocumentCursor, query: &Query) -> DocumentCursor {
    let filters = query.filters.clone();
    let skip = query.skip;
    let mut skipped = 0;

    let refined = cursor
        .try_filter(move |doc| future::ready(filters.iter().all(|filter| filter.matches(doc))))
        .try_skip_while(move |_| {
            let skip_this = skipped < skip;
            if skip_this {
                skipped += 1;
            }
            future::ready(Ok(skip_this))
        });

    match query.limit {
        Some(limit) => refined.take(limit).boxed(),
        None => refined.boxed(),
    }
}
