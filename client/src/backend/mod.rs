//! Seams to the hosted backend: data API, realtime bus and object storage.

mod memory;

pub use memory::MemoryBackend;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reelchat_messaging::Row;
use serde_json::Value;
use std::cmp::Ordering;
use tokio::sync::mpsc;

pub type BackendResult<T> = Result<T, BackendError>;

#[derive(Debug, Clone, thiserror::Error)]
pub enum BackendError {
    #[error("network error: {0}")]
    Network(String),
    #[error("rejected by backend: {0}")]
    Rejected(String),
    #[error("record not found")]
    NotFound,
    #[error("subscription failed: {0}")]
    Subscribe(String),
    #[error("request timed out")]
    Timeout,
}

/// Tables the client reads and writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    Profiles,
    Conversations,
    Messages,
    Posts,
    PostLikes,
    Comments,
    CommentLikes,
    Follows,
    Notifications,
}

impl Table {
    pub fn name(self) -> &'static str {
        match self {
            Self::Profiles => "profiles",
            Self::Conversations => "conversations",
            Self::Messages => "messages",
            Self::Posts => "posts",
            Self::PostLikes => "post_likes",
            Self::Comments => "comments",
            Self::CommentLikes => "comment_likes",
            Self::Follows => "follows",
            Self::Notifications => "notifications",
        }
    }
}

/// Row predicate, mirroring the operators the hosted data API understands.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Eq(String, Value),
    Neq(String, Value),
    IsNull(String),
    Gte(String, Value),
    Lt(String, Value),
    In(String, Vec<Value>),
    /// Case-insensitive pattern where `%` matches any run of characters.
    ILike(String, String),
    /// Any of the inner conjunctions.
    Or(Vec<Vec<Filter>>),
}

impl Filter {
    pub fn eq(column: &str, value: impl Into<Value>) -> Self {
        Self::Eq(column.to_string(), value.into())
    }

    pub fn neq(column: &str, value: impl Into<Value>) -> Self {
        Self::Neq(column.to_string(), value.into())
    }

    pub fn is_null(column: &str) -> Self {
        Self::IsNull(column.to_string())
    }

    pub fn gte(column: &str, value: impl Into<Value>) -> Self {
        Self::Gte(column.to_string(), value.into())
    }

    pub fn lt(column: &str, value: impl Into<Value>) -> Self {
        Self::Lt(column.to_string(), value.into())
    }

    pub fn any_of(column: &str, values: impl IntoIterator<Item = Value>) -> Self {
        Self::In(column.to_string(), values.into_iter().collect())
    }

    pub fn ilike(column: &str, pattern: impl Into<String>) -> Self {
        Self::ILike(column.to_string(), pattern.into())
    }

    pub fn matches(&self, row: &Row) -> bool {
        let field = |column: &str| row.get(column).unwrap_or(&Value::Null);
        match self {
            Self::Eq(column, value) => values_equal(field(column), value),
            // SQL `<>` is never true against NULL.
            Self::Neq(column, value) => {
                let actual = field(column);
                !actual.is_null() && !values_equal(actual, value)
            }
            Self::IsNull(column) => field(column).is_null(),
            Self::Gte(column, value) => matches!(
                compare_values(field(column), value),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            Self::Lt(column, value) => {
                matches!(compare_values(field(column), value), Some(Ordering::Less))
            }
            Self::In(column, values) => values.iter().any(|v| values_equal(field(column), v)),
            Self::ILike(column, pattern) => field(column)
                .as_str()
                .map(|text| ilike(text, pattern))
                .unwrap_or(false),
            Self::Or(branches) => branches
                .iter()
                .any(|branch| branch.iter().all(|filter| filter.matches(row))),
        }
    }
}

fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        (Value::Number(n), Value::String(s)) | (Value::String(s), Value::Number(n)) => {
            n.to_string() == *s
        }
        _ => left == right,
    }
}

/// Order two column values. Timestamps compare chronologically even when their
/// textual forms differ (offsets, fractional seconds).
pub fn compare_values(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(a), Value::String(b)) => {
            match (a.parse::<DateTime<Utc>>(), b.parse::<DateTime<Utc>>()) {
                (Ok(a), Ok(b)) => Some(a.cmp(&b)),
                _ => Some(a.cmp(b)),
            }
        }
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        (Value::Null, _) => Some(Ordering::Less),
        (_, Value::Null) => Some(Ordering::Greater),
        _ => None,
    }
}

fn ilike(text: &str, pattern: &str) -> bool {
    let text = text.to_lowercase();
    let pattern = pattern.to_lowercase();
    let parts: Vec<&str> = pattern.split('%').collect();
    if parts.len() == 1 {
        return text == pattern;
    }

    let mut rest = text.as_str();
    let last = parts.len() - 1;
    for (index, part) in parts.iter().enumerate() {
        if part.is_empty() {
            continue;
        }
        if index == 0 {
            match rest.strip_prefix(part) {
                Some(tail) => rest = tail,
                None => return false,
            }
        } else if index == last {
            return rest.ends_with(part);
        } else {
            match rest.find(part) {
                Some(pos) => rest = &rest[pos + part.len()..],
                None => return false,
            }
        }
    }
    true
}

#[derive(Debug, Clone, PartialEq)]
pub struct Order {
    pub column: String,
    pub ascending: bool,
}

/// Select/update/delete scope.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    pub filters: Vec<Filter>,
    pub order: Option<Order>,
    pub limit: Option<usize>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn order_by(mut self, column: &str, ascending: bool) -> Self {
        self.order = Some(Order {
            column: column.to_string(),
            ascending,
        });
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn matches(&self, row: &Row) -> bool {
        self.filters.iter().all(|filter| filter.matches(row))
    }
}

/// Request/response data API.
#[async_trait]
pub trait DataApi: Send + Sync {
    async fn select(&self, table: Table, query: &Query) -> BackendResult<Vec<Row>>;
    /// Insert one row and return it as stored (with generated columns filled in).
    async fn insert(&self, table: Table, row: Row) -> BackendResult<Row>;
    /// Patch every matching row and return the updated rows.
    async fn update(&self, table: Table, query: &Query, patch: Row) -> BackendResult<Vec<Row>>;
    /// Delete every matching row and return how many were removed.
    async fn delete(&self, table: Table, query: &Query) -> BackendResult<usize>;
    async fn count(&self, table: Table, query: &Query) -> BackendResult<u64>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RowEventKind {
    Insert,
    Update,
    Delete,
    Any,
}

impl RowEventKind {
    pub fn accepts(self, actual: RowEventKind) -> bool {
        self == RowEventKind::Any || self == actual
    }
}

/// Interest in changes to one table, optionally narrowed by an equality filter.
#[derive(Debug, Clone, PartialEq)]
pub struct RowListener {
    pub table: Table,
    pub kind: RowEventKind,
    pub filter: Option<Filter>,
}

impl RowListener {
    pub fn new(table: Table, kind: RowEventKind) -> Self {
        Self {
            table,
            kind,
            filter: None,
        }
    }

    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn accepts(&self, change: &RowChange) -> bool {
        if self.table != change.table || !self.kind.accepts(change.kind) {
            return false;
        }
        match &self.filter {
            None => true,
            Some(filter) => change.record().map(|row| filter.matches(row)).unwrap_or(false),
        }
    }
}

/// A row-level change delivered by the realtime feed.
#[derive(Debug, Clone, PartialEq)]
pub struct RowChange {
    pub table: Table,
    pub kind: RowEventKind,
    pub new: Option<Row>,
    pub old: Option<Row>,
}

impl RowChange {
    /// The row the change is about: the new image, or the old one for deletes.
    pub fn record(&self) -> Option<&Row> {
        self.new.as_ref().or(self.old.as_ref())
    }
}

/// What a channel wants delivered.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SubscriptionSpec {
    pub rows: Vec<RowListener>,
    pub broadcasts: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum BusEvent {
    Row(RowChange),
    Broadcast { event: String, payload: Value },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

/// A live subscription; events stop once it is unsubscribed.
#[derive(Debug)]
pub struct BusSubscription {
    pub id: SubscriptionId,
    pub events: mpsc::UnboundedReceiver<BusEvent>,
}

/// Publish/subscribe bus scoped to named channels. Delivery is at-least-once with no
/// ordering guarantee.
#[async_trait]
pub trait RealtimeBus: Send + Sync {
    async fn subscribe(&self, channel: &str, spec: SubscriptionSpec) -> BackendResult<BusSubscription>;
    async fn publish(&self, channel: &str, event: &str, payload: Value) -> BackendResult<()>;
    fn unsubscribe(&self, id: SubscriptionId);
}

/// Blob storage with public URLs.
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> BackendResult<()>;
    fn public_url(&self, bucket: &str, path: &str) -> String;
}

/// Build a row from `(column, value)` pairs.
pub fn row<I, K>(pairs: I) -> Row
where
    I: IntoIterator<Item = (K, Value)>,
    K: Into<String>,
{
    pairs.into_iter().map(|(k, v)| (k.into(), v)).collect()
}
