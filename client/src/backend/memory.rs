//! In-process backend used by tests and the demo binary.
//!
//! Implements the data API, realtime bus and object storage over shared memory, with
//! the server-side behaviour the client relies on: generated ids and timestamps,
//! unique keys, conversation delete cascade, row-change fan-out and broadcasts.

use super::{
    compare_values, BackendError, BackendResult, BusEvent, BusSubscription, DataApi,
    ObjectStorage, Query, RealtimeBus, RowChange, RowEventKind, SubscriptionId,
    SubscriptionSpec, Table,
};
use async_trait::async_trait;
use chrono::Utc;
use reelchat_messaging::Row;
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

const PUBLIC_URL_BASE: &str = "memory://storage";

struct Subscriber {
    channel: String,
    spec: SubscriptionSpec,
    tx: mpsc::UnboundedSender<BusEvent>,
}

#[derive(Default)]
struct Faults {
    offline: bool,
    failing_writes: usize,
    refuse_subscriptions: bool,
    drop_row_events: bool,
}

#[derive(Default)]
struct Inner {
    tables: HashMap<Table, Vec<Row>>,
    subscribers: HashMap<SubscriptionId, Subscriber>,
    next_subscription: u64,
    objects: HashMap<(String, String), (Vec<u8>, String)>,
    faults: Faults,
    row_events_delivered: usize,
}

#[derive(Clone, Default)]
pub struct MemoryBackend {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A panic while holding the lock leaves plain data behind; keep serving it.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Insert a row directly, without realtime fan-out or fault injection.
    pub fn seed(&self, table: Table, row: Row) -> Row {
        let mut inner = self.lock();
        let row = with_defaults(table, row);
        inner.tables.entry(table).or_default().push(row.clone());
        row
    }

    pub fn rows(&self, table: Table) -> Vec<Row> {
        self.lock().tables.get(&table).cloned().unwrap_or_default()
    }

    /// Every request fails with a network error while offline.
    pub fn set_offline(&self, offline: bool) {
        self.lock().faults.offline = offline;
    }

    /// Fail the next `count` inserts, updates or deletes.
    pub fn fail_next_writes(&self, count: usize) {
        self.lock().faults.failing_writes = count;
    }

    pub fn refuse_subscriptions(&self, refuse: bool) {
        self.lock().faults.refuse_subscriptions = refuse;
    }

    /// Silently drop row-change events, as a policy-filtered feed would.
    pub fn drop_row_events(&self, drop: bool) {
        self.lock().faults.drop_row_events = drop;
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().subscribers.len()
    }

    /// Row events handed to subscribers so far.
    pub fn row_events_delivered(&self) -> usize {
        self.lock().row_events_delivered
    }

    pub fn object(&self, bucket: &str, path: &str) -> Option<(Vec<u8>, String)> {
        self.lock()
            .objects
            .get(&(bucket.to_string(), path.to_string()))
            .cloned()
    }
}

impl Inner {
    fn check_online(&self) -> BackendResult<()> {
        if self.faults.offline {
            return Err(BackendError::Network("backend unreachable".into()));
        }
        Ok(())
    }

    fn check_write(&mut self) -> BackendResult<()> {
        self.check_online()?;
        if self.faults.failing_writes > 0 {
            self.faults.failing_writes -= 1;
            return Err(BackendError::Network("write dropped".into()));
        }
        Ok(())
    }

    fn emit(&mut self, change: RowChange) {
        if self.faults.drop_row_events {
            return;
        }
        self.subscribers.retain(|_, subscriber| !subscriber.tx.is_closed());
        let mut delivered = 0;
        for subscriber in self.subscribers.values() {
            for listener in &subscriber.spec.rows {
                if listener.accepts(&change) && subscriber.tx.send(BusEvent::Row(change.clone())).is_ok() {
                    delivered += 1;
                }
            }
        }
        self.row_events_delivered += delivered;
    }

    fn violates_unique(&self, table: Table, candidate: &Row) -> bool {
        let existing = self.tables.get(&table).map(Vec::as_slice).unwrap_or_default();
        let same = |row: &Row, column: &str| row.get(column) == candidate.get(column);
        match table {
            Table::PostLikes => existing
                .iter()
                .any(|row| same(row, "post_id") && same(row, "user_id")),
            Table::CommentLikes => existing
                .iter()
                .any(|row| same(row, "comment_id") && same(row, "user_id")),
            Table::Follows => existing
                .iter()
                .any(|row| same(row, "follower_id") && same(row, "following_id")),
            Table::Conversations => existing.iter().any(|row| {
                let forward = same(row, "user1_id") && same(row, "user2_id");
                let reverse = row.get("user1_id") == candidate.get("user2_id")
                    && row.get("user2_id") == candidate.get("user1_id");
                forward || reverse
            }),
            _ => existing.iter().any(|row| row.get("id") == candidate.get("id")),
        }
    }
}

fn with_defaults(table: Table, mut row: Row) -> Row {
    let keyed = !matches!(table, Table::PostLikes | Table::CommentLikes | Table::Follows);
    if keyed && !row.contains_key("id") {
        row.insert("id".into(), Value::String(Uuid::new_v4().to_string()));
    }
    if !row.contains_key("created_at") {
        row.insert("created_at".into(), Value::String(Utc::now().to_rfc3339()));
    }
    if table == Table::Messages && !row.contains_key("read_at") {
        row.insert("read_at".into(), Value::Null);
    }
    if table == Table::Notifications && !row.contains_key("read") {
        row.insert("read".into(), Value::Bool(false));
    }
    row
}

fn sorted(mut rows: Vec<Row>, query: &Query) -> Vec<Row> {
    if let Some(order) = &query.order {
        rows.sort_by(|a, b| {
            let left = a.get(&order.column).unwrap_or(&Value::Null);
            let right = b.get(&order.column).unwrap_or(&Value::Null);
            let ordering = compare_values(left, right).unwrap_or(Ordering::Equal);
            if order.ascending {
                ordering
            } else {
                ordering.reverse()
            }
        });
    }
    if let Some(limit) = query.limit {
        rows.truncate(limit);
    }
    rows
}

#[async_trait]
impl DataApi for MemoryBackend {
    async fn select(&self, table: Table, query: &Query) -> BackendResult<Vec<Row>> {
        let inner = self.lock();
        inner.check_online()?;
        let rows: Vec<Row> = inner
            .tables
            .get(&table)
            .map(|rows| rows.iter().filter(|row| query.matches(row)).cloned().collect())
            .unwrap_or_default();
        Ok(sorted(rows, query))
    }

    async fn insert(&self, table: Table, row: Row) -> BackendResult<Row> {
        let mut inner = self.lock();
        inner.check_write()?;
        let row = with_defaults(table, row);
        if inner.violates_unique(table, &row) {
            return Err(BackendError::Rejected(format!(
                "duplicate key in {}",
                table.name()
            )));
        }
        inner.tables.entry(table).or_default().push(row.clone());
        debug!(table = table.name(), "row inserted");
        inner.emit(RowChange {
            table,
            kind: RowEventKind::Insert,
            new: Some(row.clone()),
            old: None,
        });
        Ok(row)
    }

    async fn update(&self, table: Table, query: &Query, patch: Row) -> BackendResult<Vec<Row>> {
        let mut inner = self.lock();
        inner.check_write()?;
        let mut changes = Vec::new();
        if let Some(rows) = inner.tables.get_mut(&table) {
            for row in rows.iter_mut().filter(|row| query.matches(row)) {
                let old = row.clone();
                for (column, value) in &patch {
                    row.insert(column.clone(), value.clone());
                }
                changes.push((old, row.clone()));
            }
        }

        let updated: Vec<Row> = changes.iter().map(|(_, new)| new.clone()).collect();
        for (old, new) in changes {
            inner.emit(RowChange {
                table,
                kind: RowEventKind::Update,
                new: Some(new),
                old: Some(old),
            });
        }
        Ok(updated)
    }

    async fn delete(&self, table: Table, query: &Query) -> BackendResult<usize> {
        let mut inner = self.lock();
        inner.check_write()?;
        let removed: Vec<Row> = match inner.tables.get_mut(&table) {
            Some(rows) => {
                let (gone, kept): (Vec<Row>, Vec<Row>) =
                    rows.drain(..).partition(|row| query.matches(row));
                *rows = kept;
                gone
            }
            None => Vec::new(),
        };

        if table == Table::Conversations {
            let ids: Vec<Value> = removed.iter().filter_map(|row| row.get("id").cloned()).collect();
            if let Some(messages) = inner.tables.get_mut(&Table::Messages) {
                messages.retain(|message| {
                    !ids.iter().any(|id| message.get("conversation_id") == Some(id))
                });
            }
        }

        let count = removed.len();
        for old in removed {
            inner.emit(RowChange {
                table,
                kind: RowEventKind::Delete,
                new: None,
                old: Some(old),
            });
        }
        Ok(count)
    }

    async fn count(&self, table: Table, query: &Query) -> BackendResult<u64> {
        let inner = self.lock();
        inner.check_online()?;
        let count = inner
            .tables
            .get(&table)
            .map(|rows| rows.iter().filter(|row| query.matches(row)).count())
            .unwrap_or(0);
        Ok(count as u64)
    }
}

#[async_trait]
impl RealtimeBus for MemoryBackend {
    async fn subscribe(&self, channel: &str, spec: SubscriptionSpec) -> BackendResult<BusSubscription> {
        let mut inner = self.lock();
        inner.check_online()?;
        if inner.faults.refuse_subscriptions {
            return Err(BackendError::Subscribe(format!("{channel}: channel error")));
        }
        let id = SubscriptionId(inner.next_subscription);
        inner.next_subscription += 1;
        let (tx, events) = mpsc::unbounded_channel();
        inner.subscribers.insert(
            id,
            Subscriber {
                channel: channel.to_string(),
                spec,
                tx,
            },
        );
        debug!(channel, subscription = id.0, "channel subscribed");
        Ok(BusSubscription { id, events })
    }

    async fn publish(&self, channel: &str, event: &str, payload: Value) -> BackendResult<()> {
        let mut inner = self.lock();
        inner.check_online()?;
        inner.subscribers.retain(|_, subscriber| !subscriber.tx.is_closed());
        for subscriber in inner.subscribers.values() {
            if subscriber.channel == channel && subscriber.spec.broadcasts.iter().any(|e| e == event)
            {
                let _ = subscriber.tx.send(BusEvent::Broadcast {
                    event: event.to_string(),
                    payload: payload.clone(),
                });
            }
        }
        Ok(())
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        if self.lock().subscribers.remove(&id).is_some() {
            debug!(subscription = id.0, "channel unsubscribed");
        }
    }
}

#[async_trait]
impl ObjectStorage for MemoryBackend {
    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> BackendResult<()> {
        let mut inner = self.lock();
        inner.check_write()?;
        inner.objects.insert(
            (bucket.to_string(), path.to_string()),
            (bytes, content_type.to_string()),
        );
        Ok(())
    }

    fn public_url(&self, bucket: &str, path: &str) -> String {
        format!("{PUBLIC_URL_BASE}/{bucket}/{path}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{row, Filter, RowListener};
    use serde_json::json;

    #[tokio::test]
    async fn insert_fills_generated_columns() {
        let backend = MemoryBackend::new();
        let stored = backend
            .insert(Table::Messages, row([("content", json!("hi"))]))
            .await
            .unwrap();
        assert!(stored.get("id").and_then(Value::as_str).is_some());
        assert!(stored.get("created_at").is_some());
        assert_eq!(stored.get("read_at"), Some(&Value::Null));
    }

    #[tokio::test]
    async fn conversation_pairs_are_unique_in_either_order() {
        let backend = MemoryBackend::new();
        backend
            .insert(
                Table::Conversations,
                row([("user1_id", json!("a")), ("user2_id", json!("b"))]),
            )
            .await
            .unwrap();
        let err = backend
            .insert(
                Table::Conversations,
                row([("user1_id", json!("b")), ("user2_id", json!("a"))]),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::Rejected(_)));
    }

    #[tokio::test]
    async fn deleting_a_conversation_cascades_to_messages() {
        let backend = MemoryBackend::new();
        let conv = backend.seed(Table::Conversations, row([("user1_id", json!("a"))]));
        let conv_id = conv["id"].clone();
        backend.seed(Table::Messages, row([("conversation_id", conv_id.clone())]));
        backend.seed(Table::Messages, row([("conversation_id", json!("other"))]));

        let removed = backend
            .delete(Table::Conversations, &Query::new().filter(Filter::Eq("id".into(), conv_id)))
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(backend.rows(Table::Messages).len(), 1);
    }

    #[tokio::test]
    async fn row_changes_reach_matching_listeners_only() {
        let backend = MemoryBackend::new();
        let spec = SubscriptionSpec {
            rows: vec![RowListener::new(Table::Messages, RowEventKind::Insert)
                .with_filter(Filter::eq("conversation_id", "c1"))],
            broadcasts: vec![],
        };
        let mut sub = backend.subscribe("messages:c1", spec).await.unwrap();

        backend
            .insert(Table::Messages, row([("conversation_id", json!("c2"))]))
            .await
            .unwrap();
        backend
            .insert(Table::Messages, row([("conversation_id", json!("c1"))]))
            .await
            .unwrap();

        let BusEvent::Row(change) = sub.events.recv().await.unwrap() else {
            panic!("expected a row event");
        };
        assert_eq!(change.new.unwrap()["conversation_id"], json!("c1"));
        assert!(sub.events.try_recv().is_err());
    }

    #[tokio::test]
    async fn broadcasts_only_reach_the_named_channel() {
        let backend = MemoryBackend::new();
        let spec = SubscriptionSpec {
            rows: vec![],
            broadcasts: vec!["typing".into()],
        };
        let mut here = backend.subscribe("typing:c1", spec.clone()).await.unwrap();
        let mut there = backend.subscribe("typing:c2", spec).await.unwrap();

        backend
            .publish("typing:c1", "typing", json!({ "userId": "u1" }))
            .await
            .unwrap();

        assert!(matches!(here.events.recv().await, Some(BusEvent::Broadcast { .. })));
        assert!(there.events.try_recv().is_err());
    }

    #[tokio::test]
    async fn injected_write_failures_are_consumed() {
        let backend = MemoryBackend::new();
        backend.fail_next_writes(1);
        assert!(backend.insert(Table::Posts, Row::new()).await.is_err());
        assert!(backend.insert(Table::Posts, Row::new()).await.is_ok());
    }
}
