//! Channel subscription manager: realtime channels tied to a screen's lifetime.
//!
//! A channel multiplexes row-change listeners and named broadcast events. Raw bus
//! events are mapped by the screen's [`Handlers`] into the screen's own event type and
//! pushed onto its queue, so the screen folds them in one at a time. Delivery is
//! at-least-once; handlers must be applied idempotently by the receiver.

use crate::backend::{
    BusEvent, BusSubscription, RealtimeBus, RowChange, RowListener, SubscriptionId,
    SubscriptionSpec,
};
use reelchat_messaging::{ConversationId, CounterKind, EntityId, UserId};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

pub type RealtimeResult<T> = Result<T, RealtimeError>;

#[derive(Debug, thiserror::Error)]
pub enum RealtimeError {
    #[error("subscribe to {channel} failed: {reason}")]
    Subscribe { channel: String, reason: String },
    #[error("subscribe to {0} timed out")]
    Timeout(String),
    #[error("publish to {channel} failed: {reason}")]
    Publish { channel: String, reason: String },
}

/// What a channel watches.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ChannelScope {
    /// Row inserts and updates for one conversation's messages.
    Messages(ConversationId),
    /// Typing broadcasts for one conversation.
    Typing(ConversationId),
    /// Conversation rows visible to one user's inbox.
    Inbox(UserId),
    /// New messages in the conversations an inbox currently shows.
    InboxMessages(UserId),
    /// Count broadcasts and backing row changes for one counter-bearing entity.
    Counter(CounterKind, EntityId),
    /// Notification rows addressed to one user.
    Notifications(UserId),
}

impl ChannelScope {
    pub fn base_name(&self) -> String {
        match self {
            Self::Messages(id) => format!("messages:{id}"),
            Self::Typing(id) => format!("typing:{id}"),
            Self::Inbox(user) => format!("conversations:{user}"),
            Self::InboxMessages(user) => format!("inbox-messages:{user}"),
            Self::Counter(kind, entity) => format!("{}:{entity}", kind.channel_prefix()),
            Self::Notifications(user) => format!("notifications:{user}"),
        }
    }

    /// Broadcast scopes must use the same name on every client to reach each other.
    pub fn is_shared(&self) -> bool {
        matches!(self, Self::Typing(_) | Self::Counter(..))
    }

    /// Name to subscribe under. Row-only scopes get a fresh suffix per open so a quick
    /// close/reopen never collides with the previous subscription.
    pub fn channel_name(&self) -> String {
        if self.is_shared() {
            self.base_name()
        } else {
            format!("{}:{}", self.base_name(), Uuid::new_v4().simple())
        }
    }
}

type RowMapper<E> = Box<dyn Fn(&RowChange) -> Option<E> + Send + Sync>;
type BroadcastMapper<E> = Box<dyn Fn(&Value) -> Option<E> + Send + Sync>;

/// Mapping from bus event kinds to a screen's event type.
pub struct Handlers<E> {
    rows: Vec<(RowListener, RowMapper<E>)>,
    broadcasts: Vec<(String, BroadcastMapper<E>)>,
}

impl<E> Default for Handlers<E> {
    fn default() -> Self {
        Self {
            rows: Vec::new(),
            broadcasts: Vec::new(),
        }
    }
}

impl<E> Handlers<E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_row<F>(mut self, listener: RowListener, map: F) -> Self
    where
        F: Fn(&RowChange) -> Option<E> + Send + Sync + 'static,
    {
        self.rows.push((listener, Box::new(map)));
        self
    }

    pub fn on_broadcast<F>(mut self, event: &str, map: F) -> Self
    where
        F: Fn(&Value) -> Option<E> + Send + Sync + 'static,
    {
        self.broadcasts.push((event.to_string(), Box::new(map)));
        self
    }

    fn spec(&self) -> SubscriptionSpec {
        SubscriptionSpec {
            rows: self.rows.iter().map(|(listener, _)| listener.clone()).collect(),
            broadcasts: self.broadcasts.iter().map(|(event, _)| event.clone()).collect(),
        }
    }

    fn dispatch(&self, event: &BusEvent) -> Vec<E> {
        match event {
            BusEvent::Row(change) => self
                .rows
                .iter()
                .filter(|(listener, _)| listener.accepts(change))
                .filter_map(|(_, map)| map(change))
                .collect(),
            BusEvent::Broadcast { event, payload } => self
                .broadcasts
                .iter()
                .filter(|(name, _)| name == event)
                .filter_map(|(_, map)| map(payload))
                .collect(),
        }
    }
}

/// Opens channels on the realtime bus and publishes broadcasts.
#[derive(Clone)]
pub struct ChannelManager {
    bus: Arc<dyn RealtimeBus>,
    subscribe_timeout: Duration,
}

impl ChannelManager {
    pub fn new(bus: Arc<dyn RealtimeBus>, subscribe_timeout: Duration) -> Self {
        Self {
            bus,
            subscribe_timeout,
        }
    }

    /// Subscribe to `scope` and forward mapped events into `sink` until the handle is
    /// closed. A failed or timed-out subscribe leaves nothing behind; the caller keeps
    /// going on polling alone.
    pub async fn open<E>(
        &self,
        scope: &ChannelScope,
        handlers: Handlers<E>,
        sink: mpsc::UnboundedSender<E>,
    ) -> RealtimeResult<ChannelHandle>
    where
        E: Send + 'static,
    {
        let name = scope.channel_name();
        let subscribe = self.bus.subscribe(&name, handlers.spec());
        let BusSubscription { id, mut events } =
            match tokio::time::timeout(self.subscribe_timeout, subscribe).await {
                Ok(Ok(subscription)) => subscription,
                Ok(Err(err)) => {
                    warn!(channel = %name, %err, "subscribe failed");
                    return Err(RealtimeError::Subscribe {
                        channel: name,
                        reason: err.to_string(),
                    });
                }
                Err(_) => {
                    warn!(channel = %name, "subscribe timed out");
                    return Err(RealtimeError::Timeout(name));
                }
            };

        let closed = Arc::new(AtomicBool::new(false));
        let forwarding = Arc::clone(&closed);
        let task = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                if forwarding.load(Ordering::Acquire) {
                    break;
                }
                for mapped in handlers.dispatch(&event) {
                    if sink.send(mapped).is_err() {
                        return;
                    }
                }
            }
        });

        debug!(channel = %name, "channel open");
        Ok(ChannelHandle {
            name,
            id,
            closed,
            bus: Arc::clone(&self.bus),
            task,
        })
    }

    /// Publish a broadcast on a shared scope.
    pub async fn broadcast(
        &self,
        scope: &ChannelScope,
        event: &str,
        payload: Value,
    ) -> RealtimeResult<()> {
        let channel = scope.base_name();
        self.bus
            .publish(&channel, event, payload)
            .await
            .map_err(|err| RealtimeError::Publish {
                channel,
                reason: err.to_string(),
            })
    }
}

/// Live subscription. Closing is synchronous, idempotent, and also happens on drop.
pub struct ChannelHandle {
    name: String,
    id: SubscriptionId,
    closed: Arc<AtomicBool>,
    bus: Arc<dyn RealtimeBus>,
    task: JoinHandle<()>,
}

impl ChannelHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.bus.unsubscribe(self.id);
        self.task.abort();
        debug!(channel = %self.name, "channel closed");
    }
}

impl Drop for ChannelHandle {
    fn drop(&mut self) {
        self.close();
    }
}

#[derive(Default)]
struct ScopeInner {
    closed: AtomicBool,
    channels: Mutex<Vec<ChannelHandle>>,
}

/// Lifetime of one open screen: owns its channels and tells late completions whether
/// the screen is still there to receive them.
#[derive(Clone, Default)]
pub struct ScreenScope {
    inner: Arc<ScopeInner>,
}

impl ScreenScope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self) -> bool {
        !self.inner.closed.load(Ordering::Acquire)
    }

    /// Take ownership of a channel. If the screen already closed, the channel is
    /// closed on the spot and `false` is returned.
    pub fn adopt(&self, handle: ChannelHandle) -> bool {
        let mut channels = self.inner.channels.lock().unwrap_or_else(|p| p.into_inner());
        if !self.is_active() {
            handle.close();
            return false;
        }
        channels.push(handle);
        true
    }

    /// Close one owned channel ahead of the screen, e.g. when it is being replaced.
    pub fn release(&self, name: &str) -> bool {
        let mut channels = self.inner.channels.lock().unwrap_or_else(|p| p.into_inner());
        let Some(index) = channels.iter().position(|channel| channel.name() == name) else {
            return false;
        };
        channels.remove(index).close();
        true
    }

    pub fn open_channels(&self) -> usize {
        self.inner
            .channels
            .lock()
            .map(|channels| channels.len())
            .unwrap_or(0)
    }

    pub fn close(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let channels = std::mem::take(
            &mut *self.inner.channels.lock().unwrap_or_else(|p| p.into_inner()),
        );
        for channel in &channels {
            channel.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{row, DataApi, MemoryBackend, RowEventKind, Table};
    use serde_json::json;

    fn manager(backend: &MemoryBackend) -> ChannelManager {
        ChannelManager::new(Arc::new(backend.clone()), Duration::from_secs(1))
    }

    #[tokio::test]
    async fn row_events_are_mapped_onto_the_screen_queue() {
        let backend = MemoryBackend::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handlers = Handlers::new().on_row(
            RowListener::new(Table::Messages, RowEventKind::Insert),
            |change: &RowChange| change.new.as_ref().map(|row| row["content"].clone()),
        );
        let _handle = manager(&backend)
            .open(&ChannelScope::Messages(ConversationId::new()), handlers, tx)
            .await
            .unwrap();

        backend
            .insert(Table::Messages, row([("content", json!("hi"))]))
            .await
            .unwrap();
        assert_eq!(rx.recv().await, Some(json!("hi")));
    }

    #[tokio::test]
    async fn close_is_idempotent_and_unsubscribes() {
        let backend = MemoryBackend::new();
        let (tx, _rx) = mpsc::unbounded_channel::<()>();
        let handle = manager(&backend)
            .open(&ChannelScope::Inbox(UserId::new()), Handlers::new(), tx)
            .await
            .unwrap();
        assert_eq!(backend.subscriber_count(), 1);

        handle.close();
        handle.close();
        assert!(handle.is_closed());
        assert_eq!(backend.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn refused_subscriptions_surface_as_errors() {
        let backend = MemoryBackend::new();
        backend.refuse_subscriptions(true);
        let (tx, _rx) = mpsc::unbounded_channel::<()>();
        let result = manager(&backend)
            .open(&ChannelScope::Notifications(UserId::new()), Handlers::new(), tx)
            .await;
        assert!(matches!(result, Err(RealtimeError::Subscribe { .. })));
        assert_eq!(backend.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn closed_scope_rejects_late_channels() {
        let backend = MemoryBackend::new();
        let scope = ScreenScope::new();
        scope.close();

        let (tx, _rx) = mpsc::unbounded_channel::<()>();
        let handle = manager(&backend)
            .open(&ChannelScope::Inbox(UserId::new()), Handlers::new(), tx)
            .await
            .unwrap();
        assert!(!scope.adopt(handle));
        assert_eq!(backend.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn released_channels_close_while_the_scope_lives_on() {
        let backend = MemoryBackend::new();
        let scope = ScreenScope::new();
        let user = UserId::new();
        for channel in [ChannelScope::Inbox(user), ChannelScope::InboxMessages(user)] {
            let (tx, _rx) = mpsc::unbounded_channel::<()>();
            let handle = manager(&backend).open(&channel, Handlers::new(), tx).await.unwrap();
            assert!(scope.adopt(handle));
        }
        assert_eq!(backend.subscriber_count(), 2);

        let (tx, _rx) = mpsc::unbounded_channel::<()>();
        let replaced = manager(&backend)
            .open(&ChannelScope::InboxMessages(user), Handlers::new(), tx)
            .await
            .unwrap();
        let name = replaced.name().to_string();
        assert!(scope.adopt(replaced));
        assert!(scope.release(&name));
        assert!(!scope.release(&name));
        assert_eq!((scope.open_channels(), backend.subscriber_count()), (2, 2));
        assert!(scope.is_active());
    }

    #[tokio::test]
    async fn broadcasts_reach_other_viewers_on_shared_scopes() {
        let backend = MemoryBackend::new();
        let scope = ChannelScope::Typing(ConversationId::new());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handlers = Handlers::new().on_broadcast("typing", |payload: &Value| {
            payload.get("userId").cloned()
        });
        let _handle = manager(&backend).open(&scope, handlers, tx).await.unwrap();

        manager(&backend)
            .broadcast(&scope, "typing", json!({ "userId": "u2" }))
            .await
            .unwrap();
        assert_eq!(rx.recv().await, Some(json!("u2")));
    }

    #[test]
    fn row_scopes_get_unique_names_and_broadcast_scopes_do_not() {
        let conversation = ConversationId::new();
        let messages = ChannelScope::Messages(conversation);
        assert_ne!(messages.channel_name(), messages.channel_name());
        assert!(messages.channel_name().starts_with(&messages.base_name()));

        let typing = ChannelScope::Typing(conversation);
        assert_eq!(typing.channel_name(), format!("typing:{conversation}"));
    }
}
