//! Activity feed of the signed-in user.
//!
//! Inserts are merged by id as they arrive; read and delete actions apply locally first
//! and are reverted if the backend refuses them.

mod feed;
mod runtime;

pub use feed::NotificationFeed;

use crate::backend::{Filter, RowChange, RowEventKind, RowListener, Table};
use crate::error::{SyncError, SyncResult};
use crate::messaging::LoadState;
use crate::realtime::{ChannelScope, Handlers, ScreenScope};
use crate::state::ClientState;
use reelchat_messaging::{EntityId, Notification, UserId};
use runtime::{FeedCommand, FeedEvent, FeedRuntime};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct NotificationsSnapshot {
    pub state: LoadState,
    pub notifications: Vec<Notification>,
    /// Badge count.
    pub unread: usize,
    pub realtime: bool,
}

impl NotificationsSnapshot {
    pub fn is_ready(&self) -> bool {
        self.state == LoadState::Ready
    }
}

#[derive(Deserialize)]
struct IdOnly {
    id: EntityId,
}

fn feed_event(change: &RowChange) -> Option<FeedEvent> {
    match change.kind {
        RowEventKind::Delete => {
            let row = change.old.as_ref()?;
            reelchat_messaging::parse_row::<IdOnly>("notifications", row)
                .ok()
                .map(|removed| FeedEvent::Removed(removed.id))
        }
        kind => {
            let notification = match Notification::from_row(change.new.as_ref()?) {
                Ok(notification) => notification,
                Err(err) => {
                    warn!(%err, "ignoring malformed notification");
                    return None;
                }
            };
            if kind == RowEventKind::Insert {
                Some(FeedEvent::Inserted(notification))
            } else {
                Some(FeedEvent::Updated(notification))
            }
        }
    }
}

pub struct NotificationsHandle {
    viewer: UserId,
    commands: mpsc::UnboundedSender<FeedCommand>,
    snapshot: watch::Receiver<NotificationsSnapshot>,
    scope: ScreenScope,
    task: JoinHandle<()>,
}

impl NotificationsHandle {
    pub async fn open(state: Arc<ClientState>) -> SyncResult<Self> {
        let viewer = state.session().user_id()?;
        let scope = ScreenScope::new();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();

        let handlers = Handlers::new().on_row(
            RowListener::new(Table::Notifications, RowEventKind::Any)
                .with_filter(Filter::eq("user_id", viewer.to_string())),
            feed_event,
        );
        let realtime = match state
            .channels()
            .open(&ChannelScope::Notifications(viewer), handlers, events_tx.clone())
            .await
        {
            Ok(handle) => scope.adopt(handle),
            Err(err) => {
                warn!(user_id = %viewer, %err, "notification feed without realtime");
                false
            }
        };

        let limit = state.config().notification_limit;
        let (snapshot_tx, snapshot_rx) = watch::channel(NotificationsSnapshot {
            state: LoadState::Loading,
            notifications: Vec::new(),
            unread: 0,
            realtime,
        });
        let runtime = FeedRuntime {
            viewer,
            feed: NotificationFeed::new(limit),
            state: LoadState::Loading,
            realtime,
            limit,
            notifications: state.notifications(),
            scope: scope.clone(),
            events_tx,
            events_rx,
            commands: commands_rx,
            snapshot: snapshot_tx,
        };
        let task = tokio::spawn(runtime.run());
        info!(user_id = %viewer, realtime, "notifications opened");

        Ok(Self {
            viewer,
            commands: commands_tx,
            snapshot: snapshot_rx,
            scope,
            task,
        })
    }

    pub fn snapshot(&self) -> NotificationsSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<NotificationsSnapshot> {
        self.snapshot.clone()
    }

    pub async fn wait_for<F>(&self, ready: F) -> SyncResult<NotificationsSnapshot>
    where
        F: FnMut(&NotificationsSnapshot) -> bool,
    {
        let mut rx = self.snapshot.clone();
        let snapshot = rx.wait_for(ready).await.map_err(|_| SyncError::Closed)?;
        Ok(snapshot.clone())
    }

    async fn request(&self, cmd: impl FnOnce(oneshot::Sender<SyncResult<()>>) -> FeedCommand) -> SyncResult<()> {
        if !self.scope.is_active() {
            return Err(SyncError::Closed);
        }
        let (tx, rx) = oneshot::channel();
        self.commands.send(cmd(tx)).map_err(|_| SyncError::Closed)?;
        rx.await.map_err(|_| SyncError::Closed)?
    }

    pub async fn mark_read(&self, id: &EntityId) -> SyncResult<()> {
        let id = id.clone();
        self.request(|tx| FeedCommand::MarkRead(id, tx)).await
    }

    pub async fn mark_all_read(&self) -> SyncResult<()> {
        self.request(FeedCommand::MarkAllRead).await
    }

    /// Remove a notification; it reappears if the backend refuses.
    pub async fn delete(&self, id: &EntityId) -> SyncResult<()> {
        let id = id.clone();
        self.request(|tx| FeedCommand::Delete(id, tx)).await
    }

    pub fn refresh(&self) {
        if self.scope.is_active() {
            let _ = self.commands.send(FeedCommand::Refresh);
        }
    }

    pub fn unread(&self) -> usize {
        self.snapshot.borrow().unread
    }

    pub fn is_open(&self) -> bool {
        self.scope.is_active()
    }

    pub fn close(&self) {
        if !self.scope.is_active() {
            return;
        }
        self.scope.close();
        self.task.abort();
        info!(user_id = %self.viewer, "notifications closed");
    }
}

impl Drop for NotificationsHandle {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{row, MemoryBackend};
    use crate::config::SyncConfig;
    use crate::repository::NewNotification;
    use crate::session::Session;
    use reelchat_messaging::{NotificationKind, Profile};
    use serde_json::json;

    fn client(backend: &MemoryBackend, user: UserId) -> Arc<ClientState> {
        let profile = Profile {
            id: user,
            username: "nina".into(),
            avatar_url: None,
        };
        ClientState::in_memory(SyncConfig::default(), Session::signed_in(profile), backend)
    }

    fn like(recipient: UserId) -> NewNotification {
        NewNotification {
            recipient,
            actor: UserId::new(),
            kind: NotificationKind::Like,
            post_id: Some(EntityId::new("3")),
            comment: None,
        }
    }

    #[tokio::test]
    async fn live_inserts_raise_the_badge() {
        let backend = MemoryBackend::new();
        let me = UserId::new();
        let state = client(&backend, me);
        let feed = NotificationsHandle::open(state.clone()).await.unwrap();
        feed.wait_for(NotificationsSnapshot::is_ready).await.unwrap();

        state.notifications().notify(like(me)).await;
        state.notifications().notify(like(UserId::new())).await;

        let snapshot = feed.wait_for(|s| s.unread == 1).await.unwrap();
        assert_eq!(snapshot.notifications.len(), 1);
        assert_eq!(snapshot.notifications[0].kind, NotificationKind::Like);
    }

    #[tokio::test]
    async fn mark_read_and_mark_all_read() {
        let backend = MemoryBackend::new();
        let me = UserId::new();
        for id in ["n1", "n2"] {
            backend.seed(
                Table::Notifications,
                row([
                    ("id", json!(id)),
                    ("user_id", json!(me)),
                    ("actor_id", json!(UserId::new())),
                    ("type", json!("follow")),
                ]),
            );
        }
        let feed = NotificationsHandle::open(client(&backend, me)).await.unwrap();
        assert_eq!(feed.wait_for(NotificationsSnapshot::is_ready).await.unwrap().unread, 2);

        feed.mark_read(&EntityId::new("n1")).await.unwrap();
        assert_eq!(feed.unread(), 1);
        feed.mark_all_read().await.unwrap();
        assert_eq!(feed.unread(), 0);
        assert!(backend
            .rows(Table::Notifications)
            .iter()
            .all(|row| row.get("read") == Some(&json!(true))));
    }

    #[tokio::test]
    async fn failed_delete_restores_the_entry() {
        let backend = MemoryBackend::new();
        let me = UserId::new();
        backend.seed(
            Table::Notifications,
            row([
                ("id", json!("n1")),
                ("user_id", json!(me)),
                ("actor_id", json!(UserId::new())),
                ("type", json!("comment")),
                ("comment", json!("nice")),
            ]),
        );
        let feed = NotificationsHandle::open(client(&backend, me)).await.unwrap();
        feed.wait_for(NotificationsSnapshot::is_ready).await.unwrap();

        backend.fail_next_writes(1);
        assert!(feed.delete(&EntityId::new("n1")).await.is_err());
        assert_eq!(feed.snapshot().notifications.len(), 1);

        feed.delete(&EntityId::new("n1")).await.unwrap();
        assert!(feed.snapshot().notifications.is_empty());
        assert!(backend.rows(Table::Notifications).is_empty());
    }

    #[tokio::test]
    async fn failed_mark_read_reverts() {
        let backend = MemoryBackend::new();
        let me = UserId::new();
        backend.seed(
            Table::Notifications,
            row([
                ("id", json!("n1")),
                ("user_id", json!(me)),
                ("actor_id", json!(UserId::new())),
                ("type", json!("like")),
            ]),
        );
        let feed = NotificationsHandle::open(client(&backend, me)).await.unwrap();
        feed.wait_for(NotificationsSnapshot::is_ready).await.unwrap();

        backend.fail_next_writes(1);
        assert!(feed.mark_read(&EntityId::new("n1")).await.is_err());
        assert_eq!(feed.unread(), 1);
    }
}
