//! Live engagement counters: likes, comments, comment likes and followers.
//!
//! Every open counter subscribes to the shared channel of its entity. Confirmed local
//! changes are broadcast with the count read back after the write, and row changes on
//! the backing table act as a second, slower signal. Both are coalesced over a short
//! window, after which the count is read back from the store. Broadcasts may arrive out
//! of order, so their count is only shown until that read lands.
//! Local toggles show up at once and are written one after another.

mod runtime;
mod state;

pub use state::{CounterState, Debounce, Flush, Step, ToggleAction};

use crate::error::{SyncError, SyncResult};
use crate::messaging::LoadState;
use crate::realtime::{ChannelScope, Handlers, ScreenScope};
use crate::repository::CounterRepository;
use crate::state::ClientState;
use reelchat_messaging::{Comment, CountChange, CounterKind, EntityId, UserId};
use runtime::{CounterCommand, CounterEvent, CounterRuntime};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CounterSnapshot {
    pub kind: CounterKind,
    pub entity: EntityId,
    pub state: LoadState,
    pub count: i64,
    /// Whether the viewer likes or follows the entity.
    pub engaged: bool,
    /// Local changes not yet confirmed.
    pub pending: usize,
    /// For follower counters: how many accounts the profile owner follows.
    pub following: Option<i64>,
    pub realtime: bool,
}

impl CounterSnapshot {
    fn new(kind: CounterKind, entity: EntityId, realtime: bool) -> Self {
        Self {
            kind,
            entity,
            state: LoadState::Loading,
            count: 0,
            engaged: false,
            pending: 0,
            following: None,
            realtime,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.state == LoadState::Ready
    }

    pub fn is_settled(&self) -> bool {
        self.is_ready() && self.pending == 0
    }
}

/// Handle to one live counter. Dropping it closes the subscription.
pub struct CounterHandle {
    kind: CounterKind,
    entity: EntityId,
    counters: CounterRepository,
    commands: mpsc::UnboundedSender<CounterCommand>,
    snapshot: watch::Receiver<CounterSnapshot>,
    scope: ScreenScope,
    task: JoinHandle<()>,
}

impl CounterHandle {
    pub async fn open(state: Arc<ClientState>, kind: CounterKind, entity: EntityId) -> SyncResult<Self> {
        let viewer = state.session().user_id()?;
        let scope = ScreenScope::new();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();

        let handlers = Handlers::new()
            .on_broadcast(CountChange::EVENT, |payload| {
                Some(CounterEvent::Broadcast(CountChange::from_payload(payload)))
            })
            .on_row(CounterRepository::listener(kind, &entity), |_| {
                Some(CounterEvent::RowChanged)
            });

        let channel = ChannelScope::Counter(kind, entity.clone());
        let realtime = match state.channels().open(&channel, handlers, events_tx.clone()).await {
            Ok(handle) => scope.adopt(handle),
            Err(err) => {
                warn!(%entity, ?kind, %err, "counter realtime unavailable");
                false
            }
        };

        let (snapshot_tx, snapshot_rx) =
            watch::channel(CounterSnapshot::new(kind, entity.clone(), realtime));
        let runtime = CounterRuntime {
            kind,
            entity: entity.clone(),
            viewer,
            counter: CounterState::new(kind),
            debounce: Debounce::new(state.config().counter_debounce, viewer),
            state: LoadState::Loading,
            realtime,
            following: None,
            queue: VecDeque::new(),
            in_flight: None,
            stale: false,
            fetches_issued: 0,
            fetch_applied: 0,
            counters: state.counters(),
            notifications: state.notifications(),
            channels: state.channels(),
            scope: scope.clone(),
            events_tx,
            events_rx,
            commands: commands_rx,
            snapshot: snapshot_tx,
        };
        let task = tokio::spawn(runtime.run());
        debug!(%entity, ?kind, realtime, "counter opened");

        Ok(Self {
            kind,
            entity,
            counters: state.counters(),
            commands: commands_tx,
            snapshot: snapshot_rx,
            scope,
            task,
        })
    }

    pub fn kind(&self) -> CounterKind {
        self.kind
    }

    pub fn entity(&self) -> &EntityId {
        &self.entity
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<CounterSnapshot> {
        self.snapshot.clone()
    }

    pub async fn wait_for<F>(&self, ready: F) -> SyncResult<CounterSnapshot>
    where
        F: FnMut(&CounterSnapshot) -> bool,
    {
        let mut rx = self.snapshot.clone();
        let snapshot = rx.wait_for(ready).await.map_err(|_| SyncError::Closed)?;
        Ok(snapshot.clone())
    }

    fn command(&self, cmd: CounterCommand) -> SyncResult<()> {
        if !self.scope.is_active() {
            return Err(SyncError::Closed);
        }
        self.commands.send(cmd).map_err(|_| SyncError::Closed)
    }

    /// Like/unlike or follow/unfollow. The snapshot flips before this resolves; on
    /// failure it returns to the last confirmed state.
    pub async fn toggle(&self) -> SyncResult<ToggleAction> {
        if !self.kind.is_toggle() {
            return Err(SyncError::InvalidAction(format!("{:?} cannot be toggled", self.kind)));
        }
        let (tx, rx) = oneshot::channel();
        self.command(CounterCommand::Toggle(tx))?;
        rx.await.map_err(|_| SyncError::Closed)?
    }

    /// Comment on the post, or reply to one of its comments.
    pub async fn add_comment(&self, text: &str, parent: Option<EntityId>) -> SyncResult<Comment> {
        if self.kind != CounterKind::PostComments {
            return Err(SyncError::InvalidAction(format!("{:?} does not take comments", self.kind)));
        }
        let text = text.trim();
        if text.is_empty() {
            return Err(SyncError::EmptyMessage);
        }
        let (tx, rx) = oneshot::channel();
        self.command(CounterCommand::Comment {
            text: text.to_string(),
            parent,
            responder: tx,
        })?;
        rx.await.map_err(|_| SyncError::Closed)?
    }

    /// Comments of the post, oldest first.
    pub async fn comments(&self) -> SyncResult<Vec<Comment>> {
        if self.kind != CounterKind::PostComments {
            return Err(SyncError::InvalidAction(format!("{:?} has no comments", self.kind)));
        }
        self.counters.comments(&self.entity).await
    }

    pub fn refresh(&self) {
        let _ = self.command(CounterCommand::Refresh);
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
        debug!(entity = %self.entity, kind = ?self.kind, "counter closed");
    }
}

impl Drop for CounterHandle {
    fn drop(&mut self) {
        self.close();
    }
}

/// Open the counter for `viewer`'s follow relationship to `target`.
pub async fn open_followers(state: Arc<ClientState>, target: UserId) -> SyncResult<CounterHandle> {
    CounterHandle::open(state, CounterKind::Followers, EntityId::new(target.to_string())).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{row, MemoryBackend, Table};
    use crate::config::SyncConfig;
    use crate::session::Session;
    use reelchat_messaging::Profile;
    use serde_json::{json, Value};
    use std::time::Duration;

    fn client(backend: &MemoryBackend, user: UserId) -> Arc<ClientState> {
        let profile = Profile {
            id: user,
            username: format!("user-{}", &user.to_string()[..8]),
            avatar_url: None,
        };
        ClientState::in_memory(SyncConfig::default(), Session::signed_in(profile), backend)
    }

    fn post(backend: &MemoryBackend, owner: UserId) -> EntityId {
        backend.seed(Table::Posts, row([("id", json!("7")), ("user_id", json!(owner))]));
        EntityId::new("7")
    }

    fn notification_kinds(backend: &MemoryBackend) -> Vec<Value> {
        backend
            .rows(Table::Notifications)
            .iter()
            .filter_map(|row| row.get("type").cloned())
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn like_is_optimistic_and_notifies_the_owner() {
        let backend = MemoryBackend::new();
        let (owner, viewer) = (UserId::new(), UserId::new());
        let post = post(&backend, owner);

        let likes = CounterHandle::open(client(&backend, viewer), CounterKind::PostLikes, post)
            .await
            .unwrap();
        likes.wait_for(CounterSnapshot::is_ready).await.unwrap();

        assert_eq!(likes.toggle().await.unwrap(), ToggleAction::Engaged);
        let snapshot = likes.snapshot();
        assert_eq!((snapshot.count, snapshot.engaged), (1, true));

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(notification_kinds(&backend), vec![json!("like")]);

        assert_eq!(likes.toggle().await.unwrap(), ToggleAction::Disengaged);
        let snapshot = likes.wait_for(CounterSnapshot::is_settled).await.unwrap();
        assert_eq!((snapshot.count, snapshot.engaged), (0, false));
        assert_eq!(backend.rows(Table::PostLikes).len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_toggle_reverts_to_the_confirmed_state() {
        let backend = MemoryBackend::new();
        let post = post(&backend, UserId::new());
        let likes = CounterHandle::open(client(&backend, UserId::new()), CounterKind::PostLikes, post)
            .await
            .unwrap();
        likes.wait_for(CounterSnapshot::is_ready).await.unwrap();

        backend.fail_next_writes(1);
        assert!(likes.toggle().await.is_err());
        let snapshot = likes.snapshot();
        assert_eq!((snapshot.count, snapshot.engaged, snapshot.pending), (0, false, 0));
    }

    #[tokio::test(start_paused = true)]
    async fn remote_likes_converge_after_the_debounce_window() {
        let backend = MemoryBackend::new();
        let post = post(&backend, UserId::new());
        let watcher = CounterHandle::open(client(&backend, UserId::new()), CounterKind::PostLikes, post.clone())
            .await
            .unwrap();
        watcher.wait_for(CounterSnapshot::is_ready).await.unwrap();

        for _ in 0..3 {
            let other = CounterHandle::open(client(&backend, UserId::new()), CounterKind::PostLikes, post.clone())
                .await
                .unwrap();
            other.wait_for(CounterSnapshot::is_ready).await.unwrap();
            other.toggle().await.unwrap();
        }

        let snapshot = watcher.wait_for(|s| s.count == 3).await.unwrap();
        assert!(!snapshot.engaged);
    }

    #[tokio::test(start_paused = true)]
    async fn broadcasts_alone_carry_the_count() {
        let backend = MemoryBackend::new();
        let post = post(&backend, UserId::new());
        let watcher = CounterHandle::open(client(&backend, UserId::new()), CounterKind::PostLikes, post.clone())
            .await
            .unwrap();
        watcher.wait_for(CounterSnapshot::is_ready).await.unwrap();
        backend.drop_row_events(true);

        let other = CounterHandle::open(client(&backend, UserId::new()), CounterKind::PostLikes, post)
            .await
            .unwrap();
        other.wait_for(CounterSnapshot::is_ready).await.unwrap();
        other.toggle().await.unwrap();

        watcher.wait_for(|s| s.count == 1).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn comments_count_up_and_notify_post_and_parent_authors() {
        let backend = MemoryBackend::new();
        let (owner, first, second) = (UserId::new(), UserId::new(), UserId::new());
        let post = post(&backend, owner);

        let thread = CounterHandle::open(client(&backend, first), CounterKind::PostComments, post.clone())
            .await
            .unwrap();
        thread.wait_for(CounterSnapshot::is_ready).await.unwrap();
        let top = thread.add_comment("  nice shot ", None).await.unwrap();
        assert_eq!(top.comment, "nice shot");
        assert!(matches!(thread.toggle().await, Err(SyncError::InvalidAction(_))));
        assert!(matches!(thread.add_comment("   ", None).await, Err(SyncError::EmptyMessage)));

        let replies = CounterHandle::open(client(&backend, second), CounterKind::PostComments, post)
            .await
            .unwrap();
        replies.wait_for(CounterSnapshot::is_ready).await.unwrap();
        let reply = replies.add_comment("agreed", Some(top.id.clone())).await.unwrap();
        assert_eq!(reply.parent_id, Some(top.id));

        thread.wait_for(|s| s.count == 2).await.unwrap();
        assert_eq!(thread.comments().await.unwrap().len(), 2);

        tokio::time::sleep(Duration::from_millis(10)).await;
        let mut kinds = notification_kinds(&backend);
        kinds.sort_by_key(|kind| kind.to_string());
        assert_eq!(kinds, vec![json!("comment"), json!("comment"), json!("reply")]);
    }

    #[tokio::test(start_paused = true)]
    async fn follow_counter_tracks_both_directions() {
        let backend = MemoryBackend::new();
        let (viewer, target) = (UserId::new(), UserId::new());
        backend.seed(
            Table::Follows,
            row([("follower_id", json!(target)), ("following_id", json!(UserId::new()))]),
        );

        let followers = open_followers(client(&backend, viewer), target).await.unwrap();
        let loaded = followers
            .wait_for(|s| s.is_ready() && s.following.is_some())
            .await
            .unwrap();
        assert_eq!((loaded.count, loaded.following), (0, Some(1)));

        assert_eq!(followers.toggle().await.unwrap(), ToggleAction::Engaged);
        assert_eq!(followers.snapshot().count, 1);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(notification_kinds(&backend), vec![json!("follow")]);
    }

    #[tokio::test]
    async fn close_releases_the_channel() {
        let backend = MemoryBackend::new();
        let likes = CounterHandle::open(
            client(&backend, UserId::new()),
            CounterKind::PostLikes,
            EntityId::new("1"),
        )
        .await
        .unwrap();
        assert_eq!(backend.subscriber_count(), 1);
        likes.close();
        likes.close();
        assert_eq!(backend.subscriber_count(), 0);
        assert!(matches!(likes.toggle().await, Err(SyncError::Closed)));
    }
}
