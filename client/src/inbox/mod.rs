//! Inbox screen: the viewer's conversations with previews and unread counts.
//!
//! Known conversations are patched in place from row changes; anything the list cannot
//! place on its own triggers a full reload. New messages are only watched for the
//! conversations the list shows, on a channel reopened whenever that set changes. A
//! poll timer reloads regardless, bounding staleness when realtime delivery is missed.

mod list;
mod runtime;

pub use list::{ConversationList, PatchOutcome};

use crate::backend::{Filter, RowChange, RowEventKind, RowListener, Table};
use crate::error::{SyncError, SyncResult};
use crate::messaging::LoadState;
use crate::realtime::{ChannelScope, Handlers, ScreenScope};
use crate::repository::ConversationSummary;
use crate::state::ClientState;
use reelchat_messaging::{Conversation, ConversationId, ConversationPatch, Message, Profile, UserId};
use runtime::{InboxCommand, InboxEvent, InboxRuntime};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct InboxSnapshot {
    pub state: LoadState,
    pub conversations: Vec<ConversationSummary>,
    pub total_unread: u64,
    pub realtime: bool,
    /// Conversations whose new messages currently arrive live.
    pub live_conversations: usize,
    /// Completed full reloads since the screen opened.
    pub full_loads: u64,
}

impl InboxSnapshot {
    fn new(realtime: bool) -> Self {
        Self {
            state: LoadState::Loading,
            conversations: Vec::new(),
            total_unread: 0,
            realtime,
            live_conversations: 0,
            full_loads: 0,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.state == LoadState::Ready
    }

    pub fn conversation(&self, id: ConversationId) -> Option<&ConversationSummary> {
        self.conversations.iter().find(|entry| entry.id() == id)
    }
}

#[derive(Deserialize)]
struct IdOnly {
    id: ConversationId,
}

fn conversation_event(change: &RowChange) -> Option<InboxEvent> {
    if change.kind == RowEventKind::Delete {
        let row = change.old.as_ref()?;
        return reelchat_messaging::parse_row::<IdOnly>("conversations", row)
            .ok()
            .map(|removed| InboxEvent::ConversationRemoved(removed.id));
    }
    let row = change.new.as_ref()?;
    match ConversationPatch::from_row(row) {
        Ok(patch) => Some(InboxEvent::ConversationChanged(patch)),
        Err(err) => {
            warn!(%err, "ignoring malformed conversation change");
            None
        }
    }
}

fn message_event(change: &RowChange) -> Option<InboxEvent> {
    let message = Message::from_row(change.new.as_ref()?).ok()?;
    match change.kind {
        RowEventKind::Insert => Some(InboxEvent::MessageInserted(message)),
        _ => Some(InboxEvent::MessageUpdated(message)),
    }
}

/// Message inserts and read-receipt updates, narrowed to `conversations`.
fn message_handlers(conversations: &[ConversationId]) -> Handlers<InboxEvent> {
    let filter = Filter::any_of(
        "conversation_id",
        conversations.iter().map(|id| Value::String(id.to_string())),
    );
    Handlers::new()
        .on_row(
            RowListener::new(Table::Messages, RowEventKind::Insert).with_filter(filter.clone()),
            message_event,
        )
        .on_row(
            RowListener::new(Table::Messages, RowEventKind::Update).with_filter(filter),
            message_event,
        )
}

/// Handle to an open inbox. Dropping it closes the screen.
pub struct InboxHandle {
    viewer: UserId,
    state: Arc<ClientState>,
    commands: mpsc::UnboundedSender<InboxCommand>,
    snapshot: watch::Receiver<InboxSnapshot>,
    scope: ScreenScope,
    task: JoinHandle<()>,
}

impl InboxHandle {
    pub async fn open(state: Arc<ClientState>) -> SyncResult<Self> {
        let viewer = state.session().user_id()?;
        let scope = ScreenScope::new();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();

        let mut handlers = Handlers::new();
        for column in ["user1_id", "user2_id"] {
            handlers = handlers.on_row(
                RowListener::new(Table::Conversations, RowEventKind::Any)
                    .with_filter(Filter::eq(column, viewer.to_string())),
                conversation_event,
            );
        }
        let realtime = match state
            .channels()
            .open(&ChannelScope::Inbox(viewer), handlers, events_tx.clone())
            .await
        {
            Ok(handle) => scope.adopt(handle),
            Err(err) => {
                warn!(user_id = %viewer, %err, "realtime unavailable, polling only");
                false
            }
        };

        let (snapshot_tx, snapshot_rx) = watch::channel(InboxSnapshot::new(realtime));
        let runtime = InboxRuntime {
            viewer,
            list: ConversationList::new(),
            state: LoadState::Loading,
            realtime,
            full_loads: 0,
            listing: false,
            relist: false,
            tickets: 0,
            unread_ticket: HashMap::new(),
            watched: Vec::new(),
            watch_seq: 0,
            messages_channel: None,
            live: Vec::new(),
            poll_interval: state.config().inbox_poll_interval,
            conversations: state.conversations(),
            channels: state.channels(),
            scope: scope.clone(),
            events_tx,
            events_rx,
            commands: commands_rx,
            snapshot: snapshot_tx,
        };
        let task = tokio::spawn(runtime.run());
        info!(user_id = %viewer, realtime, "inbox opened");

        Ok(Self {
            viewer,
            state,
            commands: commands_tx,
            snapshot: snapshot_rx,
            scope,
            task,
        })
    }

    pub fn snapshot(&self) -> InboxSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<InboxSnapshot> {
        self.snapshot.clone()
    }

    pub async fn wait_for<F>(&self, ready: F) -> SyncResult<InboxSnapshot>
    where
        F: FnMut(&InboxSnapshot) -> bool,
    {
        let mut rx = self.snapshot.clone();
        let snapshot = rx.wait_for(ready).await.map_err(|_| SyncError::Closed)?;
        Ok(snapshot.clone())
    }

    fn command(&self, cmd: InboxCommand) -> SyncResult<()> {
        if !self.scope.is_active() {
            return Err(SyncError::Closed);
        }
        self.commands.send(cmd).map_err(|_| SyncError::Closed)
    }

    /// Reload now, e.g. on return to the foreground.
    pub fn refresh(&self) {
        let _ = self.command(InboxCommand::Refresh);
    }

    /// Open (or create) the conversation with `other`.
    pub async fn get_or_create(&self, other: UserId) -> SyncResult<Conversation> {
        let conversation = self
            .state
            .conversations()
            .get_or_create(self.viewer, other)
            .await?;
        if !self.snapshot.borrow().conversations.iter().any(|c| c.id() == conversation.id) {
            self.refresh();
        }
        Ok(conversation)
    }

    /// Delete a conversation and all its messages. Confirmation is the caller's job;
    /// errors are returned for display.
    pub async fn delete(&self, conversation: ConversationId) -> SyncResult<()> {
        self.state.conversations().delete(conversation).await?;
        let _ = self.command(InboxCommand::Forget(conversation));
        Ok(())
    }

    /// Filter the loaded conversations by username or preview.
    pub fn search(&self, query: &str) -> Vec<ConversationSummary> {
        let mut list = ConversationList::new();
        list.replace_all(self.snapshot.borrow().conversations.clone());
        list.search(query)
    }

    /// Find people to start a conversation with.
    pub async fn search_people(&self, query: &str) -> SyncResult<Vec<Profile>> {
        self.state.profiles().search(query, self.viewer).await
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
        info!(user_id = %self.viewer, "inbox closed");
    }
}

impl Drop for InboxHandle {
    fn drop(&mut self) {
        self.close();
    }
}
