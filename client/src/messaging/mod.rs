//! Chat screen: optimistic send, realtime merge, polling backstop, typing and read state.
//!
//! Each open conversation runs one task that owns its [`MessageStore`]. Realtime
//! events, poll results, send completions and user commands all arrive on queues that
//! the task drains one item at a time, so two merges never interleave.

mod queue;
mod runtime;
mod store;

pub use queue::{OutboundQueue, PendingSend};
pub use store::{LoadState, MergeOutcome, MessageStore};

use crate::backend::{Filter, RowChange, RowEventKind, RowListener, Table};
use crate::error::{SyncError, SyncResult};
use crate::realtime::{ChannelScope, Handlers, ScreenScope};
use crate::state::ClientState;
use crate::typing::{TypingIndicator, TypingPayload, TypingThrottle, TYPING_EVENT};
use reelchat_messaging::{timeline, ConversationId, MediaKind, Message, TimelineRow, UserId};
use runtime::{ChatCommand, ChatEvent, ChatRuntime};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Everything the chat view renders.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatSnapshot {
    pub conversation_id: ConversationId,
    pub state: LoadState,
    pub messages: Vec<Message>,
    /// The other participant is typing.
    pub other_typing: bool,
    /// Composer text handed back by a failed send.
    pub draft: Option<String>,
    /// A realtime channel is open; false means polling alone keeps the view fresh.
    pub realtime: bool,
    /// Sends still waiting on the backend.
    pub sending: usize,
}

impl ChatSnapshot {
    fn new(conversation_id: ConversationId, realtime: bool) -> Self {
        Self {
            conversation_id,
            state: LoadState::Loading,
            messages: Vec::new(),
            other_typing: false,
            draft: None,
            realtime,
            sending: 0,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.state == LoadState::Ready
    }

    pub fn timeline(&self, viewer: UserId, gap: chrono::Duration) -> Vec<TimelineRow<'_>> {
        timeline(&self.messages, viewer, gap)
    }
}

fn message_event(change: &RowChange) -> Option<ChatEvent> {
    let row = change.new.as_ref()?;
    match Message::from_row(row) {
        Ok(message) => Some(ChatEvent::Remote(message)),
        Err(err) => {
            warn!(%err, "ignoring malformed realtime message");
            None
        }
    }
}

/// Handle to an open chat screen. Dropping it closes the screen.
pub struct ChatHandle {
    conversation: ConversationId,
    viewer: UserId,
    state: Arc<ClientState>,
    commands: mpsc::UnboundedSender<ChatCommand>,
    snapshot: watch::Receiver<ChatSnapshot>,
    scope: ScreenScope,
    task: JoinHandle<()>,
}

impl ChatHandle {
    /// Open `conversation` for the signed-in user: subscribe to its messages and
    /// typing signals, start the initial load and the poll timer.
    pub async fn open(state: Arc<ClientState>, conversation: ConversationId) -> SyncResult<Self> {
        let viewer = state.session().user_id()?;
        let config = state.config().clone();
        let scope = ScreenScope::new();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();

        let channels = state.channels();
        let in_conversation = Filter::eq("conversation_id", conversation.to_string());
        let message_handlers = Handlers::new()
            .on_row(
                RowListener::new(Table::Messages, RowEventKind::Insert)
                    .with_filter(in_conversation.clone()),
                message_event,
            )
            .on_row(
                RowListener::new(Table::Messages, RowEventKind::Update).with_filter(in_conversation),
                message_event,
            );
        let typing_handlers = Handlers::new().on_broadcast(TYPING_EVENT, |payload| {
            TypingPayload::from_value(payload).map(|typing| ChatEvent::Typing(typing.user_id))
        });

        let mut realtime = true;
        for (channel_scope, handlers) in [
            (ChannelScope::Messages(conversation), message_handlers),
            (ChannelScope::Typing(conversation), typing_handlers),
        ] {
            match channels.open(&channel_scope, handlers, events_tx.clone()).await {
                Ok(handle) => {
                    scope.adopt(handle);
                }
                Err(err) => {
                    warn!(conversation_id = %conversation, %err, "realtime unavailable, polling only");
                    realtime = false;
                }
            }
        }

        let (snapshot_tx, snapshot_rx) = watch::channel(ChatSnapshot::new(conversation, realtime));
        let runtime = ChatRuntime {
            conversation,
            viewer,
            store: MessageStore::new(conversation),
            outbound: OutboundQueue::new(),
            typing: TypingIndicator::new(config.typing_timeout),
            throttle: TypingThrottle::new(config.typing_throttle),
            draft: None,
            realtime,
            poll_interval: config.chat_poll_interval,
            messages: state.messages(),
            channels,
            scope: scope.clone(),
            events_tx,
            events_rx,
            commands: commands_rx,
            snapshot: snapshot_tx,
        };
        let task = tokio::spawn(runtime.run());
        info!(conversation_id = %conversation, realtime, "chat opened");

        Ok(Self {
            conversation,
            viewer,
            state,
            commands: commands_tx,
            snapshot: snapshot_rx,
            scope,
            task,
        })
    }

    pub fn conversation_id(&self) -> ConversationId {
        self.conversation
    }

    pub fn viewer(&self) -> UserId {
        self.viewer
    }

    pub fn snapshot(&self) -> ChatSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ChatSnapshot> {
        self.snapshot.clone()
    }

    /// Wait until the view satisfies `ready`.
    pub async fn wait_for<F>(&self, ready: F) -> SyncResult<ChatSnapshot>
    where
        F: FnMut(&ChatSnapshot) -> bool,
    {
        let mut rx = self.snapshot.clone();
        let snapshot = rx.wait_for(ready).await.map_err(|_| SyncError::Closed)?;
        Ok(snapshot.clone())
    }

    fn command(&self, cmd: ChatCommand) -> SyncResult<()> {
        if !self.scope.is_active() {
            return Err(SyncError::Closed);
        }
        self.commands.send(cmd).map_err(|_| SyncError::Closed)
    }

    /// Send a text message. The provisional entry shows up in the snapshot before this
    /// returns the stored record; on failure the text comes back in
    /// [`SyncError::SendFailed`] and in the snapshot's `draft`.
    pub async fn send(&self, content: impl Into<String>) -> SyncResult<Message> {
        let content = content.into();
        if content.trim().is_empty() {
            return Err(SyncError::EmptyMessage);
        }
        let (responder, response) = oneshot::channel();
        self.command(ChatCommand::Send { content, responder })?;
        response.await.map_err(|_| SyncError::Closed)?
    }

    /// Upload an attachment and send it as an image or video message.
    pub async fn send_media(
        &self,
        kind: MediaKind,
        extension: &str,
        bytes: Vec<u8>,
    ) -> SyncResult<Message> {
        let content = self
            .state
            .media()
            .upload_attachment(self.viewer, kind, extension, bytes)
            .await?;
        self.send(content.encode()).await
    }

    /// Tell the other participant we are typing. Throttled; safe to call per keystroke.
    pub fn send_typing(&self) {
        let _ = self.command(ChatCommand::Typing);
    }

    /// Catch up now, e.g. when the app returns to the foreground.
    pub fn refresh(&self) {
        let _ = self.command(ChatCommand::Refresh);
    }

    pub fn clear_draft(&self) {
        let _ = self.command(ChatCommand::ClearDraft);
    }

    pub fn is_open(&self) -> bool {
        self.scope.is_active()
    }

    /// Unsubscribe every channel and stop the poll and typing timers. Idempotent.
    pub fn close(&self) {
        if !self.scope.is_active() {
            return;
        }
        self.scope.close();
        self.task.abort();
        info!(conversation_id = %self.conversation, "chat closed");
    }
}

impl Drop for ChatHandle {
    fn drop(&mut self) {
        self.close();
    }
}
