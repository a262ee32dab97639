use super::queue::OutboundQueue;
use super::store::{LoadState, MergeOutcome, MessageStore};
use super::ChatSnapshot;
use crate::error::{SyncError, SyncResult};
use crate::polling::PollTimer;
use crate::realtime::{ChannelManager, ChannelScope, ScreenScope};
use crate::repository::MessageRepository;
use crate::typing::{TypingIndicator, TypingPayload, TypingThrottle, TYPING_EVENT};
use chrono::Utc;
use reelchat_messaging::{ConversationId, Message, MessageId, UserId};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, warn};

pub(super) enum ChatEvent {
    Loaded(SyncResult<Vec<Message>>),
    Remote(Message),
    Typing(UserId),
    Sent {
        pending_id: MessageId,
        result: SyncResult<Message>,
    },
    Polled(SyncResult<Vec<Message>>),
}

pub(super) enum ChatCommand {
    Send {
        content: String,
        responder: oneshot::Sender<SyncResult<Message>>,
    },
    Typing,
    Refresh,
    ClearDraft,
}

pub(super) struct ChatRuntime {
    pub conversation: ConversationId,
    pub viewer: UserId,
    pub store: MessageStore,
    pub outbound: OutboundQueue,
    pub typing: TypingIndicator,
    pub throttle: TypingThrottle,
    pub draft: Option<String>,
    pub realtime: bool,
    pub poll_interval: Duration,
    pub messages: MessageRepository,
    pub channels: ChannelManager,
    pub scope: ScreenScope,
    pub events_tx: mpsc::UnboundedSender<ChatEvent>,
    pub events_rx: mpsc::UnboundedReceiver<ChatEvent>,
    pub commands: mpsc::UnboundedReceiver<ChatCommand>,
    pub snapshot: watch::Sender<ChatSnapshot>,
}

impl ChatRuntime {
    pub async fn run(mut self) {
        self.load();
        let mut poll = PollTimer::new(self.poll_interval);

        loop {
            let typing_deadline = self.typing.next_deadline();
            tokio::select! {
                cmd = self.commands.recv() => {
                    match cmd {
                        Some(cmd) => self.handle_command(cmd),
                        None => break,
                    }
                }
                event = self.events_rx.recv() => {
                    match event {
                        Some(event) => self.handle_event(event),
                        None => break,
                    }
                }
                _ = poll.tick() => self.poll(),
                _ = sleep_until(typing_deadline.unwrap_or_else(Instant::now)), if typing_deadline.is_some() => {
                    self.typing.expire(Instant::now());
                }
            }
            if !self.scope.is_active() {
                break;
            }
            self.publish();
        }
        debug!(conversation_id = %self.conversation, "chat runtime stopped");
    }

    fn publish(&self) {
        self.snapshot.send_replace(ChatSnapshot {
            conversation_id: self.conversation,
            state: self.store.state(),
            messages: self.store.messages().to_vec(),
            other_typing: self.typing.is_typing(),
            draft: self.draft.clone(),
            realtime: self.realtime,
            sending: self.outbound.len(),
        });
    }

    /// Run `work` off the loop and feed its result back as an event, unless the
    /// screen has closed by then.
    fn spawn<F>(&self, work: F)
    where
        F: std::future::Future<Output = ChatEvent> + Send + 'static,
    {
        let events = self.events_tx.clone();
        let scope = self.scope.clone();
        tokio::spawn(async move {
            let event = work.await;
            if scope.is_active() {
                let _ = events.send(event);
            }
        });
    }

    fn load(&self) {
        let messages = self.messages.clone();
        let conversation = self.conversation;
        self.spawn(async move { ChatEvent::Loaded(messages.fetch_all(conversation).await) });
    }

    fn poll(&self) {
        if self.store.state() == LoadState::Loading {
            return;
        }
        let messages = self.messages.clone();
        let conversation = self.conversation;
        let cursor = self.store.cursor();
        self.spawn(async move {
            ChatEvent::Polled(messages.fetch_since(conversation, cursor).await)
        });
    }

    /// Fire-and-forget read receipt for everything the other side sent.
    fn mark_read(&mut self) {
        if self.store.mark_read_local(self.viewer, Utc::now()) == 0 {
            return;
        }
        let messages = self.messages.clone();
        let conversation = self.conversation;
        let viewer = self.viewer;
        tokio::spawn(async move {
            match messages.mark_read(conversation, viewer).await {
                Ok(marked) => debug!(conversation_id = %conversation, marked, "marked read"),
                Err(err) => warn!(conversation_id = %conversation, %err, "failed to mark messages read"),
            }
        });
    }

    fn handle_command(&mut self, cmd: ChatCommand) {
        match cmd {
            ChatCommand::Send { content, responder } => {
                self.draft = None;
                let pending = self.store.send_optimistic(self.viewer, content.clone());
                self.outbound.enqueue(pending.id, content.clone(), Some(responder));

                let messages = self.messages.clone();
                let conversation = self.conversation;
                let viewer = self.viewer;
                let pending_id = pending.id;
                self.spawn(async move {
                    ChatEvent::Sent {
                        pending_id,
                        result: messages.send(conversation, viewer, &content).await,
                    }
                });
            }
            ChatCommand::Typing => {
                if !self.throttle.ready(Instant::now()) {
                    return;
                }
                let channels = self.channels.clone();
                let scope = ChannelScope::Typing(self.conversation);
                let payload = TypingPayload { user_id: self.viewer }.to_value();
                tokio::spawn(async move {
                    if let Err(err) = channels.broadcast(&scope, TYPING_EVENT, payload).await {
                        debug!(%err, "typing signal dropped");
                    }
                });
            }
            ChatCommand::Refresh => self.poll(),
            ChatCommand::ClearDraft => self.draft = None,
        }
    }

    fn handle_event(&mut self, event: ChatEvent) {
        match event {
            ChatEvent::Loaded(Ok(history)) => {
                debug!(conversation_id = %self.conversation, count = history.len(), "history loaded");
                self.store.finish_loading(history);
                self.mark_read();
            }
            ChatEvent::Loaded(Err(err)) => {
                warn!(conversation_id = %self.conversation, %err, "failed to load messages");
                self.store.abandon_loading();
            }
            ChatEvent::Remote(message) => {
                let sender = message.sender_id;
                let outcome = self.store.merge_remote(message);
                if sender != self.viewer && outcome == MergeOutcome::Inserted {
                    self.typing.clear(sender);
                    self.mark_read();
                }
            }
            ChatEvent::Typing(user) => {
                if user != self.viewer {
                    self.typing.observe(user, Instant::now());
                }
            }
            ChatEvent::Sent { pending_id, result } => {
                let send = self.outbound.remove(pending_id);
                match result {
                    Ok(message) => {
                        self.store.confirm_sent(pending_id, message.clone());
                        if let Some(send) = send {
                            send.resolve(Ok(message));
                        }
                    }
                    Err(err) => {
                        let draft = self
                            .store
                            .rollback(pending_id)
                            .or_else(|| send.as_ref().map(|send| send.draft.clone()))
                            .unwrap_or_default();
                        warn!(conversation_id = %self.conversation, %err, "send failed, restoring draft");
                        self.draft = Some(draft.clone());
                        if let Some(send) = send {
                            send.resolve(Err(SyncError::SendFailed {
                                draft,
                                reason: err.to_string(),
                            }));
                        }
                    }
                }
            }
            ChatEvent::Polled(Ok(batch)) => {
                let fresh = self.store.merge_polled_batch(batch);
                if !fresh.is_empty() {
                    debug!(conversation_id = %self.conversation, count = fresh.len(), "poll caught up");
                }
                let viewer = self.viewer;
                let mut from_other = false;
                for message in fresh.iter().filter(|m| m.sender_id != viewer) {
                    self.typing.clear(message.sender_id);
                    from_other = true;
                }
                if from_other {
                    self.mark_read();
                }
            }
            ChatEvent::Polled(Err(err)) => {
                debug!(conversation_id = %self.conversation, %err, "poll failed; next tick retries");
            }
        }
    }
}
