use super::list::{ConversationList, PatchOutcome};
use super::{message_handlers, InboxSnapshot};
use crate::error::SyncResult;
use crate::messaging::LoadState;
use crate::polling::PollTimer;
use crate::realtime::{ChannelHandle, ChannelManager, ChannelScope, RealtimeResult, ScreenScope};
use crate::repository::{ConversationRepository, ConversationSummary};
use reelchat_messaging::{ConversationId, ConversationPatch, Message, UserId};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

pub(super) enum InboxEvent {
    Listed {
        ticket: u64,
        result: SyncResult<Vec<ConversationSummary>>,
    },
    ConversationChanged(ConversationPatch),
    ConversationRemoved(ConversationId),
    MessageInserted(Message),
    MessageUpdated(Message),
    Unread {
        conversation: ConversationId,
        ticket: u64,
        result: SyncResult<u64>,
    },
    MessagesWatched {
        seq: u64,
        ids: Vec<ConversationId>,
        result: RealtimeResult<ChannelHandle>,
    },
}

pub(super) enum InboxCommand {
    Refresh,
    Forget(ConversationId),
}

pub(super) struct InboxRuntime {
    pub viewer: UserId,
    pub list: ConversationList,
    pub state: LoadState,
    pub realtime: bool,
    pub full_loads: u64,
    /// A full list request is in flight.
    pub listing: bool,
    /// Another full list is wanted once the current one lands.
    pub relist: bool,
    /// Reads are numbered in issue order so a slow one cannot overwrite a newer count.
    pub tickets: u64,
    pub unread_ticket: HashMap<ConversationId, u64>,
    /// Conversation ids of the latest message channel requested, sorted.
    pub watched: Vec<ConversationId>,
    pub watch_seq: u64,
    pub messages_channel: Option<String>,
    /// Conversations the adopted message channel covers.
    pub live: Vec<ConversationId>,
    pub poll_interval: Duration,
    pub conversations: ConversationRepository,
    pub channels: ChannelManager,
    pub scope: ScreenScope,
    pub events_tx: mpsc::UnboundedSender<InboxEvent>,
    pub events_rx: mpsc::UnboundedReceiver<InboxEvent>,
    pub commands: mpsc::UnboundedReceiver<InboxCommand>,
    pub snapshot: watch::Sender<InboxSnapshot>,
}

impl InboxRuntime {
    pub async fn run(mut self) {
        self.reload();
        let mut poll = PollTimer::new(self.poll_interval);

        loop {
            tokio::select! {
                cmd = self.commands.recv() => {
                    match cmd {
                        Some(InboxCommand::Refresh) => self.reload(),
                        Some(InboxCommand::Forget(id)) => {
                            self.list.remove(id);
                        }
                        None => break,
                    }
                }
                event = self.events_rx.recv() => {
                    match event {
                        Some(event) => self.handle_event(event),
                        None => break,
                    }
                }
                _ = poll.tick() => self.reload(),
            }
            if !self.scope.is_active() {
                break;
            }
            self.watch_messages();
            self.publish();
        }
        debug!(user_id = %self.viewer, "inbox runtime stopped");
    }

    fn publish(&self) {
        self.snapshot.send_replace(InboxSnapshot {
            state: self.state,
            conversations: self.list.entries().to_vec(),
            total_unread: self.list.total_unread(),
            realtime: self.realtime,
            live_conversations: self.live.len(),
            full_loads: self.full_loads,
        });
    }

    fn spawn<F>(&self, work: F)
    where
        F: std::future::Future<Output = InboxEvent> + Send + 'static,
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

    fn next_ticket(&mut self) -> u64 {
        self.tickets += 1;
        self.tickets
    }

    fn reload(&mut self) {
        if self.listing {
            self.relist = true;
            return;
        }
        self.listing = true;
        let ticket = self.next_ticket();
        let conversations = self.conversations.clone();
        let viewer = self.viewer;
        self.spawn(async move {
            InboxEvent::Listed {
                ticket,
                result: conversations.list(viewer).await,
            }
        });
    }

    fn recount(&mut self, conversation: ConversationId) {
        let ticket = self.next_ticket();
        let conversations = self.conversations.clone();
        let viewer = self.viewer;
        self.spawn(async move {
            InboxEvent::Unread {
                conversation,
                ticket,
                result: conversations.unread_count(conversation, viewer).await,
            }
        });
    }

    /// Keep the message channel narrowed to the conversations on screen. The previous
    /// channel stays up until its replacement is subscribed.
    fn watch_messages(&mut self) {
        let mut ids: Vec<ConversationId> = self.list.entries().iter().map(|entry| entry.id()).collect();
        ids.sort();
        if ids == self.watched {
            return;
        }
        self.watched = ids.clone();
        self.watch_seq += 1;
        if ids.is_empty() {
            self.release_messages_channel();
            return;
        }

        let seq = self.watch_seq;
        let channels = self.channels.clone();
        let scope = ChannelScope::InboxMessages(self.viewer);
        let handlers = message_handlers(&ids);
        let sink = self.events_tx.clone();
        self.spawn(async move {
            let result = channels.open(&scope, handlers, sink).await;
            InboxEvent::MessagesWatched { seq, ids, result }
        });
    }

    fn release_messages_channel(&mut self) {
        if let Some(name) = self.messages_channel.take() {
            self.scope.release(&name);
        }
        self.live.clear();
    }

    fn handle_event(&mut self, event: InboxEvent) {
        match event {
            InboxEvent::Listed { ticket, result } => {
                self.listing = false;
                match result {
                    Ok(summaries) => {
                        let newer = &self.unread_ticket;
                        self.list.merge_reload(summaries, |id| {
                            newer.get(&id).is_some_and(|seen| *seen > ticket)
                        });
                        let list = &self.list;
                        self.unread_ticket.retain(|id, _| list.contains(*id));
                        for entry in self.list.entries() {
                            let seen = self.unread_ticket.entry(entry.id()).or_insert(0);
                            *seen = (*seen).max(ticket);
                        }
                        self.full_loads += 1;
                        self.state = LoadState::Ready;
                    }
                    Err(err) => {
                        warn!(user_id = %self.viewer, %err, "failed to load conversations");
                        self.state = LoadState::Ready;
                    }
                }
                if std::mem::take(&mut self.relist) {
                    self.reload();
                }
            }
            InboxEvent::ConversationChanged(patch) => match self.list.apply_patch(&patch) {
                PatchOutcome::Patched => {
                    debug!(conversation_id = %patch.id, "conversation preview patched");
                    // Covers messages sent while the message channel was being reopened.
                    self.recount(patch.id);
                }
                PatchOutcome::Stale => {}
                PatchOutcome::Unknown => self.reload(),
            },
            InboxEvent::ConversationRemoved(id) => {
                self.list.remove(id);
            }
            InboxEvent::MessageInserted(message) => {
                // Messages of conversations this inbox does not show are none of its business.
                if !self.list.contains(message.conversation_id) {
                    return;
                }
                self.list.note_message(&message);
                if message.sender_id != self.viewer {
                    self.recount(message.conversation_id);
                }
            }
            InboxEvent::MessageUpdated(message) => {
                if self.list.contains(message.conversation_id) && message.sender_id != self.viewer {
                    self.recount(message.conversation_id);
                }
            }
            InboxEvent::Unread {
                conversation,
                ticket,
                result,
            } => match result {
                Ok(unread) => {
                    let seen = self.unread_ticket.get(&conversation).copied().unwrap_or(0);
                    if ticket > seen && self.list.contains(conversation) {
                        self.list.set_unread(conversation, unread);
                        self.unread_ticket.insert(conversation, ticket);
                    }
                }
                Err(err) => {
                    debug!(conversation_id = %conversation, %err, "unread recount failed; next poll retries");
                }
            },
            InboxEvent::MessagesWatched { seq, ids, result } => {
                if seq != self.watch_seq {
                    // Superseded; dropping the handle closes it.
                    return;
                }
                match result {
                    Ok(handle) => {
                        let name = handle.name().to_string();
                        if self.scope.adopt(handle) {
                            if let Some(previous) = self.messages_channel.replace(name) {
                                self.scope.release(&previous);
                            }
                            // Read receipts may have landed before this channel was up.
                            let newly_live: Vec<ConversationId> =
                                ids.iter().filter(|id| !self.live.contains(id)).copied().collect();
                            for conversation in newly_live {
                                self.recount(conversation);
                            }
                            self.live = ids;
                        }
                    }
                    Err(err) => {
                        warn!(user_id = %self.viewer, %err, "message feed unavailable, polling only");
                        self.release_messages_channel();
                    }
                }
            }
        }
    }
}
