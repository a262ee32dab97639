//! Ordered, deduplicated message list for one open conversation.

use chrono::{DateTime, Utc};
use reelchat_messaging::{ConversationId, Message, MessageId, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
    Loading,
    Ready,
}

/// What a merge did to the list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// New entry.
    Inserted,
    /// A pending entry was swapped for its confirmed record.
    Confirmed(MessageId),
    /// Already held; read state was brought up to date.
    Refreshed,
    /// Already held, nothing changed.
    Duplicate,
    /// Belongs to another conversation.
    Ignored,
}

impl MergeOutcome {
    pub fn changed(self) -> bool {
        matches!(self, Self::Inserted | Self::Confirmed(_) | Self::Refreshed)
    }
}

/// Messages sorted ascending by creation time. At most one entry per confirmed id;
/// a pending entry is replaced, never duplicated, once its record is confirmed.
#[derive(Debug, Clone)]
pub struct MessageStore {
    conversation: ConversationId,
    state: LoadState,
    messages: Vec<Message>,
}

impl MessageStore {
    pub fn new(conversation: ConversationId) -> Self {
        Self {
            conversation,
            state: LoadState::Loading,
            messages: Vec::new(),
        }
    }

    pub fn conversation_id(&self) -> ConversationId {
        self.conversation
    }

    pub fn state(&self) -> LoadState {
        self.state
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn contains(&self, id: MessageId) -> bool {
        self.position(id).is_some()
    }

    fn position(&self, id: MessageId) -> Option<usize> {
        self.messages.iter().position(|message| message.id == id)
    }

    fn resort(&mut self) {
        // Stable, so entries sharing a timestamp keep their arrival order.
        self.messages.sort_by_key(|message| message.created_at);
    }

    /// Install the initial history. Anything that arrived or was sent while loading is
    /// merged on top so nothing is lost.
    pub fn finish_loading(&mut self, history: Vec<Message>) {
        let early = std::mem::take(&mut self.messages);
        for message in history {
            self.merge_remote(message);
        }
        for message in early {
            if message.is_pending() {
                self.messages.push(message);
            } else {
                self.merge_remote(message);
            }
        }
        self.resort();
        self.state = LoadState::Ready;
    }

    /// A failed load still leaves the screen usable with whatever is held.
    pub fn abandon_loading(&mut self) {
        self.state = LoadState::Ready;
    }

    /// Append a provisional message for a send the user just made.
    pub fn send_optimistic(&mut self, sender: UserId, content: String) -> Message {
        let mut message = Message::pending(self.conversation, sender, content);
        // Keep the tail ordered even if the local clock trails the server's.
        if let Some(last) = self.messages.last() {
            message.created_at = message.created_at.max(last.created_at);
        }
        self.messages.push(message.clone());
        message
    }

    /// Swap the pending entry for the stored record, keeping a single entry even if
    /// the realtime feed delivered the record first.
    pub fn confirm_sent(&mut self, pending: MessageId, confirmed: Message) -> MergeOutcome {
        let pending_at = self.position(pending);
        let confirmed_at = self.position(confirmed.id);
        match (pending_at, confirmed_at) {
            (Some(index), None) => {
                self.messages[index] = confirmed;
                self.resort();
                MergeOutcome::Confirmed(pending)
            }
            (Some(index), Some(_)) => {
                self.messages.remove(index);
                MergeOutcome::Confirmed(pending)
            }
            (None, Some(_)) => MergeOutcome::Duplicate,
            (None, None) => self.merge_remote(confirmed),
        }
    }

    /// Remove a pending entry whose send failed and hand back its text.
    pub fn rollback(&mut self, pending: MessageId) -> Option<String> {
        if !pending.is_pending() {
            return None;
        }
        let index = self.position(pending)?;
        Some(self.messages.remove(index).content)
    }

    /// Fold in a confirmed message from the realtime feed or a poll.
    pub fn merge_remote(&mut self, incoming: Message) -> MergeOutcome {
        if incoming.conversation_id != self.conversation || incoming.is_pending() {
            return MergeOutcome::Ignored;
        }

        if let Some(index) = self.position(incoming.id) {
            let held = &mut self.messages[index];
            if incoming.read_at.is_some() && held.read_at != incoming.read_at {
                held.read_at = incoming.read_at;
                return MergeOutcome::Refreshed;
            }
            return MergeOutcome::Duplicate;
        }

        let echo = self.messages.iter().position(|held| {
            held.is_pending()
                && held.sender_id == incoming.sender_id
                && held.content == incoming.content
        });
        if let Some(index) = echo {
            let pending = self.messages[index].id;
            self.messages[index] = incoming;
            self.resort();
            return MergeOutcome::Confirmed(pending);
        }

        let at = self
            .messages
            .partition_point(|held| held.created_at <= incoming.created_at);
        self.messages.insert(at, incoming);
        MergeOutcome::Inserted
    }

    /// Merge a batch fetched from the cursor onwards; returns the messages that were
    /// new to this list.
    pub fn merge_polled_batch(&mut self, batch: Vec<Message>) -> Vec<Message> {
        let mut fresh = Vec::new();
        for message in batch {
            let copy = message.clone();
            if let MergeOutcome::Inserted | MergeOutcome::Confirmed(_) = self.merge_remote(message) {
                fresh.push(copy);
            }
        }
        self.resort();
        fresh
    }

    /// Newest confirmed creation time held, or the Unix epoch when there is none.
    pub fn cursor(&self) -> DateTime<Utc> {
        self.messages
            .iter()
            .filter(|message| !message.is_pending())
            .map(|message| message.created_at)
            .max()
            .unwrap_or_default()
    }

    /// Apply a read receipt locally for every unread message from the other side.
    pub fn mark_read_local(&mut self, viewer: UserId, at: DateTime<Utc>) -> usize {
        let mut marked = 0;
        for message in &mut self.messages {
            if message.sender_id != viewer && message.read_at.is_none() && !message.is_pending() {
                message.read_at = Some(at);
                marked += 1;
            }
        }
        marked
    }

    pub fn unread_count(&self, viewer: UserId) -> usize {
        self.messages
            .iter()
            .filter(|message| message.sender_id != viewer && message.read_at.is_none())
            .count()
    }
}
