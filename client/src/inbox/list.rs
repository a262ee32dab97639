//! Conversation list ordered by latest activity.

use crate::repository::ConversationSummary;
use reelchat_messaging::{ConversationId, ConversationPatch, Message};
use std::cmp::Ordering;

/// Result of an incremental update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchOutcome {
    Patched,
    /// Older than what is held; ignored.
    Stale,
    /// Not in the list; only a full reload can place it.
    Unknown,
}

/// Summaries sorted by last-message time, newest first.
#[derive(Debug, Clone, Default)]
pub struct ConversationList {
    entries: Vec<ConversationSummary>,
}

fn newest_first(a: &ConversationSummary, b: &ConversationSummary) -> Ordering {
    b.last_message_at()
        .cmp(&a.last_message_at())
        .then_with(|| a.id().cmp(&b.id()))
}

impl ConversationList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> &[ConversationSummary] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, id: ConversationId) -> bool {
        self.get(id).is_some()
    }

    pub fn get(&self, id: ConversationId) -> Option<&ConversationSummary> {
        self.entries.iter().find(|entry| entry.id() == id)
    }

    fn get_mut(&mut self, id: ConversationId) -> Option<&mut ConversationSummary> {
        self.entries.iter_mut().find(|entry| entry.id() == id)
    }

    fn resort(&mut self) {
        self.entries.sort_by(newest_first);
    }

    pub fn replace_all(&mut self, entries: Vec<ConversationSummary>) {
        self.entries = entries;
        self.resort();
    }

    /// Install a full reload that may have been requested before changes the list has
    /// already applied. Previews newer than the reloaded ones survive, and so do the
    /// unread counts for which `keep_unread` says the held value is fresher.
    pub fn merge_reload<F>(&mut self, mut entries: Vec<ConversationSummary>, keep_unread: F)
    where
        F: Fn(ConversationId) -> bool,
    {
        for entry in &mut entries {
            let Some(held) = self.get(entry.id()) else {
                continue;
            };
            if held.last_message_at() > entry.last_message_at() {
                entry.conversation.last_message = held.conversation.last_message.clone();
                entry.conversation.last_message_at = held.conversation.last_message_at;
            }
            if keep_unread(entry.id()) {
                entry.unread = held.unread;
            }
        }
        self.replace_all(entries);
    }

    /// Patch the preview fields of a known conversation.
    pub fn apply_patch(&mut self, patch: &ConversationPatch) -> PatchOutcome {
        let Some(entry) = self.get_mut(patch.id) else {
            return PatchOutcome::Unknown;
        };
        if !entry.conversation.apply(patch) {
            return PatchOutcome::Stale;
        }
        self.resort();
        PatchOutcome::Patched
    }

    /// Treat a new message as a preview update for its conversation.
    pub fn note_message(&mut self, message: &Message) -> PatchOutcome {
        self.apply_patch(&ConversationPatch {
            id: message.conversation_id,
            last_message: Some(message.content.clone()),
            last_message_at: message.created_at,
        })
    }

    /// Returns true if the count changed.
    pub fn set_unread(&mut self, id: ConversationId, unread: u64) -> bool {
        match self.get_mut(id) {
            Some(entry) if entry.unread != unread => {
                entry.unread = unread;
                true
            }
            _ => false,
        }
    }

    pub fn remove(&mut self, id: ConversationId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|entry| entry.id() != id);
        self.entries.len() != before
    }

    pub fn total_unread(&self) -> u64 {
        self.entries.iter().map(|entry| entry.unread).sum()
    }

    /// Local filter by the other participant's username or the preview text.
    pub fn search(&self, query: &str) -> Vec<ConversationSummary> {
        let needle = query.trim().to_lowercase();
        if needle.is_empty() {
            return self.entries.clone();
        }
        self.entries
            .iter()
            .filter(|entry| {
                entry.other.username.to_lowercase().contains(&needle)
                    || entry.preview().to_lowercase().contains(&needle)
            })
            .cloned()
            .collect()
    }
}
