use crate::{parse_row, ConversationId, MessageContent, Result, Row, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Preview shown for a conversation that has no messages yet.
pub const EMPTY_PREVIEW: &str = "Start a conversation";

/// A one-to-one conversation between two accounts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: ConversationId,
    pub user1_id: UserId,
    pub user2_id: UserId,
    #[serde(default)]
    pub last_message: Option<String>,
    pub last_message_at: DateTime<Utc>,
}

impl Conversation {
    pub fn from_row(row: &Row) -> Result<Self> {
        parse_row("conversations", row)
    }

    pub fn involves(&self, user: UserId) -> bool {
        self.user1_id == user || self.user2_id == user
    }

    /// The participant that is not `viewer`.
    pub fn other_participant(&self, viewer: UserId) -> UserId {
        if self.user1_id == viewer {
            self.user2_id
        } else {
            self.user1_id
        }
    }

    pub fn preview(&self) -> String {
        match self.last_message.as_deref() {
            None | Some("") => EMPTY_PREVIEW.to_string(),
            Some(raw) => MessageContent::parse(raw).preview().to_string(),
        }
    }

    /// Apply a preview patch unless it is older than what is already held.
    pub fn apply(&mut self, patch: &ConversationPatch) -> bool {
        if patch.last_message_at < self.last_message_at {
            return false;
        }
        if let Some(message) = &patch.last_message {
            self.last_message = Some(message.clone());
        }
        self.last_message_at = patch.last_message_at;
        true
    }
}

/// Preview fields carried by a conversation row change.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ConversationPatch {
    pub id: ConversationId,
    #[serde(default)]
    pub last_message: Option<String>,
    pub last_message_at: DateTime<Utc>,
}

impl ConversationPatch {
    pub fn from_row(row: &Row) -> Result<Self> {
        parse_row("conversations", row)
    }
}

/// Public profile of an account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub id: UserId,
    pub username: String,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

impl Profile {
    pub fn from_row(row: &Row) -> Result<Self> {
        parse_row("profiles", row)
    }

    /// Placeholder used when the other participant's profile could not be loaded.
    pub fn unknown(id: UserId) -> Self {
        Self {
            id,
            username: "Unknown".to_string(),
            avatar_url: None,
        }
    }
}
