//! Conversation, message, counter and notification models shared across ReelChat clients.
//!
//! Backend rows arrive loosely typed; everything in this crate is parsed and validated
//! at that boundary so the sync engine only ever handles the typed entities below.

pub mod content;
pub mod conversation;
pub mod social;
pub mod timeline;

pub use content::{MediaKind, MessageContent};
pub use conversation::{Conversation, ConversationPatch, Profile};
pub use social::{Comment, CountChange, CounterKind, Notification, NotificationKind};
pub use timeline::{timeline, TimelineRow};

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use uuid::Uuid;

/// Loosely typed record as returned by the data API and the realtime row feed.
pub type Row = serde_json::Map<String, serde_json::Value>;

/// Unique identifier assigned to a logical conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationId(pub Uuid);

impl ConversationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConversationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Unique identifier for an account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub Uuid);

impl UserId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for UserId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Identifier of a post or comment. Backends hand these out either as strings or as
/// integers, so both are accepted and normalised to text.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct EntityId(pub String);

impl EntityId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for EntityId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            Number(i64),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Text(text) => Ok(Self(text)),
            Raw::Number(number) => Ok(Self(number.to_string())),
        }
    }
}

/// Prefix marking a client-generated identifier that has not been confirmed yet.
pub const PENDING_ID_PREFIX: &str = "temp-";

/// Identifier of a chat message.
///
/// A pending id is generated locally when the user hits send and is replaced by the
/// confirmed id once the backend has stored the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageId {
    Pending(Uuid),
    Confirmed(Uuid),
}

impl MessageId {
    pub fn pending() -> Self {
        Self::Pending(Uuid::new_v4())
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending(_))
    }

    pub fn confirmed(&self) -> Option<Uuid> {
        match self {
            Self::Confirmed(id) => Some(*id),
            Self::Pending(_) => None,
        }
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending(id) => write!(f, "{PENDING_ID_PREFIX}{id}"),
            Self::Confirmed(id) => id.fmt(f),
        }
    }
}

/// A single chat message as held by an open conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub read_at: Option<DateTime<Utc>>,
}

impl Message {
    /// Build a provisional message for an optimistic send.
    pub fn pending(conversation_id: ConversationId, sender_id: UserId, content: String) -> Self {
        Self {
            id: MessageId::pending(),
            conversation_id,
            sender_id,
            content,
            created_at: Utc::now(),
            read_at: None,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.id.is_pending()
    }

    pub fn classify(&self) -> MessageContent {
        MessageContent::parse(&self.content)
    }

    pub fn from_row(row: &Row) -> Result<Self> {
        #[derive(Deserialize)]
        struct MessageRow {
            id: Uuid,
            conversation_id: ConversationId,
            sender_id: UserId,
            #[serde(default)]
            content: String,
            created_at: DateTime<Utc>,
            #[serde(default)]
            read_at: Option<DateTime<Utc>>,
        }

        let row: MessageRow = parse_row("messages", row)?;
        Ok(Self {
            id: MessageId::Confirmed(row.id),
            conversation_id: row.conversation_id,
            sender_id: row.sender_id,
            content: row.content,
            created_at: row.created_at,
            read_at: row.read_at,
        })
    }
}

/// Deserialize a backend row into a typed record, naming the table on failure.
pub fn parse_row<T: DeserializeOwned>(table: &'static str, row: &Row) -> Result<T> {
    serde_json::from_value(serde_json::Value::Object(row.clone())).map_err(|source| {
        ModelError::MalformedRow {
            table,
            reason: source.to_string(),
        }
    })
}

/// Model-level errors.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("malformed {table} row: {reason}")]
    MalformedRow { table: &'static str, reason: String },
}

pub type Result<T> = std::result::Result<T, ModelError>;
