//! Engagement models: counters, comments and notifications.

use crate::{parse_row, EntityId, Result, Row, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which engagement count a counter tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CounterKind {
    /// Likes on a post; the viewer flag is "I liked this".
    PostLikes,
    /// Comments on a post; there is no viewer flag.
    PostComments,
    /// Likes on a comment.
    CommentLikes,
    /// Followers of a user; the viewer flag is "I follow them".
    Followers,
}

impl CounterKind {
    pub fn channel_prefix(self) -> &'static str {
        match self {
            Self::PostLikes => "likes-rt",
            Self::PostComments => "comments-rt",
            Self::CommentLikes => "comment-likes-rt",
            Self::Followers => "follows-rt",
        }
    }

    /// Whether the viewer can toggle this counter on and off.
    pub fn is_toggle(self) -> bool {
        !matches!(self, Self::PostComments)
    }

    /// Notification sent to the entity owner when a viewer engages.
    pub fn notification(self) -> NotificationKind {
        match self {
            Self::PostLikes | Self::CommentLikes => NotificationKind::Like,
            Self::PostComments => NotificationKind::Comment,
            Self::Followers => NotificationKind::Follow,
        }
    }
}

/// Payload of the `count_change` broadcast event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CountChange {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor_id: Option<UserId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<i64>,
}

impl CountChange {
    pub const EVENT: &'static str = "count_change";

    pub fn to_payload(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }

    /// Lenient parse: a broadcast with unusable fields still counts as a signal.
    pub fn from_payload(payload: &serde_json::Value) -> Self {
        serde_json::from_value(payload.clone()).unwrap_or_default()
    }
}

/// A comment on a post, optionally replying to another comment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    pub id: EntityId,
    pub post_id: EntityId,
    pub user_id: UserId,
    pub comment: String,
    #[serde(default)]
    pub parent_id: Option<EntityId>,
    pub created_at: DateTime<Utc>,
}

impl Comment {
    pub fn from_row(row: &Row) -> Result<Self> {
        parse_row("comments", row)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Like,
    Comment,
    Reply,
    Follow,
    Mention,
    Post,
}

/// An activity notification addressed to `user_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub id: EntityId,
    pub user_id: UserId,
    pub actor_id: UserId,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    #[serde(default)]
    pub post_id: Option<EntityId>,
    #[serde(default)]
    pub comment: Option<String>,
    #[serde(default)]
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

impl Notification {
    pub fn from_row(row: &Row) -> Result<Self> {
        parse_row("notifications", row)
    }
}
