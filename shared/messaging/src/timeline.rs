//! Chat timeline layout: which rows get a timestamp header.

use crate::{Message, UserId};
use chrono::Duration;

/// One rendered chat row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimelineRow<'a> {
    pub message: &'a Message,
    /// A timestamp header precedes this row.
    pub show_timestamp: bool,
    /// Sent by the viewer.
    pub mine: bool,
    /// Still waiting for the backend to confirm it.
    pub pending: bool,
}

/// Lay out `messages` (already in ascending order). The first row always carries a
/// header; later rows only when more than `gap` has passed since the previous one.
pub fn timeline(messages: &[Message], viewer: UserId, gap: Duration) -> Vec<TimelineRow<'_>> {
    let mut previous: Option<&Message> = None;
    messages
        .iter()
        .map(|message| {
            let show_timestamp = match previous {
                None => true,
                Some(prev) => message.created_at - prev.created_at > gap,
            };
            previous = Some(message);
            TimelineRow {
                message,
                show_timestamp,
                mine: message.sender_id == viewer,
                pending: message.is_pending(),
            }
        })
        .collect()
}
