//! Typing presence: a best-effort broadcast with local expiry.

use reelchat_messaging::UserId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

/// Broadcast event name on a conversation's typing channel.
pub const TYPING_EVENT: &str = "typing";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingPayload {
    pub user_id: UserId,
}

impl TypingPayload {
    pub fn to_value(self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }

    pub fn from_value(value: &serde_json::Value) -> Option<Self> {
        serde_json::from_value(value.clone()).ok()
    }
}

/// Who is typing right now. Each signal arms an expiry that a newer signal pushes
/// back; a real message from that sender clears it at once.
#[derive(Debug, Clone)]
pub struct TypingIndicator {
    timeout: Duration,
    typing: HashMap<UserId, Instant>,
}

impl TypingIndicator {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            typing: HashMap::new(),
        }
    }

    pub fn observe(&mut self, user: UserId, now: Instant) {
        self.typing.insert(user, now + self.timeout);
    }

    /// Returns true if `user` was shown as typing.
    pub fn clear(&mut self, user: UserId) -> bool {
        self.typing.remove(&user).is_some()
    }

    /// Drop every expired signal; true if anything changed.
    pub fn expire(&mut self, now: Instant) -> bool {
        let before = self.typing.len();
        self.typing.retain(|_, deadline| *deadline > now);
        self.typing.len() != before
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.typing.values().min().copied()
    }

    pub fn is_typing(&self) -> bool {
        !self.typing.is_empty()
    }

    pub fn is_user_typing(&self, user: UserId) -> bool {
        self.typing.contains_key(&user)
    }
}

/// Rate limit for outgoing typing signals.
#[derive(Debug, Clone)]
pub struct TypingThrottle {
    interval: Duration,
    last_sent: Option<Instant>,
}

impl TypingThrottle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_sent: None,
        }
    }

    /// True (and the window restarts) when a signal may go out at `now`.
    pub fn ready(&mut self, now: Instant) -> bool {
        match self.last_sent {
            Some(last) if now.duration_since(last) < self.interval => false,
            _ => {
                self.last_sent = Some(now);
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signals_expire_after_the_timeout() {
        let start = Instant::now();
        let them = UserId::new();
        let mut indicator = TypingIndicator::new(Duration::from_secs(3));
        indicator.observe(them, start);

        assert!(!indicator.expire(start + Duration::from_secs(2)));
        assert!(indicator.is_user_typing(them));
        assert!(indicator.expire(start + Duration::from_millis(3500)));
        assert!(!indicator.is_typing());
    }

    #[test]
    fn new_signals_push_the_expiry_back() {
        let start = Instant::now();
        let them = UserId::new();
        let mut indicator = TypingIndicator::new(Duration::from_secs(3));
        indicator.observe(them, start);
        indicator.observe(them, start + Duration::from_secs(2));

        indicator.expire(start + Duration::from_secs(4));
        assert!(indicator.is_typing());
        assert_eq!(indicator.next_deadline(), Some(start + Duration::from_secs(5)));
    }

    #[test]
    fn a_message_clears_the_sender() {
        let them = UserId::new();
        let mut indicator = TypingIndicator::new(Duration::from_secs(3));
        indicator.observe(them, Instant::now());
        assert!(indicator.clear(them));
        assert!(!indicator.clear(them));
    }

    #[test]
    fn throttle_allows_one_signal_per_window() {
        let start = Instant::now();
        let mut throttle = TypingThrottle::new(Duration::from_secs(2));
        assert!(throttle.ready(start));
        assert!(!throttle.ready(start + Duration::from_millis(1500)));
        assert!(throttle.ready(start + Duration::from_secs(2)));
    }

    #[test]
    fn payload_uses_camel_case() {
        let user = UserId::new();
        let value = TypingPayload { user_id: user }.to_value();
        assert_eq!(value["userId"], serde_json::json!(user));
        assert_eq!(TypingPayload::from_value(&value).map(|p| p.user_id), Some(user));
        assert!(TypingPayload::from_value(&serde_json::json!({})).is_none());
    }
}
