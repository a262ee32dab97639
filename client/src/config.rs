use anyhow::Context;
use std::env;
use std::time::Duration;

/// Timing and sizing knobs for the sync engine.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// How often an open chat re-queries for messages newer than its cursor.
    pub chat_poll_interval: Duration,
    /// How often the inbox re-fetches the conversation list.
    pub inbox_poll_interval: Duration,
    /// How long a remote typing indicator stays visible without a new event.
    pub typing_timeout: Duration,
    /// Minimum spacing between outgoing typing events.
    pub typing_throttle: Duration,
    /// Window in which counter signals are coalesced.
    pub counter_debounce: Duration,
    /// Gap after which the chat timeline repeats a timestamp header.
    pub timestamp_gap: Duration,
    /// How long to wait for a channel subscription before falling back to polling.
    pub subscribe_timeout: Duration,
    pub notification_limit: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            chat_poll_interval: Duration::from_secs(3),
            inbox_poll_interval: Duration::from_secs(6),
            typing_timeout: Duration::from_secs(3),
            typing_throttle: Duration::from_secs(2),
            counter_debounce: Duration::from_millis(200),
            timestamp_gap: Duration::from_secs(5 * 60),
            subscribe_timeout: Duration::from_secs(10),
            notification_limit: 60,
        }
    }
}

impl SyncConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            chat_poll_interval: millis("REELCHAT_CHAT_POLL_MS", defaults.chat_poll_interval)?,
            inbox_poll_interval: millis("REELCHAT_INBOX_POLL_MS", defaults.inbox_poll_interval)?,
            typing_timeout: millis("REELCHAT_TYPING_TIMEOUT_MS", defaults.typing_timeout)?,
            typing_throttle: millis("REELCHAT_TYPING_THROTTLE_MS", defaults.typing_throttle)?,
            counter_debounce: millis("REELCHAT_COUNTER_DEBOUNCE_MS", defaults.counter_debounce)?,
            timestamp_gap: match parsed::<u64>("REELCHAT_TIMESTAMP_GAP_SECS")? {
                Some(secs) => Duration::from_secs(secs),
                None => defaults.timestamp_gap,
            },
            subscribe_timeout: millis(
                "REELCHAT_SUBSCRIBE_TIMEOUT_MS",
                defaults.subscribe_timeout,
            )?,
            notification_limit: parsed("REELCHAT_NOTIFICATION_LIMIT")?
                .unwrap_or(defaults.notification_limit),
        })
    }

    pub fn with_chat_poll_interval(mut self, interval: Duration) -> Self {
        self.chat_poll_interval = interval;
        self
    }

    pub fn with_inbox_poll_interval(mut self, interval: Duration) -> Self {
        self.inbox_poll_interval = interval;
        self
    }

    /// Timestamp gap as a chrono duration, for timeline layout.
    pub fn timeline_gap(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.timestamp_gap).unwrap_or_else(|_| chrono::Duration::minutes(5))
    }
}

fn parsed<T>(var: &str) -> anyhow::Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(var) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .with_context(|| format!("invalid value for {var}: {raw:?}")),
        Err(_) => Ok(None),
    }
}

fn millis(var: &str, default: Duration) -> anyhow::Result<Duration> {
    Ok(parsed::<u64>(var)?
        .map(Duration::from_millis)
        .unwrap_or(default))
}
