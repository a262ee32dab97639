//! Typed access to backend tables.
//!
//! Every row leaving the data API is parsed here into the shared models; rows that do
//! not parse are logged and skipped so one bad record never blanks a whole screen.

mod conversations;
mod counters;
mod media;
mod messages;
mod notifications;
mod profiles;

pub use conversations::{ConversationRepository, ConversationSummary};
pub use counters::CounterRepository;
pub use media::{MediaRepository, CHAT_MEDIA_BUCKET};
pub use messages::MessageRepository;
pub use notifications::{NewNotification, NotificationRepository};
pub use profiles::{ProfileRepository, PEOPLE_SEARCH_LIMIT};

use chrono::{DateTime, Utc};
use reelchat_messaging::Row;
use serde_json::Value;
use tracing::warn;

fn parse_all<T, F>(table: &str, rows: &[Row], parse: F) -> Vec<T>
where
    F: Fn(&Row) -> reelchat_messaging::Result<T>,
{
    rows.iter()
        .filter_map(|row| match parse(row) {
            Ok(parsed) => Some(parsed),
            Err(err) => {
                warn!(table, %err, "skipping malformed row");
                None
            }
        })
        .collect()
}

fn text(value: impl ToString) -> Value {
    Value::String(value.to_string())
}

fn timestamp(at: DateTime<Utc>) -> Value {
    Value::String(at.to_rfc3339())
}
