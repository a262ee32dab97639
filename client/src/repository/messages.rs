use super::{parse_all, text, timestamp, ConversationRepository};
use crate::backend::{row, DataApi, Filter, Query, Table};
use crate::error::SyncResult;
use chrono::{DateTime, Utc};
use reelchat_messaging::{ConversationId, Message, UserId};
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Clone)]
pub struct MessageRepository {
    data: Arc<dyn DataApi>,
}

impl MessageRepository {
    pub fn new(data: Arc<dyn DataApi>) -> Self {
        Self { data }
    }

    /// Full history of a conversation, oldest first.
    pub async fn fetch_all(&self, conversation: ConversationId) -> SyncResult<Vec<Message>> {
        let query = Query::new()
            .filter(Filter::eq("conversation_id", text(conversation)))
            .order_by("created_at", true);
        let rows = self.data.select(Table::Messages, &query).await?;
        Ok(parse_all("messages", &rows, Message::from_row))
    }

    /// Messages created at or after `cursor`. The bound is inclusive so a message
    /// sharing the cursor's timestamp is never skipped; callers drop the overlap.
    pub async fn fetch_since(
        &self,
        conversation: ConversationId,
        cursor: DateTime<Utc>,
    ) -> SyncResult<Vec<Message>> {
        let query = Query::new()
            .filter(Filter::eq("conversation_id", text(conversation)))
            .filter(Filter::gte("created_at", timestamp(cursor)))
            .order_by("created_at", true);
        let rows = self.data.select(Table::Messages, &query).await?;
        Ok(parse_all("messages", &rows, Message::from_row))
    }

    /// Store a message and bump the conversation preview. The stored row, with its
    /// permanent id and server timestamp, is returned.
    pub async fn send(
        &self,
        conversation: ConversationId,
        sender: UserId,
        content: &str,
    ) -> SyncResult<Message> {
        let new_row = row([
            ("conversation_id", text(conversation)),
            ("sender_id", text(sender)),
            ("content", text(content)),
        ]);
        let stored = self.data.insert(Table::Messages, new_row).await?;
        let message = Message::from_row(&stored)?;
        debug!(conversation_id = %conversation, message_id = %message.id, "message stored");

        if let Err(err) = ConversationRepository::new(Arc::clone(&self.data))
            .update_preview(conversation, content, message.created_at)
            .await
        {
            warn!(conversation_id = %conversation, %err, "failed to update conversation preview");
        }
        Ok(message)
    }

    /// Stamp every unread message from the other side as read now. Returns how many
    /// rows changed.
    pub async fn mark_read(&self, conversation: ConversationId, viewer: UserId) -> SyncResult<usize> {
        let query = Query::new()
            .filter(Filter::eq("conversation_id", text(conversation)))
            .filter(Filter::neq("sender_id", text(viewer)))
            .filter(Filter::is_null("read_at"));
        let patch = row([("read_at", timestamp(Utc::now()))]);
        let updated = self.data.update(Table::Messages, &query, patch).await?;
        Ok(updated.len())
    }
}
