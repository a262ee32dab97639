use super::{parse_all, text, timestamp, ProfileRepository};
use crate::backend::{row, BackendError, DataApi, Filter, Query, Table};
use crate::error::{SyncError, SyncResult};
use chrono::{DateTime, Utc};
use futures::future::try_join_all;
use reelchat_messaging::{Conversation, ConversationId, Profile, UserId};
use std::sync::Arc;
use tracing::{debug, info};

/// A conversation as the inbox shows it to one viewer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationSummary {
    pub conversation: Conversation,
    pub other: Profile,
    pub unread: u64,
}

impl ConversationSummary {
    pub fn id(&self) -> ConversationId {
        self.conversation.id
    }

    pub fn preview(&self) -> String {
        self.conversation.preview()
    }

    pub fn last_message_at(&self) -> DateTime<Utc> {
        self.conversation.last_message_at
    }
}

#[derive(Clone)]
pub struct ConversationRepository {
    data: Arc<dyn DataApi>,
}

fn pair_filter(a: UserId, b: UserId) -> Filter {
    Filter::Or(vec![
        vec![Filter::eq("user1_id", text(a)), Filter::eq("user2_id", text(b))],
        vec![Filter::eq("user1_id", text(b)), Filter::eq("user2_id", text(a))],
    ])
}

fn participant_filter(user: UserId) -> Filter {
    Filter::Or(vec![
        vec![Filter::eq("user1_id", text(user))],
        vec![Filter::eq("user2_id", text(user))],
    ])
}

impl ConversationRepository {
    pub fn new(data: Arc<dyn DataApi>) -> Self {
        Self { data }
    }

    pub async fn get(&self, id: ConversationId) -> SyncResult<Option<Conversation>> {
        let query = Query::new().filter(Filter::eq("id", text(id))).limit(1);
        let rows = self.data.select(Table::Conversations, &query).await?;
        Ok(parse_all("conversations", &rows, Conversation::from_row)
            .into_iter()
            .next())
    }

    /// The conversation between `a` and `b`, whichever way round it was created.
    pub async fn find_between(&self, a: UserId, b: UserId) -> SyncResult<Option<Conversation>> {
        let query = Query::new().filter(pair_filter(a, b)).limit(1);
        let rows = self.data.select(Table::Conversations, &query).await?;
        Ok(parse_all("conversations", &rows, Conversation::from_row)
            .into_iter()
            .next())
    }

    /// Idempotent: looks the pair up in both orders before inserting, and re-reads the
    /// winner if a concurrent creator got there first.
    pub async fn get_or_create(&self, a: UserId, b: UserId) -> SyncResult<Conversation> {
        if a == b {
            return Err(SyncError::InvalidAction(
                "cannot start a conversation with yourself".into(),
            ));
        }
        if let Some(existing) = self.find_between(a, b).await? {
            return Ok(existing);
        }

        let new_row = row([
            ("user1_id", text(a)),
            ("user2_id", text(b)),
            ("last_message_at", timestamp(Utc::now())),
        ]);
        match self.data.insert(Table::Conversations, new_row).await {
            Ok(stored) => {
                let conversation = Conversation::from_row(&stored)?;
                info!(conversation_id = %conversation.id, "conversation created");
                Ok(conversation)
            }
            Err(BackendError::Rejected(reason)) => {
                debug!(%reason, "conversation created concurrently");
                self.find_between(a, b)
                    .await?
                    .ok_or(SyncError::Backend(BackendError::NotFound))
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Every conversation of `viewer`, newest activity first, with the other
    /// participant's profile and the viewer's unread count.
    pub async fn list(&self, viewer: UserId) -> SyncResult<Vec<ConversationSummary>> {
        let query = Query::new()
            .filter(participant_filter(viewer))
            .order_by("last_message_at", false);
        let rows = self.data.select(Table::Conversations, &query).await?;
        let conversations = parse_all("conversations", &rows, Conversation::from_row);

        let mut others: Vec<UserId> = conversations
            .iter()
            .map(|conversation| conversation.other_participant(viewer))
            .collect();
        others.sort();
        others.dedup();
        let profiles = ProfileRepository::new(Arc::clone(&self.data))
            .by_ids(&others)
            .await?;

        let unread = try_join_all(
            conversations
                .iter()
                .map(|conversation| self.unread_count(conversation.id, viewer)),
        )
        .await?;

        let summaries = conversations
            .into_iter()
            .zip(unread)
            .map(|(conversation, unread)| {
                let other_id = conversation.other_participant(viewer);
                let other = profiles
                    .get(&other_id)
                    .cloned()
                    .unwrap_or_else(|| Profile::unknown(other_id));
                ConversationSummary {
                    conversation,
                    other,
                    unread,
                }
            })
            .collect();
        Ok(summaries)
    }

    /// Messages in `conversation` not sent by `viewer` and not yet read.
    pub async fn unread_count(&self, conversation: ConversationId, viewer: UserId) -> SyncResult<u64> {
        let query = Query::new()
            .filter(Filter::eq("conversation_id", text(conversation)))
            .filter(Filter::neq("sender_id", text(viewer)))
            .filter(Filter::is_null("read_at"));
        Ok(self.data.count(Table::Messages, &query).await?)
    }

    pub async fn update_preview(
        &self,
        conversation: ConversationId,
        content: &str,
        at: DateTime<Utc>,
    ) -> SyncResult<()> {
        let query = Query::new().filter(Filter::eq("id", text(conversation)));
        let patch = row([
            ("last_message", text(content)),
            ("last_message_at", timestamp(at)),
        ]);
        self.data.update(Table::Conversations, &query, patch).await?;
        Ok(())
    }

    /// Remove the conversation; the backend cascades the delete to its messages.
    pub async fn delete(&self, conversation: ConversationId) -> SyncResult<()> {
        let query = Query::new().filter(Filter::eq("id", text(conversation)));
        let removed = self.data.delete(Table::Conversations, &query).await?;
        if removed == 0 {
            return Err(SyncError::Backend(BackendError::NotFound));
        }
        info!(conversation_id = %conversation, "conversation deleted");
        Ok(())
    }
}
