use super::{parse_all, text};
use crate::backend::{row, BackendError, DataApi, Filter, Query, Table};
use crate::error::{SyncError, SyncResult};
use reelchat_messaging::{EntityId, Notification, NotificationKind, UserId};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

/// Activity to report to another account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewNotification {
    pub recipient: UserId,
    pub actor: UserId,
    pub kind: NotificationKind,
    pub post_id: Option<EntityId>,
    pub comment: Option<String>,
}

#[derive(Clone)]
pub struct NotificationRepository {
    data: Arc<dyn DataApi>,
}

impl NotificationRepository {
    pub fn new(data: Arc<dyn DataApi>) -> Self {
        Self { data }
    }

    /// Newest first.
    pub async fn list(&self, user: UserId, limit: usize) -> SyncResult<Vec<Notification>> {
        let query = Query::new()
            .filter(Filter::eq("user_id", text(user)))
            .order_by("created_at", false)
            .limit(limit);
        let rows = self.data.select(Table::Notifications, &query).await?;
        Ok(parse_all("notifications", &rows, Notification::from_row))
    }

    pub async fn unread_count(&self, user: UserId) -> SyncResult<u64> {
        let query = Query::new()
            .filter(Filter::eq("user_id", text(user)))
            .filter(Filter::eq("read", false));
        Ok(self.data.count(Table::Notifications, &query).await?)
    }

    pub async fn mark_read(&self, id: &EntityId) -> SyncResult<()> {
        let query = Query::new().filter(Filter::eq("id", id.as_str()));
        let updated = self
            .data
            .update(Table::Notifications, &query, row([("read", Value::Bool(true))]))
            .await?;
        if updated.is_empty() {
            return Err(SyncError::Backend(BackendError::NotFound));
        }
        Ok(())
    }

    pub async fn mark_all_read(&self, user: UserId) -> SyncResult<usize> {
        let query = Query::new()
            .filter(Filter::eq("user_id", text(user)))
            .filter(Filter::eq("read", false));
        let updated = self
            .data
            .update(Table::Notifications, &query, row([("read", Value::Bool(true))]))
            .await?;
        Ok(updated.len())
    }

    pub async fn delete(&self, id: &EntityId) -> SyncResult<()> {
        let query = Query::new().filter(Filter::eq("id", id.as_str()));
        self.data.delete(Table::Notifications, &query).await?;
        Ok(())
    }

    /// Best effort: nobody is notified about their own activity, and a failed insert
    /// is only logged.
    pub async fn notify(&self, notification: NewNotification) {
        if notification.recipient == notification.actor {
            return;
        }
        let mut new_row = row([
            ("user_id", text(notification.recipient)),
            ("actor_id", text(notification.actor)),
            ("type", serde_json::to_value(notification.kind).unwrap_or(Value::Null)),
        ]);
        if let Some(post) = &notification.post_id {
            new_row.insert("post_id".into(), text(post));
        }
        if let Some(comment) = &notification.comment {
            new_row.insert("comment".into(), text(comment));
        }
        match self.data.insert(Table::Notifications, new_row).await {
            Ok(_) => debug!(recipient = %notification.recipient, kind = ?notification.kind, "notification sent"),
            Err(err) => warn!(recipient = %notification.recipient, %err, "failed to create notification"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;

    fn repo(backend: &MemoryBackend) -> NotificationRepository {
        NotificationRepository::new(Arc::new(backend.clone()))
    }

    fn like(recipient: UserId, actor: UserId) -> NewNotification {
        NewNotification {
            recipient,
            actor,
            kind: NotificationKind::Like,
            post_id: Some(EntityId::new("9")),
            comment: None,
        }
    }

    #[tokio::test]
    async fn self_activity_is_never_reported() {
        let backend = MemoryBackend::new();
        let me = UserId::new();
        repo(&backend).notify(like(me, me)).await;
        assert!(backend.rows(Table::Notifications).is_empty());
    }

    #[tokio::test]
    async fn mark_all_read_clears_the_badge() {
        let backend = MemoryBackend::new();
        let (me, fan) = (UserId::new(), UserId::new());
        repo(&backend).notify(like(me, fan)).await;
        repo(&backend).notify(like(me, fan)).await;
        assert_eq!(repo(&backend).unread_count(me).await.unwrap(), 2);

        let listed = repo(&backend).list(me, 60).await.unwrap();
        assert_eq!(listed.len(), 2);
        repo(&backend).mark_read(&listed[0].id).await.unwrap();
        assert_eq!(repo(&backend).unread_count(me).await.unwrap(), 1);

        assert_eq!(repo(&backend).mark_all_read(me).await.unwrap(), 1);
        assert_eq!(repo(&backend).unread_count(me).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn failed_inserts_are_swallowed() {
        let backend = MemoryBackend::new();
        backend.fail_next_writes(1);
        repo(&backend).notify(like(UserId::new(), UserId::new())).await;
        assert!(backend.rows(Table::Notifications).is_empty());
    }
}
