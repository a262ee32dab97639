use super::{parse_all, text};
use crate::backend::{row, BackendError, DataApi, Filter, Query, RowEventKind, RowListener, Table};
use crate::error::{SyncError, SyncResult};
use reelchat_messaging::{Comment, CounterKind, EntityId, UserId};
use serde::Deserialize;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// Where a counter's backing rows live.
struct Layout {
    table: Table,
    entity_column: &'static str,
    viewer_column: Option<&'static str>,
}

fn layout(kind: CounterKind) -> Layout {
    match kind {
        CounterKind::PostLikes => Layout {
            table: Table::PostLikes,
            entity_column: "post_id",
            viewer_column: Some("user_id"),
        },
        CounterKind::PostComments => Layout {
            table: Table::Comments,
            entity_column: "post_id",
            viewer_column: None,
        },
        CounterKind::CommentLikes => Layout {
            table: Table::CommentLikes,
            entity_column: "comment_id",
            viewer_column: Some("user_id"),
        },
        CounterKind::Followers => Layout {
            table: Table::Follows,
            entity_column: "following_id",
            viewer_column: Some("follower_id"),
        },
    }
}

#[derive(Deserialize)]
struct OwnerRow {
    user_id: UserId,
}

/// Reads and mutations behind likes, comments and follows.
#[derive(Clone)]
pub struct CounterRepository {
    data: Arc<dyn DataApi>,
}

impl CounterRepository {
    pub fn new(data: Arc<dyn DataApi>) -> Self {
        Self { data }
    }

    /// Row-change interest matching every backing row of one entity's counter.
    pub fn listener(kind: CounterKind, entity: &EntityId) -> RowListener {
        let layout = layout(kind);
        RowListener::new(layout.table, RowEventKind::Any)
            .with_filter(Filter::eq(layout.entity_column, entity.as_str()))
    }

    pub async fn count(&self, kind: CounterKind, entity: &EntityId) -> SyncResult<i64> {
        let layout = layout(kind);
        let query = Query::new().filter(Filter::eq(layout.entity_column, entity.as_str()));
        let count = self.data.count(layout.table, &query).await?;
        Ok(i64::try_from(count).unwrap_or(i64::MAX))
    }

    fn viewer_query(kind: CounterKind, entity: &EntityId, viewer: UserId) -> SyncResult<(Table, Query)> {
        let layout = layout(kind);
        let viewer_column = layout.viewer_column.ok_or_else(|| {
            SyncError::InvalidAction(format!("{kind:?} cannot be toggled"))
        })?;
        let query = Query::new()
            .filter(Filter::eq(layout.entity_column, entity.as_str()))
            .filter(Filter::eq(viewer_column, text(viewer)));
        Ok((layout.table, query))
    }

    /// Whether `viewer` has liked or followed the entity. Always false for comment counts.
    pub async fn is_engaged(&self, kind: CounterKind, entity: &EntityId, viewer: UserId) -> SyncResult<bool> {
        if !kind.is_toggle() {
            return Ok(false);
        }
        let (table, query) = Self::viewer_query(kind, entity, viewer)?;
        Ok(self.data.count(table, &query).await? > 0)
    }

    /// Record the viewer's like or follow. Already engaged is not an error.
    pub async fn engage(&self, kind: CounterKind, entity: &EntityId, viewer: UserId) -> SyncResult<()> {
        let layout = layout(kind);
        let viewer_column = layout.viewer_column.ok_or_else(|| {
            SyncError::InvalidAction(format!("{kind:?} cannot be toggled"))
        })?;
        let new_row = row([
            (layout.entity_column, text(entity)),
            (viewer_column, text(viewer)),
        ]);
        match self.data.insert(layout.table, new_row).await {
            Ok(_) => Ok(()),
            Err(BackendError::Rejected(reason)) => {
                debug!(%entity, %reason, "already engaged");
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }

    pub async fn disengage(&self, kind: CounterKind, entity: &EntityId, viewer: UserId) -> SyncResult<()> {
        let (table, query) = Self::viewer_query(kind, entity, viewer)?;
        self.data.delete(table, &query).await?;
        Ok(())
    }

    pub async fn add_comment(
        &self,
        post: &EntityId,
        author: UserId,
        comment: &str,
        parent: Option<&EntityId>,
    ) -> SyncResult<Comment> {
        let mut new_row = row([
            ("post_id", text(post)),
            ("user_id", text(author)),
            ("comment", text(comment)),
        ]);
        if let Some(parent) = parent {
            new_row.insert("parent_id".into(), text(parent));
        }
        let stored = self.data.insert(Table::Comments, new_row).await?;
        Ok(Comment::from_row(&stored)?)
    }

    pub async fn comments(&self, post: &EntityId) -> SyncResult<Vec<Comment>> {
        let query = Query::new()
            .filter(Filter::eq("post_id", post.as_str()))
            .order_by("created_at", true);
        let rows = self.data.select(Table::Comments, &query).await?;
        Ok(parse_all("comments", &rows, Comment::from_row))
    }

    /// Account that should hear about engagement with the entity.
    pub async fn owner_of(&self, kind: CounterKind, entity: &EntityId) -> SyncResult<Option<UserId>> {
        let table = match kind {
            CounterKind::Followers => {
                return Ok(Uuid::parse_str(entity.as_str()).ok().map(UserId));
            }
            CounterKind::PostLikes | CounterKind::PostComments => Table::Posts,
            CounterKind::CommentLikes => Table::Comments,
        };
        let query = Query::new().filter(Filter::eq("id", entity.as_str())).limit(1);
        let rows = self.data.select(table, &query).await?;
        Ok(parse_all(table.name(), &rows, |row| {
            reelchat_messaging::parse_row::<OwnerRow>("owners", row)
        })
        .into_iter()
        .next()
        .map(|owner| owner.user_id))
    }

    /// How many accounts `user` follows.
    pub async fn following_count(&self, user: UserId) -> SyncResult<i64> {
        let query = Query::new().filter(Filter::eq("follower_id", text(user)));
        let count = self.data.count(Table::Follows, &query).await?;
        Ok(i64::try_from(count).unwrap_or(i64::MAX))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use serde_json::json;

    fn repo(backend: &MemoryBackend) -> CounterRepository {
        CounterRepository::new(Arc::new(backend.clone()))
    }

    #[tokio::test]
    async fn like_then_unlike_round_trips_the_count() {
        let backend = MemoryBackend::new();
        let post = EntityId::new("42");
        let viewer = UserId::new();

        repo(&backend).engage(CounterKind::PostLikes, &post, viewer).await.unwrap();
        repo(&backend).engage(CounterKind::PostLikes, &post, viewer).await.unwrap();
        assert_eq!(repo(&backend).count(CounterKind::PostLikes, &post).await.unwrap(), 1);
        assert!(repo(&backend).is_engaged(CounterKind::PostLikes, &post, viewer).await.unwrap());

        repo(&backend).disengage(CounterKind::PostLikes, &post, viewer).await.unwrap();
        assert_eq!(repo(&backend).count(CounterKind::PostLikes, &post).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn numeric_post_ids_match_their_text_form() {
        let backend = MemoryBackend::new();
        backend.seed(
            Table::PostLikes,
            row([("post_id", json!(42)), ("user_id", json!(UserId::new()))]),
        );
        let count = repo(&backend)
            .count(CounterKind::PostLikes, &EntityId::new("42"))
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn follows_track_both_directions() {
        let backend = MemoryBackend::new();
        let (fan, star) = (UserId::new(), UserId::new());
        let target = EntityId::new(star.to_string());

        repo(&backend).engage(CounterKind::Followers, &target, fan).await.unwrap();
        assert_eq!(repo(&backend).count(CounterKind::Followers, &target).await.unwrap(), 1);
        assert_eq!(repo(&backend).following_count(fan).await.unwrap(), 1);
        assert_eq!(
            repo(&backend).owner_of(CounterKind::Followers, &target).await.unwrap(),
            Some(star)
        );
    }

    #[tokio::test]
    async fn replies_keep_their_parent() {
        let backend = MemoryBackend::new();
        let post = EntityId::new("7");
        let author = UserId::new();
        let top = repo(&backend).add_comment(&post, author, "first", None).await.unwrap();
        let reply = repo(&backend)
            .add_comment(&post, author, "re", Some(&top.id))
            .await
            .unwrap();

        assert_eq!(reply.parent_id, Some(top.id));
        assert_eq!(repo(&backend).comments(&post).await.unwrap().len(), 2);
        assert_eq!(repo(&backend).count(CounterKind::PostComments, &post).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn comment_counts_cannot_be_toggled() {
        let backend = MemoryBackend::new();
        let err = repo(&backend)
            .engage(CounterKind::PostComments, &EntityId::new("1"), UserId::new())
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::InvalidAction(_)));
    }
}
