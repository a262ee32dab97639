use super::{parse_all, text};
use crate::backend::{DataApi, Filter, Query, Table};
use crate::error::SyncResult;
use reelchat_messaging::{Profile, UserId};
use std::collections::HashMap;
use std::sync::Arc;

/// Upper bound on people-search results.
pub const PEOPLE_SEARCH_LIMIT: usize = 20;

#[derive(Clone)]
pub struct ProfileRepository {
    data: Arc<dyn DataApi>,
}

impl ProfileRepository {
    pub fn new(data: Arc<dyn DataApi>) -> Self {
        Self { data }
    }

    pub async fn get(&self, id: UserId) -> SyncResult<Option<Profile>> {
        Ok(self.by_ids(&[id]).await?.remove(&id))
    }

    pub async fn by_ids(&self, ids: &[UserId]) -> SyncResult<HashMap<UserId, Profile>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let query = Query::new().filter(Filter::any_of("id", ids.iter().map(text)));
        let rows = self.data.select(Table::Profiles, &query).await?;
        Ok(parse_all("profiles", &rows, Profile::from_row)
            .into_iter()
            .map(|profile| (profile.id, profile))
            .collect())
    }

    /// Usernames containing `query`, case-insensitively, never including `exclude`.
    pub async fn search(&self, query: &str, exclude: UserId) -> SyncResult<Vec<Profile>> {
        let query = query.trim();
        if query.is_empty() {
            return Ok(Vec::new());
        }
        let select = Query::new()
            .filter(Filter::ilike("username", format!("%{query}%")))
            .filter(Filter::neq("id", text(exclude)))
            .order_by("username", true)
            .limit(PEOPLE_SEARCH_LIMIT);
        let rows = self.data.select(Table::Profiles, &select).await?;
        Ok(parse_all("profiles", &rows, Profile::from_row))
    }
}
