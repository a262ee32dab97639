//! Signed-in account state, owned explicitly and injected into every screen.

use crate::error::{SyncError, SyncResult};
use reelchat_messaging::{Profile, UserId};
use std::sync::RwLock;
use tracing::info;

#[derive(Debug, Default)]
pub struct Session {
    user: RwLock<Option<Profile>>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn signed_in(profile: Profile) -> Self {
        let session = Self::new();
        session.restore(profile);
        session
    }

    /// Install a previously persisted or freshly authenticated user.
    pub fn restore(&self, profile: Profile) {
        info!(user_id = %profile.id, username = %profile.username, "session restored");
        *self.user.write().unwrap_or_else(|p| p.into_inner()) = Some(profile);
    }

    pub fn sign_out(&self) {
        if let Some(profile) = self.user.write().unwrap_or_else(|p| p.into_inner()).take() {
            info!(user_id = %profile.id, "signed out");
        }
    }

    pub fn current_user(&self) -> SyncResult<Profile> {
        self.user
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
            .ok_or(SyncError::NotAuthenticated)
    }

    pub fn user_id(&self) -> SyncResult<UserId> {
        self.current_user().map(|profile| profile.id)
    }

    pub fn is_signed_in(&self) -> bool {
        self.user.read().map(|user| user.is_some()).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_out_clears_the_user() {
        let profile = Profile {
            id: UserId::new(),
            username: "alice".into(),
            avatar_url: None,
        };
        let session = Session::signed_in(profile.clone());
        assert_eq!(session.user_id().unwrap(), profile.id);

        session.sign_out();
        assert!(!session.is_signed_in());
        assert!(matches!(session.current_user(), Err(SyncError::NotAuthenticated)));
    }
}
