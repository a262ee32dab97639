//! Fixtures shared by the scenario tests: one in-process backend and any number of
//! signed-in clients talking to it.

use reelchat_client::backend::{row, Table};
use reelchat_client::{ClientState, MemoryBackend, Session, SyncConfig};
use reelchat_messaging::{ConversationId, EntityId, Profile, UserId};
use serde_json::json;
use std::sync::Arc;

/// A signed-in client and its account id.
pub struct Client {
    pub id: UserId,
    pub state: Arc<ClientState>,
}

pub struct World {
    pub backend: MemoryBackend,
    pub config: SyncConfig,
}

impl Default for World {
    fn default() -> Self {
        Self::new(SyncConfig::default())
    }
}

impl World {
    pub fn new(config: SyncConfig) -> Self {
        Self {
            backend: MemoryBackend::new(),
            config,
        }
    }

    /// Register a profile and return a client signed in as it.
    pub fn sign_in(&self, username: &str) -> Client {
        let profile = Profile {
            id: UserId::new(),
            username: username.into(),
            avatar_url: None,
        };
        self.backend.seed(
            Table::Profiles,
            row([("id", json!(profile.id)), ("username", json!(username))]),
        );
        Client {
            id: profile.id,
            state: ClientState::in_memory(self.config.clone(), Session::signed_in(profile), &self.backend),
        }
    }

    pub fn seed_post(&self, id: &str, owner: UserId) -> EntityId {
        self.backend
            .seed(Table::Posts, row([("id", json!(id)), ("user_id", json!(owner))]));
        EntityId::new(id)
    }

    /// Store a message from `sender` without going through any client.
    pub fn seed_message(&self, conversation: ConversationId, sender: UserId, content: &str) {
        self.backend.seed(
            Table::Messages,
            row([
                ("conversation_id", json!(conversation)),
                ("sender_id", json!(sender)),
                ("content", json!(content)),
            ]),
        );
    }
}
