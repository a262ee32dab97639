use crate::backend::{DataApi, MemoryBackend, ObjectStorage, RealtimeBus};
use crate::config::SyncConfig;
use crate::realtime::ChannelManager;
use crate::repository::{
    ConversationRepository, CounterRepository, MediaRepository, MessageRepository,
    NotificationRepository, ProfileRepository,
};
use crate::session::Session;
use std::sync::Arc;

/// Everything a screen needs to talk to the backend on behalf of the signed-in user.
pub struct ClientState {
    config: SyncConfig,
    session: Session,
    data: Arc<dyn DataApi>,
    bus: Arc<dyn RealtimeBus>,
    storage: Arc<dyn ObjectStorage>,
}

impl ClientState {
    pub fn new(
        config: SyncConfig,
        session: Session,
        data: Arc<dyn DataApi>,
        bus: Arc<dyn RealtimeBus>,
        storage: Arc<dyn ObjectStorage>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            session,
            data,
            bus,
            storage,
        })
    }

    /// Wire every seam to one in-process backend.
    pub fn in_memory(config: SyncConfig, session: Session, backend: &MemoryBackend) -> Arc<Self> {
        Self::new(
            config,
            session,
            Arc::new(backend.clone()),
            Arc::new(backend.clone()),
            Arc::new(backend.clone()),
        )
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn channels(&self) -> ChannelManager {
        ChannelManager::new(Arc::clone(&self.bus), self.config.subscribe_timeout)
    }

    pub fn conversations(&self) -> ConversationRepository {
        ConversationRepository::new(Arc::clone(&self.data))
    }

    pub fn messages(&self) -> MessageRepository {
        MessageRepository::new(Arc::clone(&self.data))
    }

    pub fn counters(&self) -> CounterRepository {
        CounterRepository::new(Arc::clone(&self.data))
    }

    pub fn notifications(&self) -> NotificationRepository {
        NotificationRepository::new(Arc::clone(&self.data))
    }

    pub fn profiles(&self) -> ProfileRepository {
        ProfileRepository::new(Arc::clone(&self.data))
    }

    pub fn media(&self) -> MediaRepository {
        MediaRepository::new(Arc::clone(&self.storage))
    }
}
