pub mod backend;
pub mod config;
pub mod counters;
pub mod error;
pub mod inbox;
pub mod messaging;
pub mod notifications;
pub mod polling;
pub mod realtime;
pub mod repository;
pub mod session;
pub mod state;
pub mod typing;

pub use backend::MemoryBackend;
pub use config::SyncConfig;
pub use counters::{CounterHandle, CounterSnapshot, ToggleAction};
pub use error::{SyncError, SyncResult};
pub use inbox::{InboxHandle, InboxSnapshot};
pub use messaging::{ChatHandle, ChatSnapshot, LoadState};
pub use notifications::{NotificationsHandle, NotificationsSnapshot};
pub use session::Session;
pub use state::ClientState;

use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

pub fn init_tracing() {
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}
