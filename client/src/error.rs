use crate::backend::BackendError;
use crate::realtime::RealtimeError;
use reelchat_messaging::ModelError;

/// Errors surfaced to the screen that initiated an action.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("no signed-in user")]
    NotAuthenticated,
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error(transparent)]
    Realtime(#[from] RealtimeError),
    #[error(transparent)]
    Model(#[from] ModelError),
    /// The optimistic message was rolled back; `draft` goes back into the composer.
    #[error("message not sent: {reason}")]
    SendFailed { draft: String, reason: String },
    #[error("message is empty")]
    EmptyMessage,
    #[error("invalid action: {0}")]
    InvalidAction(String),
    #[error("screen closed")]
    Closed,
}

pub type SyncResult<T> = Result<T, SyncError>;
