use crate::backend::ObjectStorage;
use crate::error::SyncResult;
use reelchat_messaging::{MediaKind, MessageContent, UserId};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// Bucket holding chat attachments.
pub const CHAT_MEDIA_BUCKET: &str = "chat-media";

#[derive(Clone)]
pub struct MediaRepository {
    storage: Arc<dyn ObjectStorage>,
}

impl MediaRepository {
    pub fn new(storage: Arc<dyn ObjectStorage>) -> Self {
        Self { storage }
    }

    /// Upload an attachment under the owner's folder and return the message body that
    /// points at it.
    pub async fn upload_attachment(
        &self,
        owner: UserId,
        kind: MediaKind,
        extension: &str,
        bytes: Vec<u8>,
    ) -> SyncResult<MessageContent> {
        let extension = extension.trim_start_matches('.').to_ascii_lowercase();
        let path = format!("{owner}/{}.{extension}", Uuid::new_v4());
        let size = bytes.len();
        self.storage
            .upload(CHAT_MEDIA_BUCKET, &path, bytes, &kind.content_type(&extension))
            .await?;
        info!(%path, size, "attachment uploaded");
        Ok(MessageContent::media(
            kind,
            self.storage.public_url(CHAT_MEDIA_BUCKET, &path),
        ))
    }
}
