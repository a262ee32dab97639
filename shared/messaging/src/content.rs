//! Classification of message bodies into text and media attachments.

use serde::{Deserialize, Serialize};

const IMAGE_PREFIX: &str = "__IMAGE__:";
const VIDEO_PREFIX: &str = "__VIDEO__:";

/// Kind of media an attachment message points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
}

impl MediaKind {
    fn prefix(self) -> &'static str {
        match self {
            Self::Image => IMAGE_PREFIX,
            Self::Video => VIDEO_PREFIX,
        }
    }

    /// Label shown in conversation previews instead of the attachment URL.
    pub fn preview_label(self) -> &'static str {
        match self {
            Self::Image => "📷 Photo",
            Self::Video => "🎥 Video",
        }
    }

    /// MIME type for an upload with the given file extension.
    pub fn content_type(self, extension: &str) -> String {
        let extension = extension.to_ascii_lowercase();
        let subtype = match (self, extension.as_str()) {
            (Self::Image, "jpg" | "jpeg") => "jpeg",
            (Self::Image, "svg") => "svg+xml",
            (Self::Video, "mov") => "quicktime",
            (Self::Video, "mkv") => "x-matroska",
            (Self::Video, "avi") => "x-msvideo",
            (Self::Video, "m4v") => "x-m4v",
            (_, other) => other,
        };
        match self {
            Self::Image => format!("image/{subtype}"),
            Self::Video => format!("video/{subtype}"),
        }
    }
}

/// Parsed view of a message body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageContent {
    Text(String),
    Media { kind: MediaKind, url: String },
}

impl MessageContent {
    pub fn parse(raw: &str) -> Self {
        for kind in [MediaKind::Image, MediaKind::Video] {
            if let Some(url) = raw.strip_prefix(kind.prefix()) {
                return Self::Media {
                    kind,
                    url: url.to_string(),
                };
            }
        }
        Self::Text(raw.to_string())
    }

    pub fn media(kind: MediaKind, url: impl Into<String>) -> Self {
        Self::Media {
            kind,
            url: url.into(),
        }
    }

    /// Wire form stored in the `content` column.
    pub fn encode(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Media { kind, url } => format!("{}{url}", kind.prefix()),
        }
    }

    /// Human-readable preview; attachments never leak their URL.
    pub fn preview(&self) -> &str {
        match self {
            Self::Text(text) => text,
            Self::Media { kind, .. } => kind.preview_label(),
        }
    }

    pub fn is_media(&self) -> bool {
        matches!(self, Self::Media { .. })
    }
}
