use std::fmt;

use tracing::debug;

use crate::platform::{FileAttachment, Message};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Photo,
    Video,
    /// Never produced by extraction: media documents are re-typed as photo or video
    #[allow(dead_code)]
    Document,
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaKind::Photo => write!(f, "photo"),
            MediaKind::Video => write!(f, "video"),
            MediaKind::Document => write!(f, "document"),
        }
    }
}

/// One file worth archiving, normalized across photos, videos and documents
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaDescriptor {
    /// Stable platform reference used to request a download
    pub source_ref: String,
    pub file_name: String,
    pub mime_type: String,
    pub size_bytes: Option<u64>,
    pub kind: MediaKind,
}

/// Collect the archivable media of a message, in photo, video, document order.
pub fn extract_media(message: &Message) -> Vec<MediaDescriptor> {
    let attachments = &message.attachments;
    let mut media = Vec::new();

    // Sizes arrive smallest first, so the last one is the original resolution
    if let Some(largest) = attachments.photo.last() {
        debug!(
            "Picked {}x{} photo out of {} size(s)",
            largest.width,
            largest.height,
            attachments.photo.len()
        );
        media.push(MediaDescriptor {
            source_ref: largest.file_id.clone(),
            file_name: format!("photo_{}.jpg", message.id),
            mime_type: "image/jpeg".to_string(),
            size_bytes: largest.file_size,
            kind: MediaKind::Photo,
        });
    }

    if let Some(video) = &attachments.video {
        media.push(MediaDescriptor {
            source_ref: video.file_id.clone(),
            file_name: video
                .file_name
                .clone()
                .unwrap_or_else(|| format!("video_{}.mp4", message.id)),
            mime_type: video
                .mime_type
                .clone()
                .unwrap_or_else(|| "video/mp4".to_string()),
            size_bytes: video.file_size,
            kind: MediaKind::Video,
        });
    }

    if let Some(descriptor) = attachments
        .document
        .as_ref()
        .and_then(|doc| document_media(doc, message.id))
    {
        media.push(descriptor);
    }

    media
}

/// Oversized photos and videos are often sent as documents; anything else is not media.
fn document_media(doc: &FileAttachment, message_id: i64) -> Option<MediaDescriptor> {
    let mime_type = doc.mime_type.as_deref()?;
    let kind = if mime_type.starts_with("video/") {
        MediaKind::Video
    } else if mime_type.starts_with("image/") {
        MediaKind::Photo
    } else {
        return None;
    };

    Some(MediaDescriptor {
        source_ref: doc.file_id.clone(),
        file_name: doc
            .file_name
            .clone()
            .unwrap_or_else(|| format!("document_{}", message_id)),
        mime_type: mime_type.to_string(),
        size_bytes: doc.file_size,
        kind,
    })
}
