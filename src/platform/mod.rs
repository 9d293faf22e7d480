pub mod telegram;

use anyhow::Result;
use async_trait::async_trait;

/// An update the archiver knows how to handle.
/// Anything else the platform delivers is dropped during conversion.
#[derive(Debug, Clone)]
pub enum InboundEvent {
    /// Private chats, groups and supergroups
    Message(Message),
    /// Channel broadcasts where the bot is an admin
    ChannelPost(Message),
}

impl InboundEvent {
    pub fn message(&self) -> &Message {
        match self {
            InboundEvent::Message(msg) | InboundEvent::ChannelPost(msg) => msg,
        }
    }
}

/// Platform-agnostic view of a message, reduced to what archiving needs
#[derive(Debug, Clone, Default)]
pub struct Message {
    pub id: i64,
    pub chat_id: i64,
    /// Forum topic the message was posted in
    pub thread_id: Option<i64>,
    pub attachments: AttachmentSet,
    /// Shared by every message of one album
    pub group_id: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct AttachmentSet {
    /// The same photo in ascending resolution
    pub photo: Vec<PhotoSize>,
    pub video: Option<FileAttachment>,
    pub document: Option<FileAttachment>,
}

#[derive(Debug, Clone)]
pub struct PhotoSize {
    pub file_id: String,
    pub width: u32,
    pub height: u32,
    pub file_size: Option<u64>,
}

/// A video or document reference
#[derive(Debug, Clone)]
pub struct FileAttachment {
    pub file_id: String,
    pub file_name: Option<String>,
    pub mime_type: Option<String>,
    pub file_size: Option<u64>,
}

/// Transient location the platform hands out for one download
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadHandle(pub String);

/// Where media bytes come from.
#[async_trait]
pub trait MediaSource: Send + Sync {
    /// Turn a stable file reference into a short-lived download handle
    async fn resolve_download_handle(&self, file_ref: &str) -> Result<DownloadHandle>;

    /// Fetch the raw bytes behind a handle
    async fn fetch_bytes(&self, handle: &DownloadHandle) -> Result<Vec<u8>>;
}
