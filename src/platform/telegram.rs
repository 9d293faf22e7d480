use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use teloxide::net::Download;
use teloxide::prelude::*;
use teloxide::types::{AllowedUpdate, FileId, FileMeta, UpdateKind};
use teloxide::update_listeners::Polling;
use tracing::{debug, info, warn};

use super::{AttachmentSet, DownloadHandle, FileAttachment, InboundEvent, MediaSource, PhotoSize};
use crate::archiver::Archiver;
use crate::config::PollingConfig;

/// The only update kinds the archiver asks Telegram for
pub fn allowed_updates() -> Vec<AllowedUpdate> {
    vec![AllowedUpdate::Message, AllowedUpdate::ChannelPost]
}

/// Convert a Telegram update into an archiver event; other update kinds are dropped.
pub fn inbound_event(update: &Update) -> Option<InboundEvent> {
    match &update.kind {
        UpdateKind::Message(msg) => Some(InboundEvent::Message(convert_message(msg))),
        UpdateKind::ChannelPost(msg) => Some(InboundEvent::ChannelPost(convert_message(msg))),
        _ => None,
    }
}

pub fn convert_message(msg: &Message) -> super::Message {
    super::Message {
        id: i64::from(msg.id.0),
        chat_id: msg.chat.id.0,
        thread_id: msg.thread_id.map(|thread| i64::from(thread.0 .0)),
        attachments: AttachmentSet {
            photo: msg
                .photo()
                .map(|sizes| {
                    sizes
                        .iter()
                        .map(|size| PhotoSize {
                            file_id: size.file.id.to_string(),
                            width: size.width,
                            height: size.height,
                            file_size: known_size(&size.file),
                        })
                        .collect()
                })
                .unwrap_or_default(),
            video: msg.video().map(|video| FileAttachment {
                file_id: video.file.id.to_string(),
                file_name: video.file_name.clone(),
                mime_type: video.mime_type.as_ref().map(ToString::to_string),
                file_size: known_size(&video.file),
            }),
            document: msg.document().map(|doc| FileAttachment {
                file_id: doc.file.id.to_string(),
                file_name: doc.file_name.clone(),
                mime_type: doc.mime_type.as_ref().map(ToString::to_string),
                file_size: known_size(&doc.file),
            }),
        },
        group_id: msg.media_group_id().map(ToString::to_string),
    }
}

/// Sizes Telegram left out come back as a zero or u32::MAX placeholder
fn known_size(meta: &FileMeta) -> Option<u64> {
    let size = u64::from(meta.size);
    (size > 0 && size != u64::from(u32::MAX)).then_some(size)
}

/// Downloads files through the Bot API: getFile, then the file endpoint.
pub struct TelegramSource {
    bot: Bot,
}

impl TelegramSource {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

#[async_trait]
impl MediaSource for TelegramSource {
    async fn resolve_download_handle(&self, file_ref: &str) -> Result<DownloadHandle> {
        let file = self
            .bot
            .get_file(FileId(file_ref.to_string()))
            .await
            .context("Failed to get file info")?;

        if file.path.is_empty() {
            anyhow::bail!("File path not available");
        }
        Ok(DownloadHandle(file.path))
    }

    async fn fetch_bytes(&self, handle: &DownloadHandle) -> Result<Vec<u8>> {
        let mut bytes = Vec::new();
        self.bot
            .download_file(&handle.0, &mut bytes)
            .await
            .context("Failed to download file")?;
        Ok(bytes)
    }
}

/// Register `url` as the push endpoint, with Telegram echoing `secret_token` on every call
pub async fn set_webhook(bot: &Bot, url: &str, secret_token: &str) -> Result<()> {
    let url = reqwest::Url::parse(url).with_context(|| format!("Invalid webhook URL: {}", url))?;

    bot.set_webhook(url.clone())
        .allowed_updates(allowed_updates())
        .secret_token(secret_token.to_string())
        .await
        .context("Failed to set webhook")?;

    info!("Webhook registered at {}", url);
    Ok(())
}

pub async fn delete_webhook(bot: &Bot) -> Result<()> {
    bot.delete_webhook()
        .await
        .context("Failed to delete webhook")?;
    info!("Webhook removed");
    Ok(())
}

/// Long-poll Telegram and archive every update until Ctrl-C
pub async fn run_polling(bot: Bot, archiver: Arc<Archiver>, config: &PollingConfig) -> Result<()> {
    info!(
        "Starting long polling (timeout {}s, up to {} updates per request)",
        config.timeout_secs, config.limit
    );

    let listener = Polling::builder(bot.clone())
        .timeout(Duration::from_secs(config.timeout_secs))
        .limit(config.limit)
        .allowed_updates(allowed_updates())
        .build();

    let handler = dptree::entry()
        .branch(Update::filter_message().endpoint(handle_message))
        .branch(Update::filter_channel_post().endpoint(handle_channel_post));

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![archiver])
        .default_handler(|upd| async move {
            debug!("Ignoring update {:?}", upd.id);
        })
        .error_handler(LoggingErrorHandler::with_custom_text("telegram"))
        .enable_ctrlc_handler()
        .build()
        .dispatch_with_listener(
            listener,
            LoggingErrorHandler::with_custom_text("Error fetching updates"),
        )
        .await;

    info!("Polling stopped");
    Ok(())
}

async fn handle_message(msg: Message, archiver: Arc<Archiver>) -> ResponseResult<()> {
    archive(&archiver, InboundEvent::Message(convert_message(&msg))).await;
    Ok(())
}

async fn handle_channel_post(msg: Message, archiver: Arc<Archiver>) -> ResponseResult<()> {
    archive(&archiver, InboundEvent::ChannelPost(convert_message(&msg))).await;
    Ok(())
}

// Failures are already logged per attachment; polling always moves past the update
async fn archive(archiver: &Archiver, event: InboundEvent) {
    let outcome = archiver.process_event(&event).await;
    let failed = outcome.failure_count();
    if failed > 0 {
        warn!(
            "Message {}: {} attachment(s) not archived",
            event.message().id,
            failed
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn update(kind: &str, message: serde_json::Value) -> Update {
        // teloxide's Update only deserializes correctly from text, not from a serde_json::Value
        serde_json::from_str(&json!({ "update_id": 1, kind: message }).to_string()).unwrap()
    }

    fn channel_message(extra: serde_json::Value) -> serde_json::Value {
        let mut message = json!({
            "message_id": 77,
            "date": 1705314600,
            "chat": { "id": -1001234567890i64, "type": "channel", "title": "Media" }
        });
        let fields = message.as_object_mut().unwrap();
        for (key, value) in extra.as_object().unwrap() {
            fields.insert(key.clone(), value.clone());
        }
        message
    }

    #[test]
    fn test_channel_post_with_photo() {
        let upd = update(
            "channel_post",
            channel_message(json!({
                "photo": [
                    { "file_id": "small", "file_unique_id": "s", "width": 90, "height": 90, "file_size": 1000 },
                    { "file_id": "large", "file_unique_id": "l", "width": 1280, "height": 1280, "file_size": 90000 }
                ]
            })),
        );

        let event = inbound_event(&upd).unwrap();
        assert!(matches!(event, InboundEvent::ChannelPost(_)));
        let msg = event.message();
        assert_eq!(msg.id, 77);
        assert_eq!(msg.chat_id, -1001234567890);
        assert_eq!(msg.attachments.photo.len(), 2);
        assert_eq!(msg.attachments.photo[0].file_size, Some(1000));
        assert_eq!(msg.attachments.photo[1].file_id, "large");
        assert_eq!(msg.attachments.photo[1].file_size, Some(90000));
    }

    #[test]
    fn test_document_with_mime() {
        let upd = update(
            "channel_post",
            channel_message(json!({
                "media_group_id": "album-9",
                "document": {
                    "file_id": "doc",
                    "file_unique_id": "d",
                    "file_name": "scan.png",
                    "mime_type": "image/png",
                    "file_size": 2048
                }
            })),
        );

        let event = inbound_event(&upd).unwrap();
        let doc = event.message().attachments.document.as_ref().unwrap();
        assert_eq!(doc.file_name.as_deref(), Some("scan.png"));
        assert_eq!(doc.mime_type.as_deref(), Some("image/png"));
        assert_eq!(doc.file_size, Some(2048));
        assert_eq!(event.message().group_id.as_deref(), Some("album-9"));
    }

    #[test]
    fn test_edited_channel_post_is_dropped() {
        let upd = update(
            "edited_channel_post",
            channel_message(json!({ "edit_date": 1705314700, "text": "fixed typo" })),
        );

        assert!(inbound_event(&upd).is_none());
    }

    #[test]
    fn test_text_message_has_no_attachments() {
        let upd = update("message", channel_message(json!({ "text": "hello" })));

        let event = inbound_event(&upd).unwrap();
        assert!(matches!(event, InboundEvent::Message(_)));
        let attachments = &event.message().attachments;
        assert!(attachments.photo.is_empty());
        assert!(attachments.video.is_none());
        assert!(attachments.document.is_none());
        assert!(event.message().thread_id.is_none());
    }
}
