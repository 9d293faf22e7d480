use std::sync::Arc;

use anyhow::{Context, Result};
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde_json::{json, Value};
use teloxide::types::Update;
use tracing::{debug, info, warn};

use crate::archiver::{Archiver, EventOutcome};
use crate::config::WebhookConfig;
use crate::platform::telegram::inbound_event;

/// Header Telegram uses to echo the secret given to setWebhook
pub const SECRET_HEADER: &str = "x-telegram-bot-api-secret-token";

pub struct WebhookState {
    archiver: Arc<Archiver>,
    secret_token: String,
}

impl WebhookState {
    pub fn new(archiver: Arc<Archiver>, secret_token: impl Into<String>) -> Self {
        Self {
            archiver,
            secret_token: secret_token.into(),
        }
    }
}

pub fn router(state: Arc<WebhookState>, path: &str) -> Router {
    Router::new()
        .route("/health", get(health))
        .route(path, post(receive_update))
        .with_state(state)
}

/// Serve the webhook until Ctrl-C
pub async fn serve(config: &WebhookConfig, archiver: Arc<Archiver>) -> Result<()> {
    let state = Arc::new(WebhookState::new(archiver, config.secret_token.clone()));
    let app = router(state, &config.path);

    let listener = tokio::net::TcpListener::bind(&config.listen_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", config.listen_addr))?;

    info!(
        "Webhook listening on http://{}{}",
        config.listen_addr, config.path
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down webhook server");
        })
        .await
        .context("Server error")?;

    Ok(())
}

async fn health() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

/// Every authenticated delivery is acknowledged with 200, whatever happened to its
/// attachments; Telegram would otherwise redeliver it indefinitely.
async fn receive_update(
    State(state): State<Arc<WebhookState>>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    let provided = headers.get(SECRET_HEADER).and_then(|v| v.to_str().ok());
    if provided != Some(state.secret_token.as_str()) {
        warn!("Rejected webhook call with missing or wrong secret token");
        return StatusCode::UNAUTHORIZED;
    }

    let update: Update = match serde_json::from_slice(&body) {
        Ok(update) => update,
        Err(e) => {
            warn!("Dropping malformed update: {}", e);
            return StatusCode::OK;
        }
    };

    let Some(event) = inbound_event(&update) else {
        debug!("Ignoring update {:?} of unsupported kind", update.id);
        return StatusCode::OK;
    };

    let outcome = state.archiver.process_event(&event).await;
    match &outcome {
        EventOutcome::Processed(reports) => info!(
            "Update {:?}: archived {} of {} attachment(s)",
            update.id,
            outcome.archived_keys().len(),
            reports.len()
        ),
        other => debug!("Update {:?}: {:?}", update.id, other),
    }

    StatusCode::OK
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use axum::http::HeaderValue;

    use crate::filter::ScopeFilter;
    use crate::platform::{DownloadHandle, MediaSource};
    use crate::storage::BlobStore;

    struct EchoSource;

    #[async_trait]
    impl MediaSource for EchoSource {
        async fn resolve_download_handle(&self, file_ref: &str) -> Result<DownloadHandle> {
            Ok(DownloadHandle(file_ref.to_string()))
        }

        async fn fetch_bytes(&self, handle: &DownloadHandle) -> Result<Vec<u8>> {
            Ok(handle.0.as_bytes().to_vec())
        }
    }

    #[derive(Default)]
    struct KeyLog(Mutex<Vec<String>>);

    #[async_trait]
    impl BlobStore for KeyLog {
        async fn put(&self, key: &str, _bytes: Vec<u8>, _content_type: &str) -> Result<()> {
            self.0.lock().unwrap().push(key.to_string());
            Ok(())
        }
    }

    fn state(store: Arc<KeyLog>) -> State<Arc<WebhookState>> {
        let archiver = Archiver::new(
            ScopeFilter::new("-1001234567890", None),
            Arc::new(EchoSource),
            store,
        );
        State(Arc::new(WebhookState::new(Arc::new(archiver), "s3cret")))
    }

    fn headers(secret: Option<&str>) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Some(secret) = secret {
            headers.insert(SECRET_HEADER, HeaderValue::from_str(secret).unwrap());
        }
        headers
    }

    fn video_post() -> Bytes {
        Bytes::from(
            json!({
                "update_id": 5,
                "channel_post": {
                    "message_id": 9,
                    "date": 1705314600,
                    "chat": { "id": -1001234567890i64, "type": "channel", "title": "Media" },
                    "video": {
                        "file_id": "vid",
                        "file_unique_id": "v",
                        "width": 1920,
                        "height": 1080,
                        "duration": 3,
                        "file_name": "clip.mp4",
                        "mime_type": "video/mp4",
                        "file_size": 3
                    }
                }
            })
            .to_string(),
        )
    }

    #[tokio::test]
    async fn test_rejects_wrong_secret() {
        let store = Arc::new(KeyLog::default());
        let status = receive_update(state(store.clone()), headers(Some("nope")), video_post()).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let status = receive_update(state(store.clone()), headers(None), video_post()).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(store.0.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_archives_authenticated_update() {
        let store = Arc::new(KeyLog::default());
        let status =
            receive_update(state(store.clone()), headers(Some("s3cret")), video_post()).await;

        assert_eq!(status, StatusCode::OK);
        let keys = store.0.lock().unwrap().clone();
        assert_eq!(keys.len(), 1);
        assert!(keys[0].ends_with("_clip.mp4"));
    }

    #[tokio::test]
    async fn test_malformed_body_is_acknowledged() {
        let store = Arc::new(KeyLog::default());
        let status = receive_update(
            state(store.clone()),
            headers(Some("s3cret")),
            Bytes::from_static(b"not json"),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert!(store.0.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unsupported_update_kind_is_acknowledged() {
        let store = Arc::new(KeyLog::default());
        let body = Bytes::from(
            json!({
                "update_id": 6,
                "edited_channel_post": {
                    "message_id": 9,
                    "date": 1705314600,
                    "edit_date": 1705314700,
                    "chat": { "id": -1001234567890i64, "type": "channel", "title": "Media" },
                    "video": {
                        "file_id": "vid",
                        "file_unique_id": "v",
                        "width": 1920,
                        "height": 1080,
                        "duration": 3,
                        "file_name": "clip.mp4",
                        "mime_type": "video/mp4",
                        "file_size": 3
                    }
                }
            })
            .to_string(),
        );

        let status = receive_update(state(store.clone()), headers(Some("s3cret")), body).await;

        assert_eq!(status, StatusCode::OK);
        assert!(store.0.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_health() {
        let Json(body) = health().await;
        assert_eq!(body["status"], "healthy");
    }
}
