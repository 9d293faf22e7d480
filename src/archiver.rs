use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};

use crate::dedup::{ArchiveRecord, DedupService};
use crate::filter::ScopeFilter;
use crate::keys::{self, KeyError};
use crate::media::{extract_media, MediaDescriptor};
use crate::platform::{InboundEvent, MediaSource};
use crate::storage::BlobStore;

/// Why a single attachment did not make it into storage
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("invalid file name: {0}")]
    InvalidKey(#[from] KeyError),
    #[error("download handle unavailable: {0:#}")]
    NotFound(anyhow::Error),
    #[error("download failed: {0:#}")]
    Transport(anyhow::Error),
    #[error("upload failed: {0:#}")]
    Store(anyhow::Error),
}

/// Result of archiving one attachment; `Ok` carries the storage key
#[derive(Debug)]
pub struct AttachmentReport {
    pub media: MediaDescriptor,
    pub result: Result<String, ArchiveError>,
}

#[derive(Debug)]
pub enum EventOutcome {
    /// Filtered out by chat / topic
    OutOfScope,
    /// In scope but nothing archivable attached
    NoMedia,
    /// A dedup marker says this unit was archived before
    Duplicate {
        marker: String,
        previous: Option<ArchiveRecord>,
    },
    /// One report per attachment, in extraction order
    Processed(Vec<AttachmentReport>),
}

impl EventOutcome {
    pub fn reports(&self) -> &[AttachmentReport] {
        match self {
            EventOutcome::Processed(reports) => reports,
            _ => &[],
        }
    }

    pub fn archived_keys(&self) -> Vec<&str> {
        self.reports()
            .iter()
            .filter_map(|report| report.result.as_deref().ok())
            .collect()
    }

    pub fn failure_count(&self) -> usize {
        self.reports()
            .iter()
            .filter(|report| report.result.is_err())
            .count()
    }
}

/// Moves media from in-scope updates into blob storage.
///
/// Holds no per-event state, so one instance can serve concurrent deliveries.
pub struct Archiver {
    filter: ScopeFilter,
    source: Arc<dyn MediaSource>,
    store: Arc<dyn BlobStore>,
    dedup: Option<DedupService>,
}

impl Archiver {
    pub fn new(filter: ScopeFilter, source: Arc<dyn MediaSource>, store: Arc<dyn BlobStore>) -> Self {
        Self {
            filter,
            source,
            store,
            dedup: None,
        }
    }

    /// Skip units that already carry an "archived" marker and record one after success
    pub fn with_dedup(mut self, dedup: DedupService) -> Self {
        self.dedup = Some(dedup);
        self
    }

    pub fn should_process(&self, event: &InboundEvent) -> bool {
        self.filter.should_process(event)
    }

    /// Archive every attachment of `event`.
    ///
    /// A failing attachment is logged and reported but never stops its siblings.
    #[instrument(skip_all, fields(message_id = event.message().id, chat_id = event.message().chat_id))]
    pub async fn process_event(&self, event: &InboundEvent) -> EventOutcome {
        if !self.should_process(event) {
            debug!("Update out of scope");
            return EventOutcome::OutOfScope;
        }

        let message = event.message();
        let media = extract_media(message);
        if media.is_empty() {
            debug!("No archivable media in message");
            return EventOutcome::NoMedia;
        }

        let marker = self.marker_for(event);
        if let (Some(dedup), Some(marker)) = (&self.dedup, &marker) {
            if dedup.is_archived(marker, message.id).await {
                info!("Skipping already archived unit {}", marker);
                return EventOutcome::Duplicate {
                    marker: marker.clone(),
                    previous: dedup.get::<ArchiveRecord>(marker).await,
                };
            }
        }

        let mut reports = Vec::with_capacity(media.len());
        for item in media {
            info!("Processing {}: {}", item.kind, item.file_name);
            let result = self.archive_one(&item).await;
            match &result {
                Ok(key) => info!("Archived {} as {}", item.file_name, key),
                Err(e) => error!("Failed to process {}: {}", item.file_name, e),
            }
            reports.push(AttachmentReport {
                media: item,
                result,
            });
        }

        if let (Some(dedup), Some(marker)) = (&self.dedup, &marker) {
            self.record_marker(dedup, marker, message.id, &reports).await;
        }

        EventOutcome::Processed(reports)
    }

    fn marker_for(&self, event: &InboundEvent) -> Option<String> {
        let dedup = self.dedup.as_ref()?;
        match dedup.marker_key(event.message()) {
            Ok(marker) => Some(marker),
            Err(e) => {
                error!("Cannot derive dedup marker, archiving without dedup: {}", e);
                None
            }
        }
    }

    async fn record_marker(
        &self,
        dedup: &DedupService,
        marker: &str,
        message_id: i64,
        reports: &[AttachmentReport],
    ) {
        let mut keys = Vec::with_capacity(reports.len());
        for report in reports {
            match &report.result {
                Ok(key) => keys.push(key.clone()),
                Err(_) => {
                    warn!("Not marking {} as archived: some attachments failed", marker);
                    return;
                }
            }
        }
        if !dedup.mark_archived(marker, message_id, keys).await {
            warn!("Dedup marker {} was not recorded", marker);
        }
    }

    /// Derive the key, then resolve, fetch and put. An invalid name fails before any download.
    async fn archive_one(&self, media: &MediaDescriptor) -> Result<String, ArchiveError> {
        let key = keys::archive_key(&media.file_name)?;

        let handle = self
            .source
            .resolve_download_handle(&media.source_ref)
            .await
            .map_err(ArchiveError::NotFound)?;
        let bytes = self
            .source
            .fetch_bytes(&handle)
            .await
            .map_err(ArchiveError::Transport)?;

        debug!(size_bytes = bytes.len(), "Downloaded {}", media.file_name);

        self.store
            .put(&key, bytes, &media.mime_type)
            .await
            .map_err(ArchiveError::Store)?;

        Ok(key)
    }
}
