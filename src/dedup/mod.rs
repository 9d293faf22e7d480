pub mod sqlite;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, error};

use crate::config::DedupPolicy;
use crate::keys::{self, KeyError};
use crate::platform::Message;

/// Durable string key-value storage with expiry.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Value under `key`, or None when absent or expired
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Store `value` under `key` for `ttl_secs` seconds
    async fn set(&self, key: &str, value: &str, ttl_secs: u64) -> Result<()>;
}

/// What the marker of an archived unit records
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ArchiveRecord {
    pub archived_at: DateTime<Utc>,
    /// Messages of the unit archived so far. Empty means the whole unit.
    #[serde(default)]
    pub message_ids: Vec<i64>,
    pub keys: Vec<String>,
}

impl ArchiveRecord {
    pub fn covers(&self, message_id: i64) -> bool {
        self.message_ids.is_empty() || self.message_ids.contains(&message_id)
    }
}

/// "Already archived" markers on top of a [`KvStore`].
///
/// Storage errors are logged and reported as absent / not written.
#[derive(Clone)]
pub struct DedupService {
    kv: Arc<dyn KvStore>,
    policy: DedupPolicy,
    ttl_secs: u64,
    // Serializes read-merge-write of markers
    write_lock: Arc<Mutex<()>>,
}

impl DedupService {
    pub fn new(kv: Arc<dyn KvStore>, policy: DedupPolicy, ttl_secs: u64) -> Self {
        Self {
            kv,
            policy,
            ttl_secs,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Marker key for the unit `message` belongs to under the configured policy
    pub fn marker_key(&self, message: &Message) -> Result<String, KeyError> {
        match (self.policy, message.group_id.as_deref()) {
            (DedupPolicy::MediaGroup, Some(group_id)) => keys::media_group_key(group_id),
            _ => Ok(keys::message_key(message.id)),
        }
    }

    /// Raw value under `key`
    pub async fn get_raw(&self, key: &str) -> Option<String> {
        match self.kv.get(key).await {
            Ok(value) => value,
            Err(e) => {
                error!("Error getting key {} from dedup store: {:#}", key, e);
                None
            }
        }
    }

    /// Typed value under `key`. Values that are not JSON are offered as a plain string.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = self.get_raw(key).await?;
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(_) => serde_json::from_value(Value::String(raw)).ok(),
        }
    }

    /// Store `value` under `key` with the configured TTL. Strings are stored as-is.
    pub async fn set<T: Serialize>(&self, key: &str, value: &T) -> bool {
        let serialized = match serde_json::to_value(value) {
            Ok(Value::String(s)) => s,
            Ok(other) => other.to_string(),
            Err(e) => {
                error!("Error serializing value for key {}: {}", key, e);
                return false;
            }
        };

        match self.kv.set(key, &serialized, self.ttl_secs).await {
            Ok(()) => true,
            Err(e) => {
                error!("Error setting key {} in dedup store: {:#}", key, e);
                false
            }
        }
    }

    /// Whether `message_id` is already covered by the marker. A marker that is not an
    /// [`ArchiveRecord`] counts for every message.
    pub async fn is_archived(&self, marker_key: &str, message_id: i64) -> bool {
        let found = match self.get_raw(marker_key).await {
            Some(raw) => serde_json::from_str::<ArchiveRecord>(&raw)
                .map(|record| record.covers(message_id))
                .unwrap_or(true),
            None => false,
        };
        debug!(marker = marker_key, message_id, found, "Checked dedup marker");
        found
    }

    /// Add `message_id` and its keys to the marker, keeping what earlier messages recorded
    pub async fn mark_archived(
        &self,
        marker_key: &str,
        message_id: i64,
        keys: Vec<String>,
    ) -> bool {
        let _guard = self.write_lock.lock().await;

        let mut record = self
            .get::<ArchiveRecord>(marker_key)
            .await
            .filter(|record| !record.message_ids.is_empty())
            .unwrap_or_else(|| ArchiveRecord {
                archived_at: Utc::now(),
                message_ids: Vec::new(),
                keys: Vec::new(),
            });

        if !record.message_ids.contains(&message_id) {
            record.message_ids.push(message_id);
        }
        for key in keys {
            if !record.keys.contains(&key) {
                record.keys.push(key);
            }
        }
        record.archived_at = Utc::now();

        self.set(marker_key, &record).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_TTL_SECS;
    use crate::dedup::sqlite::SqliteKv;

    struct BrokenKv;

    #[async_trait]
    impl KvStore for BrokenKv {
        async fn get(&self, _key: &str) -> Result<Option<String>> {
            anyhow::bail!("connection reset")
        }

        async fn set(&self, _key: &str, _value: &str, _ttl_secs: u64) -> Result<()> {
            anyhow::bail!("connection reset")
        }
    }

    fn service(policy: DedupPolicy) -> DedupService {
        DedupService::new(
            Arc::new(SqliteKv::open_in_memory().unwrap()),
            policy,
            DEFAULT_TTL_SECS,
        )
    }

    fn album_message(id: i64, group_id: Option<&str>) -> Message {
        Message {
            id,
            chat_id: 1,
            group_id: group_id.map(str::to_string),
            ..Default::default()
        }
    }

    #[test]
    fn test_marker_key_per_message() {
        let dedup = service(DedupPolicy::Message);
        assert_eq!(
            dedup.marker_key(&album_message(5, Some("album"))).unwrap(),
            "message_processed_5"
        );
    }

    #[test]
    fn test_marker_key_per_media_group() {
        let dedup = service(DedupPolicy::MediaGroup);
        assert_eq!(
            dedup.marker_key(&album_message(5, Some("album"))).unwrap(),
            "media_group_processed_album"
        );
        assert_eq!(
            dedup.marker_key(&album_message(6, None)).unwrap(),
            "message_processed_6"
        );
        assert_eq!(
            dedup.marker_key(&album_message(7, Some(""))).unwrap_err(),
            KeyError::EmptyMediaGroupId
        );
    }

    #[tokio::test]
    async fn test_string_values_round_trip_unquoted() {
        let dedup = service(DedupPolicy::Message);
        assert!(dedup.set("k", &"plain").await);
        assert_eq!(dedup.get_raw("k").await.as_deref(), Some("plain"));
        assert_eq!(dedup.get::<String>("k").await.as_deref(), Some("plain"));
    }

    #[tokio::test]
    async fn test_mark_archived_records_keys() {
        let dedup = service(DedupPolicy::Message);
        assert!(!dedup.is_archived("message_processed_1", 1).await);

        let keys = vec!["2024-01-15/1_photo_1.jpg".to_string()];
        assert!(dedup.mark_archived("message_processed_1", 1, keys.clone()).await);

        assert!(dedup.is_archived("message_processed_1", 1).await);
        let record: ArchiveRecord = dedup.get("message_processed_1").await.unwrap();
        assert_eq!(record.keys, keys);
        assert_eq!(record.message_ids, vec![1]);
    }

    #[tokio::test]
    async fn test_album_marker_merges_siblings() {
        let dedup = service(DedupPolicy::MediaGroup);
        let marker = "media_group_processed_album";

        assert!(dedup.mark_archived(marker, 40, vec!["k40".to_string()]).await);
        assert!(dedup.is_archived(marker, 40).await);
        assert!(!dedup.is_archived(marker, 41).await);

        assert!(dedup.mark_archived(marker, 41, vec!["k41".to_string()]).await);
        assert!(dedup.mark_archived(marker, 41, vec!["k41".to_string()]).await);

        let record: ArchiveRecord = dedup.get(marker).await.unwrap();
        assert_eq!(record.message_ids, vec![40, 41]);
        assert_eq!(record.keys, vec!["k40".to_string(), "k41".to_string()]);
        assert!(dedup.is_archived(marker, 41).await);
    }

    #[tokio::test]
    async fn test_plain_marker_covers_every_message() {
        let dedup = service(DedupPolicy::MediaGroup);
        assert!(dedup.set("media_group_processed_old", &"true").await);
        assert!(dedup.is_archived("media_group_processed_old", 7).await);
    }

    #[tokio::test]
    async fn test_store_errors_are_swallowed() {
        let dedup = DedupService::new(Arc::new(BrokenKv), DedupPolicy::Message, DEFAULT_TTL_SECS);
        assert!(!dedup.is_archived("message_processed_1", 1).await);
        assert!(!dedup.mark_archived("message_processed_1", 1, vec![]).await);
    }
}
