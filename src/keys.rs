use chrono::{DateTime, Utc};
use thiserror::Error;

/// Rejected input for one of the key shapes below.
/// The messages are surfaced to operators verbatim and must stay stable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyError {
    #[error("Filename cannot be empty")]
    EmptyFileName,
    #[error("File must have an extension")]
    MissingExtension,
    #[error("File cannot end with dot but have no extension")]
    EmptyExtension,
    #[error("Media group ID cannot be empty")]
    EmptyMediaGroupId,
}

/// A file name split at its last dot.
#[derive(Debug, Clone, PartialEq, Eq)]
struct FileName<'a> {
    base: &'a str,
    extension: &'a str,
}

fn parse_file_name(file_name: &str) -> Result<FileName<'_>, KeyError> {
    if file_name.is_empty() {
        return Err(KeyError::EmptyFileName);
    }
    let (base, extension) = file_name
        .rsplit_once('.')
        .ok_or(KeyError::MissingExtension)?;
    if extension.is_empty() {
        return Err(KeyError::EmptyExtension);
    }
    Ok(FileName { base, extension })
}

/// Blob key for `file_name`, stamped with the current time.
pub fn archive_key(file_name: &str) -> Result<String, KeyError> {
    archive_key_at(file_name, Utc::now())
}

/// Blob key for `file_name` at a fixed instant.
///
/// Format: `{YYYY-MM-DD}/{epoch_millis}_{base}.{extension}`. The date folder
/// keeps listings browsable per day and the millisecond stamp keeps two uploads
/// of the same name from overwriting each other.
pub fn archive_key_at(file_name: &str, now: DateTime<Utc>) -> Result<String, KeyError> {
    let FileName { base, extension } = parse_file_name(file_name)?;
    Ok(format!(
        "{date}/{millis}_{base}.{extension}",
        date = now.format("%Y-%m-%d"),
        millis = now.timestamp_millis(),
    ))
}

/// Dedup marker key for a single message. Any id is valid, zero and negatives included.
pub fn message_key(message_id: i64) -> String {
    format!("message_processed_{}", message_id)
}

/// Dedup marker key for a whole album.
pub fn media_group_key(media_group_id: &str) -> Result<String, KeyError> {
    if media_group_id.is_empty() {
        return Err(KeyError::EmptyMediaGroupId);
    }
    Ok(format!("media_group_processed_{}", media_group_id))
}
