use crate::config::StorageConfig;
use crate::timestamp::{self, iso_millis};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

/// Errors raised while reading or writing the backing files
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Message document {path} is not a JSON array of messages: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Message document {path} has no id left after {last}")]
    IdsExhausted { path: PathBuf, last: i64 },

    #[error("Failed to encode record: {0}")]
    Encode(#[from] serde_json::Error),
}

impl StorageError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    /// Short label used for metrics
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Io { .. } => "io",
            Self::Corrupt { .. } | Self::IdsExhausted { .. } => "corrupt",
            Self::Encode(_) => "encode",
        }
    }
}

/// A persisted contact-form submission
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactMessage {
    /// Time-based id, strictly increasing within the store
    pub id: i64,
    pub name: String,
    pub email: String,
    pub message: String,
    /// When the service accepted the message
    #[serde(with = "iso_millis")]
    pub received_at: DateTime<Utc>,
}

/// The caller-supplied part of a contact message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageDraft {
    pub name: String,
    pub email: String,
    pub message: String,
}

/// One analytics record: the raw payload plus its ingestion time
#[derive(Debug, Clone, PartialEq)]
pub struct AnalyticsEvent {
    pub timestamp: DateTime<Utc>,
    pub payload: Value,
}

impl AnalyticsEvent {
    pub fn new(timestamp: DateTime<Utc>, payload: Value) -> Self {
        Self { timestamp, payload }
    }

    /// The `event` identifier, when the payload carries a string one
    pub fn event(&self) -> Option<&str> {
        self.payload.get("event").and_then(Value::as_str)
    }

    /// The `details` mapping, when present
    pub fn details(&self) -> Option<&serde_json::Map<String, Value>> {
        self.payload.get("details").and_then(Value::as_object)
    }

    /// Encode as `<timestamp> <json>\n`
    pub fn encode_line(&self) -> Result<String, StorageError> {
        let json = serde_json::to_string(&self.payload)?;
        Ok(format!("{} {}\n", timestamp::to_iso(&self.timestamp), json))
    }

    /// Parse a single log line (without its trailing newline)
    pub fn decode_line(line: &str) -> Option<Self> {
        let (ts, json) = line.split_once(' ')?;
        let timestamp = timestamp::parse_iso(ts).ok()?;
        let payload = serde_json::from_str(json).ok()?;
        Some(Self { timestamp, payload })
    }
}

/// Persistence seam used by the ingestion service
#[async_trait]
pub trait SubmissionStore: Send + Sync {
    /// All stored contact messages in append order
    async fn load_messages(&self) -> Result<Vec<ContactMessage>, StorageError>;

    /// Allocate an id for `draft`, persist it, and return the stored message
    async fn append_message(
        &self,
        draft: MessageDraft,
        received_at: DateTime<Utc>,
    ) -> Result<ContactMessage, StorageError>;

    /// Append one record to the analytics log
    async fn append_analytics(&self, event: &AnalyticsEvent) -> Result<(), StorageError>;
}

/// Contact messages kept as one pretty-printed JSON array, rewritten on every append.
///
/// Every write goes through `write_lock`, so concurrent appends within the
/// process cannot lose each other's messages. The document is replaced by
/// renaming a fully written sibling file over it.
pub struct MessageStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl MessageStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create the parent directory and seed an empty array if the document is absent
    pub async fn ensure_initialized(&self) -> Result<(), StorageError> {
        let _guard = self.write_lock.lock().await;

        create_parent_dir(&self.path).await?;
        match fs::metadata(&self.path).await {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "Seeding empty message document");
                self.write_document(&[]).await
            }
            Err(e) => Err(StorageError::io(&self.path, e)),
        }
    }

    /// Read every stored message; an absent or blank document is empty
    pub async fn load_messages(&self) -> Result<Vec<ContactMessage>, StorageError> {
        self.read_document().await
    }

    /// Overwrite the document with `messages`
    pub async fn save_messages(&self, messages: &[ContactMessage]) -> Result<(), StorageError> {
        let _guard = self.write_lock.lock().await;
        self.write_document(messages).await
    }

    /// Read, allocate an id, push, and rewrite as one serialized step
    #[instrument(skip(self, draft), fields(path = %self.path.display()))]
    pub async fn append(
        &self,
        draft: MessageDraft,
        received_at: DateTime<Utc>,
    ) -> Result<ContactMessage, StorageError> {
        let _guard = self.write_lock.lock().await;

        let mut messages = self.read_document().await?;
        let id = next_id(&messages, received_at).ok_or_else(|| StorageError::IdsExhausted {
            path: self.path.clone(),
            last: messages.iter().map(|m| m.id).max().unwrap_or_default(),
        })?;
        let entry = ContactMessage {
            id,
            name: draft.name,
            email: draft.email,
            message: draft.message,
            received_at,
        };
        messages.push(entry.clone());
        self.write_document(&messages).await?;

        debug!(id = entry.id, count = messages.len(), "Message document rewritten");
        Ok(entry)
    }

    async fn read_document(&self) -> Result<Vec<ContactMessage>, StorageError> {
        let raw = match fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StorageError::io(&self.path, e)),
        };

        if raw.trim().is_empty() {
            return Ok(Vec::new());
        }

        serde_json::from_str(&raw).map_err(|source| StorageError::Corrupt {
            path: self.path.clone(),
            source,
        })
    }

    async fn write_document(&self, messages: &[ContactMessage]) -> Result<(), StorageError> {
        let body = serde_json::to_vec_pretty(messages)?;
        let tmp = temp_path(&self.path);

        create_parent_dir(&self.path).await?;
        fs::write(&tmp, &body)
            .await
            .map_err(|e| StorageError::io(&tmp, e))?;
        fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| StorageError::io(&self.path, e))
    }
}

/// Append-only analytics log, one `<timestamp> <json>` record per line
pub struct AnalyticsLog {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl AnalyticsLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one newline-terminated record; prior content is never touched
    pub async fn append(&self, event: &AnalyticsEvent) -> Result<(), StorageError> {
        let line = event.encode_line()?;
        let _guard = self.write_lock.lock().await;

        create_parent_dir(&self.path).await?;
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| StorageError::io(&self.path, e))?;

        file.write_all(line.as_bytes())
            .await
            .map_err(|e| StorageError::io(&self.path, e))?;
        file.flush()
            .await
            .map_err(|e| StorageError::io(&self.path, e))
    }

    /// Read the log back; lines that do not parse are skipped
    pub async fn read_events(&self) -> Result<Vec<AnalyticsEvent>, StorageError> {
        let raw = match fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StorageError::io(&self.path, e)),
        };

        let mut events = Vec::new();
        for (index, line) in raw.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match AnalyticsEvent::decode_line(line) {
                Some(event) => events.push(event),
                None => warn!(line = index + 1, path = %self.path.display(), "Skipping unreadable analytics record"),
            }
        }

        Ok(events)
    }
}

/// File-backed storage: the message document plus the analytics log
pub struct FileStorage {
    messages: MessageStore,
    analytics: AnalyticsLog,
}

impl FileStorage {
    /// Open both files from config, creating the data directory and an empty
    /// message document when they do not exist yet
    pub async fn open(config: &StorageConfig) -> Result<Self, StorageError> {
        let storage = Self {
            messages: MessageStore::new(config.messages_path()),
            analytics: AnalyticsLog::new(config.analytics_path()),
        };

        storage.messages.ensure_initialized().await?;

        info!(
            messages = %storage.messages.path().display(),
            analytics = %storage.analytics.path().display(),
            "File storage ready"
        );

        Ok(storage)
    }

    pub fn messages(&self) -> &MessageStore {
        &self.messages
    }

    pub fn analytics(&self) -> &AnalyticsLog {
        &self.analytics
    }
}

#[async_trait]
impl SubmissionStore for FileStorage {
    async fn load_messages(&self) -> Result<Vec<ContactMessage>, StorageError> {
        self.messages.load_messages().await
    }

    async fn append_message(
        &self,
        draft: MessageDraft,
        received_at: DateTime<Utc>,
    ) -> Result<ContactMessage, StorageError> {
        self.messages.append(draft, received_at).await
    }

    async fn append_analytics(&self, event: &AnalyticsEvent) -> Result<(), StorageError> {
        self.analytics.append(event).await
    }
}

/// Millisecond timestamp, bumped past the newest stored id when the clock has
/// not moved on; `None` once the newest id is `i64::MAX`
fn next_id(existing: &[ContactMessage], received_at: DateTime<Utc>) -> Option<i64> {
    let now = received_at.timestamp_millis();
    match existing.iter().map(|m| m.id).max() {
        Some(last) if last >= now => last.checked_add(1),
        _ => Some(now),
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    PathBuf::from(tmp)
}

async fn create_parent_dir(path: &Path) -> Result<(), StorageError> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => fs::create_dir_all(parent)
            .await
            .map_err(|e| StorageError::io(parent, e)),
        _ => Ok(()),
    }
}
