use crate::store::{AnalyticsEvent, ContactMessage, MessageDraft, StorageError, SubmissionStore};
use crate::timestamp;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, instrument};

/// Why an ingestion call was refused
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Missing fields")]
    Validation { missing: Vec<&'static str> },

    #[error("Storage failure: {0}")]
    Storage(#[from] StorageError),
}

/// Accepts contact messages and analytics events and commits them to storage
#[derive(Clone)]
pub struct IngestionService {
    store: Arc<dyn SubmissionStore>,
}

impl IngestionService {
    pub fn new(store: Arc<dyn SubmissionStore>) -> Self {
        Self { store }
    }

    /// Validate and persist a contact-form submission.
    ///
    /// `name`, `email` and `message` must each be a non-empty string. Nothing
    /// is written when any of them is missing.
    #[instrument(skip(self, payload))]
    pub async fn submit_message(&self, payload: &Value) -> Result<ContactMessage, IngestError> {
        let draft = validate_message(payload)?;
        let received_at = timestamp::now();

        let entry = self
            .store
            .append_message(draft, received_at)
            .await
            .map_err(|e| {
                error!(error = %e, "Failed to persist contact message");
                metrics::counter!("intake_storage_errors_total", "kind" => e.kind()).increment(1);
                e
            })?;

        metrics::counter!("intake_messages_saved_total").increment(1);
        info!(id = entry.id, name = %entry.name, "Saved message");

        Ok(entry)
    }

    /// Append an analytics event; the payload shape is not checked
    #[instrument(skip(self, payload))]
    pub async fn track_event(&self, payload: Value) -> Result<AnalyticsEvent, IngestError> {
        let event = AnalyticsEvent::new(timestamp::now(), payload);

        self.store.append_analytics(&event).await.map_err(|e| {
            error!(error = %e, "Failed to append analytics event");
            metrics::counter!("intake_storage_errors_total", "kind" => e.kind()).increment(1);
            e
        })?;

        metrics::counter!("intake_events_tracked_total").increment(1);
        info!(event = event.event().unwrap_or("unknown"), "Tracked event");

        Ok(event)
    }

    /// Every stored contact message
    pub async fn messages(&self) -> Result<Vec<ContactMessage>, IngestError> {
        Ok(self.store.load_messages().await?)
    }
}

fn validate_message(payload: &Value) -> Result<MessageDraft, IngestError> {
    let field = |key: &str| {
        payload
            .get(key)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_owned)
    };

    let (name, email, message) = (field("name"), field("email"), field("message"));

    match (name, email, message) {
        (Some(name), Some(email), Some(message)) => Ok(MessageDraft {
            name,
            email,
            message,
        }),
        (name, email, message) => {
            let missing = [("name", name), ("email", email), ("message", message)]
                .into_iter()
                .filter(|(_, value)| value.is_none())
                .map(|(key, _)| key)
                .collect();
            Err(IngestError::Validation { missing })
        }
    }
}
