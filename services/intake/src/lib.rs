//! Beacon Intake Service
//!
//! Backend for the Beacon awareness site. The single-page UI posts contact
//! form submissions and analytics events here; both are committed to plain
//! files under a data directory.
//!
//! ## Endpoints
//!
//! - `POST /send-message`: validate `{name, email, message}` and append it to
//!   the JSON message document
//! - `POST /track`: append an arbitrary JSON event to the analytics log
//! - `GET /health`: liveness probe
//! - `OPTIONS *`: CORS preflight
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐     ┌──────────────┐     ┌──────────────┐
//! │ HTTP API     │────▶│ Request      │────▶│ Ingestion    │
//! │ (axum)       │     │ Decoder      │     │ Service      │
//! └──────────────┘     └──────────────┘     └──────────────┘
//!                                                  │
//!                                                  ▼
//!                                           ┌──────────────┐
//!                                           │ File Storage │
//!                                           └──────────────┘
//!                                             │          │
//!                                             ▼          ▼
//!                                     messages.json   analytics.log
//! ```

pub mod api;
pub mod config;
pub mod decoder;
pub mod ingest;
pub mod store;
pub mod timestamp;

pub use api::{create_router, AppState};
pub use config::Config;
pub use decoder::{decode_body, DecodeError};
pub use ingest::{IngestError, IngestionService};
pub use store::{
    AnalyticsEvent, AnalyticsLog, ContactMessage, FileStorage, MessageDraft, MessageStore,
    StorageError, SubmissionStore,
};
