use crate::config::ApiConfig;
use crate::decoder::{decode_body, DecodeError};
use crate::ingest::{IngestError, IngestionService};
use crate::timestamp;
use anyhow::{Context, Result};
use axum::{
    body::Bytes,
    extract::{rejection::BytesRejection, DefaultBodyLimit, State},
    http::{header, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post, MethodRouter},
    Json, Router,
};
use serde::Serialize;
use std::future::Future;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

const ALLOWED_METHODS: &str = "GET,POST,OPTIONS";
const ALLOWED_HEADERS: &str = "Content-Type";
const JSON_CONTENT_TYPE: &str = "application/json; charset=utf-8";

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub ingestion: IngestionService,
}

/// Body of a successful `/send-message`
#[derive(Debug, Serialize)]
pub struct MessageAccepted {
    pub ok: bool,
    pub id: i64,
}

/// Body of a successful `/track`
#[derive(Debug, Serialize)]
pub struct EventAccepted {
    pub ok: bool,
}

/// Body of `/health`
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub ok: bool,
    pub now: String,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Every way a request can end in a non-2xx response
#[derive(Debug)]
pub enum ApiError {
    InvalidJson(DecodeError),
    UnreadableBody(BytesRejection),
    MissingFields,
    Storage,
    NotFound,
    MethodNotAllowed { allow: &'static str },
}

impl From<DecodeError> for ApiError {
    fn from(e: DecodeError) -> Self {
        Self::InvalidJson(e)
    }
}

impl From<BytesRejection> for ApiError {
    fn from(e: BytesRejection) -> Self {
        Self::UnreadableBody(e)
    }
}

impl From<IngestError> for ApiError {
    fn from(e: IngestError) -> Self {
        match e {
            IngestError::Validation { .. } => Self::MissingFields,
            IngestError::Storage(_) => Self::Storage,
        }
    }
}

impl ApiError {
    fn reason(&self) -> &'static str {
        match self {
            Self::InvalidJson(_) => "invalid_json",
            Self::UnreadableBody(_) => "unreadable_body",
            Self::MissingFields => "missing_fields",
            Self::Storage => "storage",
            Self::NotFound => "not_found",
            Self::MethodNotAllowed { .. } => "method_not_allowed",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        metrics::counter!("intake_rejected_total", "reason" => self.reason()).increment(1);

        let (status, message) = match &self {
            Self::InvalidJson(e) => {
                warn!(error = %e, "Rejected malformed body");
                (StatusCode::BAD_REQUEST, "Invalid JSON")
            }
            Self::UnreadableBody(e) => {
                warn!(error = %e, "Failed to read request body");
                let status = e.status();
                if status == StatusCode::PAYLOAD_TOO_LARGE {
                    (status, "Payload too large")
                } else {
                    (status, "Unreadable body")
                }
            }
            Self::MissingFields => (StatusCode::UNPROCESSABLE_ENTITY, "Missing fields"),
            Self::Storage => (StatusCode::INTERNAL_SERVER_ERROR, "Storage failure"),
            Self::NotFound => (StatusCode::NOT_FOUND, "Not found"),
            Self::MethodNotAllowed { .. } => (StatusCode::METHOD_NOT_ALLOWED, "Method not allowed"),
        };

        let body = Json(ErrorResponse {
            error: message.to_string(),
        });

        match self {
            Self::MethodNotAllowed { allow } => {
                (status, [(header::ALLOW, allow)], body).into_response()
            }
            _ => (status, body).into_response(),
        }
    }
}

/// Create the API router
pub fn create_router(state: AppState, config: &ApiConfig) -> Router {
    let allow_origin = config
        .cors_allow_origin
        .parse::<HeaderValue>()
        .unwrap_or_else(|_| {
            warn!(origin = %config.cors_allow_origin, "Invalid CORS origin, falling back to *");
            HeaderValue::from_static("*")
        });

    let mut router = Router::new()
        .route("/send-message", send_message_route())
        .route("/track", track_route())
        .route("/health", health_route());

    if config.route_prefix_aliases {
        router = router
            .route("/api/send-message", send_message_route())
            .route("/api/track", track_route())
            .route("/api/health", health_route());
    }

    let body_limit = match config.max_body_bytes {
        Some(max) => DefaultBodyLimit::max(max),
        None => DefaultBodyLimit::disable(),
    };

    router
        .fallback(fallback)
        .layer(body_limit)
        .layer(TraceLayer::new_for_http())
        .layer(SetResponseHeaderLayer::overriding(
            header::ACCESS_CONTROL_ALLOW_ORIGIN,
            allow_origin,
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::ACCESS_CONTROL_ALLOW_METHODS,
            HeaderValue::from_static(ALLOWED_METHODS),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::ACCESS_CONTROL_ALLOW_HEADERS,
            HeaderValue::from_static(ALLOWED_HEADERS),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::CONTENT_TYPE,
            HeaderValue::from_static(JSON_CONTENT_TYPE),
        ))
        .with_state(state)
}

fn send_message_route() -> MethodRouter<AppState> {
    post(send_message)
        .options(preflight)
        .fallback(|| async { ApiError::MethodNotAllowed { allow: "POST, OPTIONS" } })
}

fn track_route() -> MethodRouter<AppState> {
    post(track_event)
        .options(preflight)
        .fallback(|| async { ApiError::MethodNotAllowed { allow: "POST, OPTIONS" } })
}

fn health_route() -> MethodRouter<AppState> {
    get(health_check)
        .options(preflight)
        .fallback(|| async { ApiError::MethodNotAllowed { allow: "GET, HEAD, OPTIONS" } })
}

/// Accept a contact-form submission
async fn send_message(
    State(state): State<AppState>,
    body: Result<Bytes, BytesRejection>,
) -> Result<Json<MessageAccepted>, ApiError> {
    let payload = decode_body(&body?)?;
    let entry = state.ingestion.submit_message(&payload).await?;

    Ok(Json(MessageAccepted {
        ok: true,
        id: entry.id,
    }))
}

/// Record an analytics event
async fn track_event(
    State(state): State<AppState>,
    body: Result<Bytes, BytesRejection>,
) -> Result<Json<EventAccepted>, ApiError> {
    let payload = decode_body(&body?)?;
    state.ingestion.track_event(payload).await?;

    Ok(Json(EventAccepted { ok: true }))
}

/// Liveness probe
async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        ok: true,
        now: timestamp::to_iso(&timestamp::now()),
    })
}

/// CORS preflight: headers only
async fn preflight() -> StatusCode {
    StatusCode::NO_CONTENT
}

/// Unknown paths; OPTIONS is still answered as a preflight
async fn fallback(method: Method) -> Response {
    if method == Method::OPTIONS {
        return preflight().await.into_response();
    }
    ApiError::NotFound.into_response()
}

/// Start the intake API server and run until `shutdown` resolves
pub async fn start_api_server<F>(state: AppState, config: &ApiConfig, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let router = create_router(state, config);
    let addr = format!("{}:{}", config.host, config.port);

    info!(address = %addr, "Starting intake API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
        .context("API server error")?;

    Ok(())
}
