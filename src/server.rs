//! Web server module for Metrika.
//!
//! Provides the collector HTTP API: URL and JSON metric updates, batch
//! updates, value lookups, a plain HTML listing and health probes.

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::fmt::Write as _;
use std::sync::Arc;
use tower_http::trace::{DefaultMakeSpan, TraceLayer};

use crate::storage::{
    DurableRecord, MetricKind, MetricUpdate, Repository, StorageError, ValidationError,
};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub repository: Arc<Repository>,
}

/// Health check response.
#[derive(Serialize)]
struct HealthResponse {
    status: String,
    metrics: usize,
}

/// Body of `POST /value/`.
#[derive(Debug, Deserialize)]
struct ValueRequest {
    id: String,
    #[serde(rename = "type")]
    kind: String,
}

/// Errors returned by request handlers.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Metric input was rejected.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Request body is not valid JSON for the endpoint.
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// Metric does not exist.
    #[error("unknown {kind} metric '{name}'")]
    NotFound { kind: MetricKind, name: String },

    /// Backend failure.
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            Self::Validation(ValidationError::MissingName) | Self::NotFound { .. } => {
                StatusCode::NOT_FOUND
            }
            Self::Validation(_) | Self::Json(_) => StatusCode::BAD_REQUEST,
            Self::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        } else {
            tracing::debug!(error = %self, status = status.as_u16(), "Request rejected");
        }
        (status, self.to_string()).into_response()
    }
}

fn parse_json<T: DeserializeOwned>(body: &[u8]) -> Result<T, ApiError> {
    Ok(serde_json::from_slice(body)?)
}

/// Render a gauge with at most three decimals and no trailing zeros.
fn format_gauge(value: f64) -> String {
    let formatted = format!("{value:.3}");
    let trimmed = formatted.trim_end_matches('0').trim_end_matches('.');
    match trimmed {
        "-0" => "0".to_string(),
        _ => trimmed.to_string(),
    }
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Create the Axum router with all routes.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/healthz", get(healthz_handler))
        .route("/ping", get(ping_handler))
        .route("/update/", post(update_json_handler))
        .route("/update/{kind}/{name}/{value}", post(update_handler))
        .route("/updates/", post(updates_handler))
        .route("/value/", post(value_json_handler))
        .route("/value/{kind}/{name}", get(value_handler))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::default().include_headers(true)),
        )
        .with_state(state)
}

/// HTML list of every metric.
async fn index_handler(State(state): State<AppState>) -> Html<String> {
    let mut body = String::from("<html><head><title>Metrics</title></head><body><ul>\n");
    for record in state.repository.store().snapshot() {
        let value = match (record.value, record.delta) {
            (Some(value), _) => format_gauge(value),
            (_, Some(delta)) => delta.to_string(),
            _ => continue,
        };
        let _ = writeln!(
            body,
            "<li>{} ({}): {}</li>",
            escape_html(&record.id),
            record.kind,
            value
        );
    }
    body.push_str("</ul></body></html>\n");
    Html(body)
}

/// Liveness probe.
async fn healthz_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        metrics: state.repository.store().len(),
    })
}

/// Backend connectivity probe.
async fn ping_handler(State(state): State<AppState>) -> Response {
    match state.repository.ping().await {
        Ok(()) => (StatusCode::OK, "OK").into_response(),
        Err(e) => {
            tracing::error!(error = %e, "Backend ping failed");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

/// `POST /update/{kind}/{name}/{value}`
async fn update_handler(
    State(state): State<AppState>,
    Path((kind, name, value)): Path<(String, String, String)>,
) -> Result<StatusCode, ApiError> {
    let update = MetricUpdate::parse(&kind, &name, &value)?;
    state.repository.apply(update).await;
    Ok(StatusCode::OK)
}

/// `GET /value/{kind}/{name}`
async fn value_handler(
    State(state): State<AppState>,
    Path((kind, name)): Path<(String, String)>,
) -> Result<String, ApiError> {
    let kind = MetricKind::parse(&kind)?;
    let record = state
        .repository
        .store()
        .get(kind, &name)
        .ok_or(ApiError::NotFound { kind, name })?;

    Ok(match (record.value, record.delta) {
        (Some(value), _) => format_gauge(value),
        (_, Some(delta)) => delta.to_string(),
        _ => String::new(),
    })
}

/// `POST /update/` with one JSON record; responds with the updated record.
async fn update_json_handler(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<DurableRecord>, ApiError> {
    let record: DurableRecord = parse_json(&body)?;
    let update = MetricUpdate::try_from(record)?;
    Ok(Json(state.repository.apply(update).await))
}

/// `POST /updates/` with a JSON list, applied as one batch.
async fn updates_handler(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    let records: Vec<DurableRecord> = parse_json(&body)?;
    let updates = records
        .into_iter()
        .map(MetricUpdate::try_from)
        .collect::<Result<Vec<_>, _>>()?;

    state.repository.apply_batch(&updates).await?;
    tracing::debug!(count = updates.len(), "Batch applied");
    Ok(StatusCode::OK)
}

/// `POST /value/` with `{id, type}`; responds with the current record.
async fn value_json_handler(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<DurableRecord>, ApiError> {
    let request: ValueRequest = parse_json(&body)?;
    if request.id.is_empty() {
        return Err(ValidationError::MissingName.into());
    }
    let kind = MetricKind::parse(&request.kind)?;

    state
        .repository
        .store()
        .get(kind, &request.id)
        .map(Json)
        .ok_or(ApiError::NotFound {
            kind,
            name: request.id,
        })
}
