use crate::config::KeyConfig;
use crate::key_builder::{build_key, KeyError, LookupRequest};
use crate::object_fetcher::{FetchError, ObjectFetcher, ReadPayloadError};
use anyhow::{Context, Result};
use axum::{
    extract::{rejection::QueryRejection, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use bytes::Bytes;
use metrics::{counter, histogram};
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, instrument};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub fetcher: ObjectFetcher,
    pub bucket: Arc<str>,
    pub key_layout: Arc<KeyConfig>,
    pub service_name: Arc<str>,
}

impl AppState {
    pub fn new(
        fetcher: ObjectFetcher,
        bucket: impl Into<Arc<str>>,
        key_layout: KeyConfig,
        service_name: impl Into<Arc<str>>,
    ) -> Self {
        Self {
            fetcher,
            bucket: bucket.into(),
            key_layout: Arc::new(key_layout),
            service_name: service_name.into(),
        }
    }
}

/// Failures of a `/get-data` request.
///
/// The `Display` text is exactly what the client sees; the underlying cause
/// is only logged.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Missing query parameters")]
    MissingParameters,
    #[error("Invalid month format")]
    InvalidMonth,
    /// An identifier contains `/` and cannot be placed in a single key segment
    #[error("Invalid query parameters")]
    InvalidSegment { field: &'static str },
    #[error("Failed to retrieve object")]
    Fetch(#[from] FetchError),
    #[error("Failed to read downloaded file")]
    ReadPayload(#[from] ReadPayloadError),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::MissingParameters
            | ApiError::InvalidMonth
            | ApiError::InvalidSegment { .. } => StatusCode::BAD_REQUEST,
            ApiError::Fetch(_) | ApiError::ReadPayload(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn outcome(&self) -> &'static str {
        match self {
            ApiError::MissingParameters => "missing_parameters",
            ApiError::InvalidMonth => "invalid_month",
            ApiError::InvalidSegment { .. } => "invalid_segment",
            ApiError::Fetch(_) => "fetch_error",
            ApiError::ReadPayload(_) => "read_error",
        }
    }
}

impl From<KeyError> for ApiError {
    fn from(e: KeyError) -> Self {
        match e {
            KeyError::InvalidMonth(_) => ApiError::InvalidMonth,
            KeyError::DelimiterInSegment { field } => ApiError::InvalidSegment { field },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        // Plain-text body terminated by a newline, never content-sniffed
        (
            self.status_code(),
            [(header::X_CONTENT_TYPE_OPTIONS, "nosniff")],
            format!("{self}\n"),
        )
            .into_response()
    }
}

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/get-data", get(get_data))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check endpoint
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": &*state.service_name,
    }))
}

/// Serve the GPS data document addressed by the query parameters
#[instrument(skip_all)]
async fn get_data(
    State(state): State<AppState>,
    query: Result<Query<Vec<(String, String)>>, QueryRejection>,
) -> Response {
    let result = match query {
        Ok(Query(pairs)) => lookup(&state, &pairs).await,
        Err(_) => Err(ApiError::MissingParameters),
    };
    let outcome = match &result {
        Ok(_) => "ok",
        Err(e) => e.outcome(),
    };
    counter!("gateway_requests_total", "outcome" => outcome).increment(1);

    match result {
        Ok(body) => ([(header::CONTENT_TYPE, "application/json")], body).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn lookup(state: &AppState, pairs: &[(String, String)]) -> Result<Bytes, ApiError> {
    let request = lookup_request(pairs)?;
    let key = build_key(&state.key_layout, &request)?;

    let started = Instant::now();
    let payload = state
        .fetcher
        .fetch(&state.bucket, &key)
        .await
        .map_err(|e| {
            error!(
                bucket = %state.bucket,
                key = %key,
                not_found = e.is_not_found(),
                error = ?e,
                "Failed to retrieve object from S3"
            );
            e
        })?;
    histogram!("gateway_fetch_duration_seconds").record(started.elapsed().as_secs_f64());

    let body = payload.into_bytes().await.map_err(|e| {
        error!(key = %key, error = ?e, "Failed to read downloaded file");
        e
    })?;

    debug!(key = %key, size_bytes = body.len(), "Serving GPS data");
    Ok(body)
}

/// Pick the five lookup fields out of the query string.
///
/// The first occurrence of a repeated parameter wins; an empty value counts
/// as missing.
fn lookup_request(pairs: &[(String, String)]) -> Result<LookupRequest, ApiError> {
    let param = |name: &str| {
        pairs
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.clone())
            .filter(|v| !v.is_empty())
    };

    let (Some(user_id), Some(vehicle_id), Some(year), Some(month), Some(day)) = (
        param("user_id"),
        param("vehicle_id"),
        param("year"),
        param("month"),
        param("day"),
    ) else {
        return Err(ApiError::MissingParameters);
    };

    Ok(LookupRequest {
        user_id,
        vehicle_id,
        year,
        month,
        day,
    })
}

/// Start the gateway API server, serving until `shutdown` resolves
pub async fn start_api_server<F>(state: AppState, addr: &str, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let router = create_router(state);

    info!(address = %addr, "Starting GPS data API server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
        .context("API server error")?;

    Ok(())
}
