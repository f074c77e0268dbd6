//! JSON endpoints: explicit checks, reverse-proxy admission and health.

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, instrument, warn};

use super::middleware::{insert_rate_limit_headers, with_rate_limit};
use super::AppState;
use crate::error::TurnstileError;
use crate::ratelimit::{Decision, Quota};

/// Body of `POST /v1/check`. Missing `limit` or `window_ms` fall back to the
/// limiter's default quota.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckRequest {
    pub key: String,
    #[serde(default)]
    pub limit: Option<u64>,
    #[serde(default)]
    pub window_ms: Option<u64>,
}

/// Body returned by `POST /v1/check`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckResponse {
    pub admitted: bool,
    pub remaining: u64,
    pub limit: u64,
    /// End of the key's current window, RFC 3339
    pub reset_at: String,
}

impl From<Decision> for CheckResponse {
    fn from(decision: Decision) -> Self {
        Self {
            admitted: decision.admitted,
            remaining: decision.remaining,
            limit: decision.limit,
            reset_at: rfc3339_millis(decision.reset_at_ms),
        }
    }
}

fn rfc3339_millis(epoch_ms: u64) -> String {
    i64::try_from(epoch_ms)
        .ok()
        .and_then(DateTime::<Utc>::from_timestamp_millis)
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
        .to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Errors surfaced to HTTP callers as `{"error": "..."}`.
#[derive(Debug)]
pub enum ApiError {
    /// Malformed input, `400`
    BadRequest(String),
    /// Caller is over its quota, `429`
    TooManyRequests { decision: Decision, now_ms: u64 },
}

impl From<TurnstileError> for ApiError {
    fn from(err: TurnstileError) -> Self {
        ApiError::BadRequest(err.to_string())
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(message) => {
                (StatusCode::BAD_REQUEST, Json(json!({ "error": message }))).into_response()
            }
            ApiError::TooManyRequests { decision, now_ms } => {
                let retry_after_secs = decision.reset_at_ms.saturating_sub(now_ms).div_ceil(1000);
                let mut response = (
                    StatusCode::TOO_MANY_REQUESTS,
                    Json(json!({ "error": "Too many requests" })),
                )
                    .into_response();
                let headers = response.headers_mut();
                insert_rate_limit_headers(headers, &decision);
                headers.insert(header::RETRY_AFTER, HeaderValue::from(retry_after_secs.max(1)));
                response
            }
        }
    }
}

/// Build the service router.
///
/// - `GET /health`
/// - `POST /v1/check`: explicit check for any key and quota
/// - `GET|POST /v1/admit`: `204` or `429` for the calling address, for use
///   as a reverse-proxy auth subrequest
pub fn router(state: AppState) -> Router {
    let admit = with_rate_limit(
        Router::new().route("/v1/admit", get(admit_handler).post(admit_handler)),
        state.clone(),
    );

    Router::new()
        .route("/health", get(health_handler))
        .route("/v1/check", post(check_handler))
        .merge(admit)
        .with_state(state)
}

async fn health_handler() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

/// Reached only when the middleware admitted the caller.
async fn admit_handler() -> StatusCode {
    StatusCode::NO_CONTENT
}

#[instrument(skip_all, fields(key))]
async fn check_handler(
    State(state): State<AppState>,
    payload: Result<Json<CheckRequest>, JsonRejection>,
) -> Result<Json<CheckResponse>, ApiError> {
    let Json(request) =
        payload.inspect_err(|e| warn!(error = %e, "Received malformed rate limit check"))?;
    tracing::Span::current().record("key", request.key.as_str());

    if request.key.is_empty() {
        warn!("Received rate limit check with empty key");
        return Err(ApiError::BadRequest("key is required".to_string()));
    }

    let default_quota = state.limiter.default_quota();
    let quota = Quota::from_millis(
        request.limit.unwrap_or(default_quota.limit()),
        request.window_ms.unwrap_or(default_quota.window_ms()),
    )
    .inspect_err(|e| warn!(error = %e, "Received rate limit check with invalid quota"))?;

    let decision = state.limiter.check(&request.key, quota);

    info!(
        key = %request.key,
        admitted = decision.admitted,
        remaining = decision.remaining,
        "Rate limit decision made"
    );

    Ok(Json(decision.into()))
}
