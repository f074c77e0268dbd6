//! Per-caller admission middleware.

use std::net::{IpAddr, SocketAddr};

use axum::extract::{ConnectInfo, Request, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::Router;
use tracing::{debug, instrument};

use super::service::ApiError;
use super::AppState;
use crate::ratelimit::Decision;

const X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
const X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");
const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");
const X_REAL_IP: HeaderName = HeaderName::from_static("x-real-ip");

/// Key used when no caller address can be found.
pub const UNKNOWN_CLIENT: &str = "unknown";

/// Identify the caller by IP address.
///
/// With `trust_forwarded` set, the first `X-Forwarded-For` hop wins, then
/// `X-Real-IP`. Header values that are not IP addresses are ignored. The
/// peer address is used otherwise.
pub fn client_key(request: &Request, trust_forwarded: bool) -> String {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());

    let ip = if trust_forwarded {
        forwarded_ip(request.headers()).or(peer)
    } else {
        peer
    };

    ip.map(|ip| ip.to_string())
        .unwrap_or_else(|| UNKNOWN_CLIENT.to_string())
}

fn forwarded_ip(headers: &HeaderMap) -> Option<IpAddr> {
    let forwarded = headers
        .get(X_FORWARDED_FOR)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .and_then(|hop| hop.trim().parse::<IpAddr>().ok());

    forwarded.or_else(|| {
        headers
            .get(X_REAL_IP)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse::<IpAddr>().ok())
    })
}

/// Check the caller against the default quota. Admitted requests continue
/// with rate limit headers attached; the rest get `429`.
#[instrument(skip_all, fields(key))]
pub async fn rate_limit_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let key = client_key(&request, state.trust_forwarded_headers);
    tracing::Span::current().record("key", key.as_str());

    let decision = state.limiter.check_default(&key);
    if !decision.admitted {
        debug!(key = %key, "Rejecting request over rate limit");
        return ApiError::TooManyRequests {
            decision,
            now_ms: state.limiter.now_ms(),
        }
        .into_response();
    }

    let mut response = next.run(request).await;
    insert_rate_limit_headers(response.headers_mut(), &decision);
    response
}

/// Put every route of `router` behind [`rate_limit_middleware`].
pub fn with_rate_limit(router: Router<AppState>, state: AppState) -> Router<AppState> {
    router.route_layer(middleware::from_fn_with_state(state, rate_limit_middleware))
}

/// `X-RateLimit-Limit`, `X-RateLimit-Remaining` and `X-RateLimit-Reset`
/// (epoch seconds).
pub(crate) fn insert_rate_limit_headers(headers: &mut HeaderMap, decision: &Decision) {
    headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(decision.limit));
    headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(decision.remaining));
    headers.insert(
        X_RATELIMIT_RESET,
        HeaderValue::from(decision.reset_at_ms.div_ceil(1000)),
    );
}
