//! HTTP host layer: admission middleware, check service and server.

mod middleware;
mod server;
mod service;

use std::sync::Arc;

use crate::ratelimit::RateLimiter;

pub use middleware::{client_key, rate_limit_middleware, with_rate_limit};
pub use server::HttpServer;
pub use service::{router, ApiError, CheckRequest, CheckResponse};

/// Shared state handed to every handler.
#[derive(Debug, Clone)]
pub struct AppState {
    pub limiter: Arc<RateLimiter>,
    /// Key callers by forwarding headers rather than the peer address
    pub trust_forwarded_headers: bool,
}

impl AppState {
    /// State that trusts forwarding headers, as when deployed behind a proxy.
    pub fn new(limiter: Arc<RateLimiter>) -> Self {
        Self {
            limiter,
            trust_forwarded_headers: true,
        }
    }

    pub fn with_trust_forwarded_headers(mut self, trust: bool) -> Self {
        self.trust_forwarded_headers = trust;
        self
    }
}
