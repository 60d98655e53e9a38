//! Rate limiting middleware for axum routers.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::Response;
use tracing::{trace, warn};

use super::keys::{resolve_key, ClientIp, CustomKey, HeaderKey, Identity, KeyExtractor};
use super::response::{error_response, RATE_LIMIT_EXCEEDED};
use crate::ratelimit::RateLimiter;

/// State for [`rate_limit_middleware`].
///
/// Pairs a limiter with the policy that maps requests to client keys and the
/// message returned to throttled clients.
#[derive(Clone)]
pub struct RateLimitState {
    limiter: Arc<RateLimiter>,
    extractor: Arc<dyn KeyExtractor>,
    message: Arc<str>,
}

impl RateLimitState {
    /// Build state from its parts.
    pub fn new(
        limiter: Arc<RateLimiter>,
        extractor: Arc<dyn KeyExtractor>,
        message: impl Into<Arc<str>>,
    ) -> Self {
        Self {
            limiter,
            extractor,
            message: message.into(),
        }
    }

    /// Limit per authenticated identity, or per IP for anonymous requests.
    pub fn per_client(limiter: Arc<RateLimiter>) -> Self {
        Self::new(
            limiter,
            Arc::new(Identity),
            "Too many requests. Please try again later.",
        )
    }

    /// Limit per client IP.
    pub fn per_ip(limiter: Arc<RateLimiter>) -> Self {
        Self::new(
            limiter,
            Arc::new(ClientIp),
            "Too many requests from this IP. Please try again later.",
        )
    }

    /// Limit per `API-Key` header, or per IP when the header is missing.
    pub fn per_api_key(limiter: Arc<RateLimiter>) -> Self {
        Self::new(
            limiter,
            Arc::new(HeaderKey::api_key()),
            "API rate limit exceeded. Please try again later.",
        )
    }

    /// Limit per key computed by `f`, or per IP when `f` yields nothing.
    pub fn custom<F>(limiter: Arc<RateLimiter>, f: F) -> Self
    where
        F: Fn(&Request) -> Option<String> + Send + Sync + 'static,
    {
        Self::new(
            limiter,
            Arc::new(CustomKey::new(f)),
            "Rate limit exceeded. Please try again later.",
        )
    }

    /// Replace the message sent to throttled clients.
    pub fn with_message(mut self, message: impl Into<Arc<str>>) -> Self {
        self.message = message.into();
        self
    }

    /// The shared limiter.
    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }
}

impl std::fmt::Debug for RateLimitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimitState")
            .field("limiter", &self.limiter)
            .field("message", &self.message)
            .finish_non_exhaustive()
    }
}

/// Charge the request to its client key; reject with 429 when out of tokens.
///
/// Throttled requests never reach the inner service.
pub async fn rate_limit_middleware(
    State(state): State<RateLimitState>,
    request: Request,
    next: Next,
) -> Response {
    let key = resolve_key(state.extractor.as_ref(), &request);

    if !state.limiter.allow(&key) {
        warn!(
            key = %key,
            method = %request.method(),
            path = %request.uri().path(),
            "Rate limit exceeded"
        );
        return error_response(
            StatusCode::TOO_MANY_REQUESTS,
            RATE_LIMIT_EXCEEDED,
            &state.message,
        );
    }

    trace!(key = %key, "Request admitted");
    next.run(request).await
}
