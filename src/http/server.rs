//! HTTP server wiring the rate limiter in front of the API routes.

use std::net::SocketAddr;

use axum::routing::get;
use axum::{middleware, Json, Router};
use tokio::net::TcpListener;
use tracing::{error, info};

use super::middleware::{rate_limit_middleware, RateLimitState};
use super::response::ApiResponse;
use crate::error::{GatekeeperError, Result};

/// HTTP server for the demo API.
pub struct HttpServer {
    /// Address to bind to
    addr: SocketAddr,
    /// Rate limiting applied to `/api` routes
    rate_limit: RateLimitState,
}

impl HttpServer {
    /// Create a new server.
    pub fn new(addr: SocketAddr, rate_limit: RateLimitState) -> Self {
        Self { addr, rate_limit }
    }

    /// Build the router: `/health` is unthrottled, `/api/*` is rate limited.
    pub fn router(&self) -> Router {
        let api = Router::new()
            .route("/ping", get(ping))
            .layer(middleware::from_fn_with_state(
                self.rate_limit.clone(),
                rate_limit_middleware,
            ));

        Router::new()
            .route("/health", get(health))
            .nest("/api", api)
    }

    /// Start the server.
    ///
    /// The server stops accepting connections when `signal` resolves and
    /// returns once in-flight requests finish.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(self.addr).await?;
        let local_addr = listener.local_addr()?;
        let router = self.router();

        info!(addr = %local_addr, "Starting HTTP server with graceful shutdown");

        axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(signal)
        .await
        .map_err(|e| {
            error!(error = %e, "HTTP server failed");
            GatekeeperError::Io(e)
        })
    }
}

async fn health() -> &'static str {
    "OK"
}

async fn ping() -> Json<ApiResponse<&'static str>> {
    Json(ApiResponse::success("pong"))
}
