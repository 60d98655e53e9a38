//! HTTP layer: client key policies, the rate limiting middleware and the server.

mod keys;
mod middleware;
mod response;
mod server;

pub use keys::{
    client_ip, resolve_key, ClientIdentity, ClientIp, CustomKey, HeaderKey, Identity,
    KeyExtractor, API_KEY_HEADER, UNKNOWN_CLIENT,
};
pub use middleware::{rate_limit_middleware, RateLimitState};
pub use response::{error_response, ApiResponse, ErrorInfo, RATE_LIMIT_EXCEEDED};
pub use server::HttpServer;
