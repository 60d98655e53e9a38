//! Gatekeeper - Per-Client Rate Limiting for HTTP Services
//!
//! This crate implements a token bucket rate limiter keyed by client
//! (address, authenticated identity or header value) and an axum middleware
//! that rejects clients over their quota with `429 Too Many Requests`.
//! Idle buckets are evicted by a background sweep owned by the limiter.

pub mod config;
pub mod error;
pub mod http;
pub mod ratelimit;
