//! Token bucket rate limiting and bucket state management.

mod bucket;
mod limiter;
mod quota;
mod registry;
mod sweeper;

pub use bucket::TokenBucket;
pub use limiter::{RateLimiter, RateLimiterConfig};
pub use quota::Quota;
pub use registry::LimiterRegistry;
pub use sweeper::{SweepPolicy, Sweeper};
