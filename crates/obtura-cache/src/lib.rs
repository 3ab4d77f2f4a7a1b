//! Redis-backed distributed rate limiting.

pub mod limiter;

pub use limiter::{RateLimiter, RedisRateLimiter};
