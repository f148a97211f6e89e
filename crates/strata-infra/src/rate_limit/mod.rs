//! Rate limiting service
//!
//! This module provides rate limiting of outbound upstream requests using a
//! token bucket algorithm.

pub use limiter::RateLimiter;

mod limiter;
