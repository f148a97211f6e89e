//! Retry policy
//!
//! Wraps fallible async operations with bounded retries, exponential backoff
//! with jitter and a per-attempt timeout.

mod policy;

pub use policy::{AttemptError, Recoverable, RetryError, RetryPolicy, RetryState, Sleeper, TokioSleeper};
