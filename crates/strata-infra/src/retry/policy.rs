use async_trait::async_trait;
use rand::Rng;
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use strata_core::config::RetrySettings;
use strata_core::IngestError;
use tokio_util::sync::CancellationToken;

/// Classifies failures into ones worth another attempt and ones that are not.
pub trait Recoverable {
    fn is_recoverable(&self) -> bool;
}

impl Recoverable for IngestError {
    fn is_recoverable(&self) -> bool {
        IngestError::is_recoverable(self)
    }
}

/// Source of backoff delays, injectable so tests can observe and skip them.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Why a single attempt did not produce a value.
#[derive(Debug, thiserror::Error)]
pub enum AttemptError<E> {
    #[error("{0}")]
    Failed(E),

    #[error("attempt timed out after {0:?}")]
    TimedOut(Duration),
}

impl<E: Recoverable> AttemptError<E> {
    fn is_recoverable(&self) -> bool {
        match self {
            AttemptError::Failed(e) => e.is_recoverable(),
            AttemptError::TimedOut(_) => true,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RetryError<E> {
    #[error("retry exhausted after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: AttemptError<E> },

    /// The operation failed with an error that retrying cannot fix.
    #[error("{0}")]
    Fatal(E),

    #[error("operation canceled")]
    Canceled,
}

impl From<RetryError<IngestError>> for IngestError {
    fn from(err: RetryError<IngestError>) -> Self {
        match err {
            RetryError::Exhausted { attempts, last } => IngestError::RetryExhausted {
                attempts,
                last: Box::new(match last {
                    AttemptError::Failed(e) => e,
                    AttemptError::TimedOut(after) => IngestError::Timeout(after),
                }),
            },
            RetryError::Fatal(e) => e,
            RetryError::Canceled => IngestError::Canceled,
        }
    }
}

/// States of one retried operation.
///
/// `Attempting(1) -> [Backoff -> Attempting(n+1)]* -> Succeeded | Exhausted | Aborted`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryState {
    Attempting { attempt: u32 },
    Backoff { attempt: u32, delay: Duration },
    Succeeded { attempts: u32 },
    Exhausted { attempts: u32 },
    Aborted { attempts: u32 },
}

impl RetryState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RetryState::Succeeded { .. } | RetryState::Exhausted { .. } | RetryState::Aborted { .. }
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    RecoverableFailure,
    FatalFailure,
}

/// Bounded retry with exponential backoff, jitter and per-attempt timeouts.
///
/// A policy with `max_retries = n` makes at most `n + 1` attempts.
#[derive(Clone)]
pub struct RetryPolicy {
    settings: RetrySettings,
    sleeper: Arc<dyn Sleeper>,
}

impl RetryPolicy {
    pub fn new(settings: RetrySettings) -> Self {
        Self {
            settings,
            sleeper: Arc::new(TokioSleeper),
        }
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn settings(&self) -> &RetrySettings {
        &self.settings
    }

    pub fn max_attempts(&self) -> u32 {
        self.settings.max_retries.saturating_add(1)
    }

    /// Deterministic part of the delay before attempt `attempt + 1`.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.settings
            .backoff_base
            .saturating_mul(factor)
            .min(self.settings.backoff_max)
    }

    fn backoff_delay(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt);
        if self.settings.jitter_ratio <= 0.0 {
            return base;
        }
        let jitter = rand::rng().random::<f64>() * self.settings.jitter_ratio;
        base + base.mul_f64(jitter)
    }

    fn transition(&self, attempt: u32, outcome: Outcome) -> RetryState {
        match outcome {
            Outcome::FatalFailure => RetryState::Aborted { attempts: attempt },
            Outcome::RecoverableFailure if attempt >= self.max_attempts() => {
                RetryState::Exhausted { attempts: attempt }
            }
            Outcome::RecoverableFailure => RetryState::Backoff {
                attempt,
                delay: self.backoff_delay(attempt),
            },
        }
    }

    /// Run `operation` until it succeeds, fails fatally, exhausts its attempts
    /// or `cancel` fires. The closure receives the 1-based attempt number.
    pub async fn run<T, E, F, Fut>(
        &self,
        operation: &str,
        cancel: &CancellationToken,
        mut op: F,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Recoverable + Display,
    {
        let mut attempt = 1;

        loop {
            if cancel.is_cancelled() {
                return Err(RetryError::Canceled);
            }

            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(RetryError::Canceled),
                result = tokio::time::timeout(self.settings.attempt_timeout, op(attempt)) => result,
            };

            let error = match result {
                Ok(Ok(value)) => {
                    if attempt > 1 {
                        tracing::debug!(operation, attempt, "Operation succeeded after retry");
                    }
                    return Ok(value);
                }
                Ok(Err(e)) => AttemptError::Failed(e),
                Err(_) => AttemptError::TimedOut(self.settings.attempt_timeout),
            };

            let outcome = if error.is_recoverable() {
                Outcome::RecoverableFailure
            } else {
                Outcome::FatalFailure
            };

            match self.transition(attempt, outcome) {
                RetryState::Backoff { delay, .. } => {
                    tracing::warn!(
                        operation,
                        attempt,
                        max_attempts = self.max_attempts(),
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "Attempt failed, backing off"
                    );
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(RetryError::Canceled),
                        _ = self.sleeper.sleep(delay) => {}
                    }
                    attempt += 1;
                }
                RetryState::Exhausted { attempts } => {
                    tracing::warn!(operation, attempts, error = %error, "Retries exhausted");
                    return Err(RetryError::Exhausted {
                        attempts,
                        last: error,
                    });
                }
                _ => {
                    tracing::debug!(operation, attempt, error = %error, "Non-recoverable failure");
                    return Err(match error {
                        AttemptError::Failed(e) => RetryError::Fatal(e),
                        timed_out => RetryError::Exhausted {
                            attempts: attempt,
                            last: timed_out,
                        },
                    });
                }
            }
        }
    }
}
