use std::future::Future;
use std::time::Duration;
use tracing::{error, warn};

use crate::config::{BackoffKind, RetryConfig};
use crate::error::StageError;
use crate::stage::StageOutcome;
use crate::state::{Artifact, StageOutcomeKind, StageRecord};

/// Delay schedule between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    Fixed(Duration),
    /// `base * 2^(retry - 1)`, never above `max`
    Exponential { base: Duration, max: Duration },
}

impl Backoff {
    /// Delay before retry number `retry` (1-based).
    pub fn delay(&self, retry: u32) -> Duration {
        match *self {
            Backoff::Fixed(delay) => delay,
            Backoff::Exponential { base, max } => {
                let factor = 2u32.saturating_pow(retry.saturating_sub(1));
                base.saturating_mul(factor).min(max)
            }
        }
    }
}

/// Final result of a wrapped stage invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryReport {
    pub result: Result<Artifact, StageError>,
    pub attempts: u32,
    /// Recoverable failures ran out of attempts
    pub exhausted: bool,
}

/// Bounded retry around a single stage invocation.
///
/// Recoverable failures are retried up to `max_retries` times; fatal
/// failures return immediately. Every failed attempt that is followed by
/// another one is appended to the stage history.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff: Backoff::Fixed(Duration::from_secs(1)),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, backoff: Backoff) -> Self {
        Self { max_retries, backoff }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        let base = Duration::from_millis(config.delay_ms);
        let backoff = match config.backoff {
            BackoffKind::Fixed => Backoff::Fixed(base),
            BackoffKind::Exponential => Backoff::Exponential {
                base,
                max: Duration::from_millis(config.max_delay_ms),
            },
        };
        Self::new(config.max_retries, backoff)
    }

    /// No waiting between attempts
    pub fn immediate(max_retries: u32) -> Self {
        Self::new(max_retries, Backoff::Fixed(Duration::ZERO))
    }

    pub async fn run<F, Fut>(&self, stage: &str, history: &mut Vec<StageRecord>, mut invoke: F) -> RetryReport
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = StageOutcome>,
    {
        let total = self.max_retries + 1;
        let mut attempt = 0;

        loop {
            attempt += 1;
            match invoke(attempt).await {
                StageOutcome::Success(artifact) => {
                    return RetryReport {
                        result: Ok(artifact),
                        attempts: attempt,
                        exhausted: false,
                    };
                }
                StageOutcome::Fatal(err) => {
                    error!("{} failed with non-retryable error: {}", stage, err);
                    return RetryReport {
                        result: Err(err),
                        attempts: attempt,
                        exhausted: false,
                    };
                }
                StageOutcome::Recoverable(err) => {
                    if attempt >= total {
                        error!("{} failed after {} attempts: {}", stage, attempt, err);
                        return RetryReport {
                            result: Err(err),
                            attempts: attempt,
                            exhausted: true,
                        };
                    }

                    let delay = self.backoff.delay(attempt);
                    warn!(
                        "{} failed (attempt {}/{}): {}; retrying in {:?}",
                        stage, attempt, total, err, delay
                    );
                    history.push(StageRecord::new(stage, StageOutcomeKind::Retried, attempt).with_error(err));
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }
    }
}
