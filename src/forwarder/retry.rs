//! # Retry with backoff
//!
//! [`RetryingForwarder`] wraps another [`Forwarder`] and re-attempts
//! retryable failures (transport errors, timeouts, 5xx and 429 when status
//! failures are enabled) according to a [`RetryPolicy`]. Attempts are logged
//! against the event's `event_id`, so every retry of one event can be
//! correlated in the logs.
//!
//! Backoff sleeps race the pipeline's cancellation token: once shutdown
//! starts the wrapper returns the last error instead of sleeping.

use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{ForwardResponse, Forwarder};
use crate::error::Result;
use crate::events::NotificationEvent;

/// Strategy for calculating retry delays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Same delay before every retry
    Fixed,
    /// Delay grows by `base_delay` per failed attempt
    Linear,
    /// Delay doubles per failed attempt
    #[default]
    Exponential,
}

/// How failed forwards are retried
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first; `1` disables retries
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Randomization (0.0 to 1.0) applied as +/- a fraction of the delay
    pub jitter_factor: f64,
    pub backoff_strategy: BackoffStrategy,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            jitter_factor: 0.1,
            backoff_strategy: BackoffStrategy::Exponential,
        }
    }
}

impl RetryPolicy {
    /// Single attempt, no retries
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    /// Whether another attempt is allowed after `attempt` (1-based) failed
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// Delay before the retry that follows failed attempt `attempt` (1-based),
    /// before jitter and capped at `max_delay`
    pub fn base_delay_for(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        let delay = match self.backoff_strategy {
            BackoffStrategy::Fixed => self.base_delay,
            BackoffStrategy::Linear => self.base_delay.saturating_mul(attempt),
            BackoffStrategy::Exponential => {
                let exponent = (attempt - 1).min(20);
                self.base_delay.saturating_mul(2_u32.saturating_pow(exponent))
            }
        };

        delay.min(self.max_delay)
    }

    /// Jittered delay before the retry that follows failed attempt `attempt`
    pub fn delay_for(&self, attempt: u32) -> Duration {
        apply_jitter(self.base_delay_for(attempt), self.jitter_factor).min(self.max_delay)
    }
}

/// Randomize a delay by +/- `jitter_factor` of its length
fn apply_jitter(duration: Duration, jitter_factor: f64) -> Duration {
    if jitter_factor <= 0.0 || duration.is_zero() {
        return duration;
    }

    let jitter_range = duration.as_secs_f64() * jitter_factor.clamp(0.0, 1.0);
    let offset = rand::rng().random_range(-jitter_range..=jitter_range);

    Duration::from_secs_f64((duration.as_secs_f64() + offset).max(0.0))
}

/// Forwarder wrapper that retries retryable failures with backoff
#[derive(Debug)]
pub struct RetryingForwarder<F> {
    inner: F,
    policy: RetryPolicy,
    cancel: CancellationToken,
}

impl<F: Forwarder> RetryingForwarder<F> {
    /// Wrap `inner`; backoff sleeps are never interrupted
    pub fn new(inner: F, policy: RetryPolicy) -> Self {
        Self::with_cancellation(inner, policy, CancellationToken::new())
    }

    /// Wrap `inner`; backoff sleeps end early when `cancel` fires
    pub fn with_cancellation(inner: F, policy: RetryPolicy, cancel: CancellationToken) -> Self {
        Self {
            inner,
            policy,
            cancel,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn inner(&self) -> &F {
        &self.inner
    }
}

#[async_trait]
impl<F: Forwarder> Forwarder for RetryingForwarder<F> {
    async fn forward(&self, event: &NotificationEvent) -> Result<ForwardResponse> {
        let started = Instant::now();
        let mut attempt = 1;

        loop {
            let error = match self.inner.forward(event).await {
                Ok(response) => {
                    if attempt > 1 {
                        debug!(
                            event_id = %event.event_id,
                            attempt = attempt,
                            "Forward succeeded after retry"
                        );
                    }
                    return Ok(ForwardResponse {
                        status: response.status,
                        duration: started.elapsed(),
                    });
                }
                Err(error) => error,
            };

            if !error.is_retryable() || !self.policy.should_retry(attempt) {
                return Err(error);
            }

            let delay = self.policy.delay_for(attempt);
            warn!(
                event_id = %event.event_id,
                sequence = event.sequence,
                attempt = attempt,
                max_attempts = self.policy.max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Forward failed, retrying"
            );

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.cancel.cancelled() => {
                    debug!(
                        event_id = %event.event_id,
                        attempt = attempt,
                        "Shutdown during backoff, giving up on event"
                    );
                    return Err(error);
                }
            }

            attempt += 1;
        }
    }
}
