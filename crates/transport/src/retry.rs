//! Reconnect policy
//!
//! Bounded exponential backoff for channel opens. The orchestrator
//! subscribes to the emitted events for observability; the inter-attempt
//! delay is cancellable so a dropped consumer never leaves a sleeping
//! task behind.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;

use readaloud_core::{Error, Result};

/// Reconnect policy parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum connection attempts before giving up
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Delay before the first retry, in milliseconds
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    /// Ceiling on the inter-attempt delay, in milliseconds
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Multiplier applied to the delay after each failed attempt
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: u32,
}

fn default_max_retries() -> u32 {
    3
}
fn default_initial_delay_ms() -> u64 {
    1_000
}
fn default_max_delay_ms() -> u64 {
    10_000
}
fn default_backoff_factor() -> u32 {
    2
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_factor: default_backoff_factor(),
        }
    }
}

/// Events emitted while the policy runs
#[derive(Debug, Clone)]
pub enum RetryEvent {
    /// About to run attempt `attempt` (1-based) after waiting `delay`
    Attempt { attempt: u32, delay: Duration },
    /// An attempt succeeded
    Success { attempts: u32, elapsed: Duration },
    /// The policy gave up
    Failure { attempts: u32, elapsed: Duration },
    /// The policy was cancelled while waiting
    Abort { reason: String },
}

impl RetryPolicy {
    /// Run `operation` until it succeeds, fails non-transiently, or
    /// `max_retries` attempts have failed.
    ///
    /// The delay starts at `initial_delay_ms` and is multiplied by
    /// `backoff_factor` after each wait, capped at `max_delay_ms`.
    /// Cancelling `cancel` during a wait aborts the policy.
    pub async fn execute<T, F, Fut>(
        &self,
        cancel: &CancellationToken,
        events: Option<&mpsc::Sender<RetryEvent>>,
        mut operation: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let start = Instant::now();
        let mut failed_attempts = 0u32;
        let mut delay = Duration::from_millis(self.initial_delay_ms);
        let mut waited = Duration::ZERO;

        loop {
            emit(
                events,
                RetryEvent::Attempt {
                    attempt: failed_attempts + 1,
                    delay: waited,
                },
            )
            .await;

            match operation().await {
                Ok(value) => {
                    emit(
                        events,
                        RetryEvent::Success {
                            attempts: failed_attempts + 1,
                            elapsed: start.elapsed(),
                        },
                    )
                    .await;
                    return Ok(value);
                }
                Err(err) if !err.is_transient() => {
                    emit(
                        events,
                        RetryEvent::Failure {
                            attempts: failed_attempts + 1,
                            elapsed: start.elapsed(),
                        },
                    )
                    .await;
                    return Err(err);
                }
                Err(err) => {
                    failed_attempts += 1;
                    tracing::warn!(
                        attempt = failed_attempts,
                        max_retries = self.max_retries,
                        error = %err,
                        "connection attempt failed"
                    );
                    if failed_attempts >= self.max_retries {
                        emit(
                            events,
                            RetryEvent::Failure {
                                attempts: failed_attempts,
                                elapsed: start.elapsed(),
                            },
                        )
                        .await;
                        return Err(err);
                    }

                    tokio::select! {
                        _ = sleep(delay) => {}
                        _ = cancel.cancelled() => {
                            emit(
                                events,
                                RetryEvent::Abort {
                                    reason: "cancelled while waiting to reconnect".to_string(),
                                },
                            )
                            .await;
                            return Err(Error::WebSocket("reconnect cancelled".to_string()));
                        }
                    }
                    waited = delay;
                    delay = (delay * self.backoff_factor).min(Duration::from_millis(self.max_delay_ms));
                }
            }
        }
    }
}

async fn emit(events: Option<&mpsc::Sender<RetryEvent>>, event: RetryEvent) {
    if let Some(tx) = events {
        let _ = tx.send(event).await;
    }
}
