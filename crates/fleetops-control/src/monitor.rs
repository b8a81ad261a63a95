//! Transaction completion polling.
//!
//! [`TransactionMonitor::await_completion`] polls the provider until the
//! instance has no active transaction or the wait bound is reached. The wait
//! suspends only the calling task; monitors for other instances keep running.
//! A [`CancellationToken`] is honoured between polls.

use std::sync::Arc;
use std::time::Duration;

use fleetops_core::InstanceId;
use fleetops_provider::{ProviderClient, TransactionStatus};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{ControlError, Result};

/// Longest wait the monitor will honour; longer bounds are clamped.
pub const MAX_WAIT_LIMIT: Duration = Duration::from_secs(24 * 60 * 60);

/// Largest backoff factor the monitor will apply.
pub const MAX_BACKOFF_FACTOR: f64 = 10.0;

/// Polling schedule for a single wait.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PollSettings {
    /// Delay before the first re-poll.
    pub poll_interval: Duration,
    /// Hard upper bound on the wait, clamped to [`MAX_WAIT_LIMIT`].
    pub max_wait: Duration,
    /// Multiplier applied to the interval after each pending poll. Values
    /// are clamped to `1.0..=MAX_BACKOFF_FACTOR`; NaN counts as 1.0.
    pub backoff_factor: f64,
    /// Ceiling for the grown interval.
    pub max_poll_interval: Duration,
}

impl PollSettings {
    /// A fixed-interval schedule.
    #[must_use]
    pub fn fixed(poll_interval: Duration, max_wait: Duration) -> Self {
        Self {
            poll_interval,
            max_wait,
            backoff_factor: 1.0,
            max_poll_interval: poll_interval,
        }
    }

    fn next_interval(&self, current: Duration) -> Duration {
        let factor = self.backoff_factor.clamp(1.0, MAX_BACKOFF_FACTOR);
        let factor = if factor.is_nan() { 1.0 } else { factor };
        let ceiling = self.max_poll_interval.max(self.poll_interval);
        Duration::try_from_secs_f64(current.as_secs_f64() * factor)
            .map_or(ceiling, |next| next.min(ceiling))
    }
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(10),
            max_wait: Duration::from_secs(60),
            backoff_factor: 1.0,
            max_poll_interval: Duration::from_secs(30),
        }
    }
}

/// Polls the provider for transaction completion.
#[derive(Clone)]
pub struct TransactionMonitor {
    provider: Arc<dyn ProviderClient>,
    settings: PollSettings,
}

impl TransactionMonitor {
    /// Create a monitor with the given default schedule.
    #[must_use]
    pub fn new(provider: Arc<dyn ProviderClient>, settings: PollSettings) -> Self {
        Self { provider, settings }
    }

    /// The default schedule.
    #[must_use]
    pub const fn settings(&self) -> &PollSettings {
        &self.settings
    }

    /// Wait for `id` using the default schedule.
    ///
    /// # Errors
    ///
    /// See [`Self::await_with`].
    pub async fn await_completion(
        &self,
        id: InstanceId,
        cancel: &CancellationToken,
    ) -> Result<TransactionStatus> {
        self.await_with(id, &self.settings, cancel).await
    }

    /// Wait for `id` until the provider reports `Ready` or `settings.max_wait`
    /// elapses.
    ///
    /// Returns `Ready` or `TimedOut`. Timing out changes nothing provider-side.
    /// Transient status errors count as a pending poll.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::WaitAborted` if `cancel` fires, and the
    /// classified provider error if a status poll fails fatally.
    pub async fn await_with(
        &self,
        id: InstanceId,
        settings: &PollSettings,
        cancel: &CancellationToken,
    ) -> Result<TransactionStatus> {
        let started = Instant::now();
        let max_wait = settings.max_wait.min(MAX_WAIT_LIMIT);
        let deadline = started.checked_add(max_wait).unwrap_or(started);
        let mut interval = settings.poll_interval;
        let mut polls: u32 = 0;

        loop {
            if cancel.is_cancelled() {
                return Err(ControlError::WaitAborted { instance_id: id });
            }

            polls += 1;
            match self.provider.get_transaction_status(id).await {
                Ok(TransactionStatus::Ready) => {
                    tracing::debug!(
                        instance_id = %id,
                        polls,
                        elapsed_ms = started.elapsed().as_millis(),
                        "Transaction complete"
                    );
                    return Ok(TransactionStatus::Ready);
                }
                Ok(status) => {
                    tracing::debug!(instance_id = %id, polls, ?status, "Transaction pending");
                }
                Err(e) if e.is_retriable() => {
                    tracing::warn!(instance_id = %id, polls, error = %e, "Transient error while polling");
                }
                Err(e) => return Err(ControlError::provider(format!("#{id}"), e)),
            }

            let now = Instant::now();
            if now >= deadline {
                tracing::warn!(
                    instance_id = %id,
                    polls,
                    max_wait_secs = max_wait.as_secs(),
                    "Transaction still pending at wait bound"
                );
                return Ok(TransactionStatus::TimedOut);
            }

            let sleep_for = interval.min(deadline - now);
            tokio::select! {
                () = cancel.cancelled() => {
                    tracing::info!(instance_id = %id, polls, "Wait aborted");
                    return Err(ControlError::WaitAborted { instance_id: id });
                }
                () = tokio::time::sleep(sleep_for) => {}
            }
            interval = settings.next_interval(interval);
        }
    }
}
