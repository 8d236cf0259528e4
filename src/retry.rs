//! Exponential backoff and the retry loop.
//!
//! Failed events wait on the retry queue until their backoff window has
//! elapsed, then go back onto the main queue. The loop pops with a bounded
//! wait, pushes not-yet-ready records back onto the retry queue unchanged
//! and pauses briefly so a single waiting event does not spin the loop.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::DispatcherConfig;
use crate::error::{DispatchError, QueueError};
use crate::queue::{push_retrying, QueueService, PUSH_ATTEMPTS};
use crate::telemetry::metric_inc;
use crate::types::Event;

/// `min(base * 2^attempt_count, max_backoff)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            max_backoff: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    pub fn new(base: Duration, max_backoff: Duration) -> Self {
        Self { base, max_backoff }
    }

    /// Wait required after the `attempt_count`-th failed attempt.
    pub fn delay_for(&self, attempt_count: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt_count).unwrap_or(u32::MAX);
        self.base
            .checked_mul(factor)
            .unwrap_or(Duration::MAX)
            .min(self.max_backoff)
    }
}

/// Default backoff: `min(2^attempt_count, 60)` seconds.
pub fn backoff(attempt_count: u32) -> Duration {
    RetryPolicy::default().delay_for(attempt_count)
}

/// What one pass over the retry queue did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryOutcome {
    /// Nothing arrived within the poll timeout.
    Empty,
    /// Backoff window still open; record pushed back onto the retry queue.
    NotReady,
    /// Window elapsed; record moved to the main queue.
    Requeued,
    /// Record could not be parsed and was dropped.
    Discarded,
}

/// Holds failed events back until their backoff window elapses.
#[derive(Clone)]
pub struct RetryScheduler {
    queue: Arc<dyn QueueService>,
    config: DispatcherConfig,
}

impl RetryScheduler {
    pub fn new(queue: Arc<dyn QueueService>, config: DispatcherConfig) -> Self {
        Self { queue, config }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.config.retry_policy
    }

    /// Park a failed event on the retry queue.
    ///
    /// Records `error` as the event's last error. The attempt count is left
    /// alone; only the event processor counts attempts.
    pub async fn enqueue(&self, mut event: Event, error: impl fmt::Display) -> Result<(), DispatchError> {
        event.last_error = error.to_string();
        let record = event.to_record()?;

        push_retrying(
            self.queue.as_ref(),
            &self.config.retry_queue,
            record,
            PUSH_ATTEMPTS,
            self.config.queue_error_backoff,
        )
        .await?;

        metric_inc("notify.retry.scheduled");
        info!(
            event_type = %event.event_type,
            user_id = %event.user_id,
            attempt = event.attempt_count,
            max_attempts = event.max_attempts,
            backoff_ms = self.config.retry_policy.delay_for(event.attempt_count).as_millis() as u64,
            error = %event.last_error,
            "retry scheduled"
        );
        Ok(())
    }

    /// Run until `cancel` fires.
    pub async fn run(self, cancel: CancellationToken) {
        info!(queue = %self.config.retry_queue, "retry scheduler started");

        loop {
            let popped = tokio::select! {
                _ = cancel.cancelled() => break,
                popped = self.queue.blocking_pop(
                    &self.config.retry_queue,
                    Some(self.config.retry_poll_timeout),
                ) => popped,
            };

            let outcome = match popped {
                Ok(Some(record)) => self.handle_record(record).await,
                Ok(None) => Ok(RetryOutcome::Empty),
                Err(err) => Err(err),
            };

            let pause = match outcome {
                Ok(RetryOutcome::NotReady) => self.config.retry_requeue_delay,
                Ok(_) => continue,
                Err(err) => {
                    metric_inc("notify.queue.error");
                    error!(error = %err, "retry scheduler queue operation failed");
                    self.config.queue_error_backoff
                }
            };

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = sleep(pause) => {}
            }
        }

        info!("retry scheduler stopped");
    }

    /// Pop one record (bounded wait) and act on it.
    pub async fn poll_once(&self) -> Result<RetryOutcome, QueueError> {
        match self
            .queue
            .blocking_pop(&self.config.retry_queue, Some(self.config.retry_poll_timeout))
            .await?
        {
            Some(record) => self.handle_record(record).await,
            None => Ok(RetryOutcome::Empty),
        }
    }

    async fn handle_record(&self, record: String) -> Result<RetryOutcome, QueueError> {
        let event = match Event::from_record(&record) {
            Ok(event) => event,
            Err(err) => {
                metric_inc("notify.retry.discarded");
                warn!(error = %err, "discarding malformed retry record");
                return Ok(RetryOutcome::Discarded);
            }
        };

        let target = self.config.retry_policy.delay_for(event.attempt_count);
        let (queue, outcome) = if is_ready(&event, target, Utc::now()) {
            (&self.config.main_queue, RetryOutcome::Requeued)
        } else {
            (&self.config.retry_queue, RetryOutcome::NotReady)
        };

        if let Err(err) = push_retrying(
            self.queue.as_ref(),
            queue,
            record,
            PUSH_ATTEMPTS,
            self.config.queue_error_backoff,
        )
        .await
        {
            error!(
                event_type = %event.event_type,
                user_id = %event.user_id,
                attempt = event.attempt_count,
                error = %err,
                "failed to move retry record, event lost"
            );
            return Err(err);
        }

        if outcome == RetryOutcome::Requeued {
            metric_inc("notify.retry.requeued");
            info!(
                event_type = %event.event_type,
                user_id = %event.user_id,
                next_attempt = event.attempt_count + 1,
                max_attempts = event.max_attempts,
                "retry window elapsed, event requeued"
            );
        }
        Ok(outcome)
    }
}

/// Whether `target` has passed since the event's last attempt.
/// An event that was never attempted is always ready.
fn is_ready(event: &Event, target: Duration, now: DateTime<Utc>) -> bool {
    let Some(last_attempt_at) = event.last_attempt_at else {
        return true;
    };
    let elapsed = (now - last_attempt_at).to_std().unwrap_or(Duration::ZERO);
    elapsed >= target
}
