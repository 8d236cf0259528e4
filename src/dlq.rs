use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use crate::error::QueueError;
use crate::queue::{push_retrying, QueueService, PUSH_ATTEMPTS};
use crate::telemetry::metric_inc;
use crate::types::Event;

/// Listing size used by the operational read API when none is given.
pub const DEFAULT_DLQ_LIST_LIMIT: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DlqStats {
    pub size: u64,
}

/// Durable record of events that exhausted their attempts.
///
/// Entries are pushed onto the head of the DLQ list, so listings come back
/// most recent first. Nothing here removes entries.
#[derive(Clone)]
pub struct DlqManager {
    queue: Arc<dyn QueueService>,
    key: String,
    push_backoff: Duration,
}

impl DlqManager {
    pub fn new(queue: Arc<dyn QueueService>, key: impl Into<String>) -> Self {
        Self {
            queue,
            key: key.into(),
            push_backoff: Duration::from_secs(1),
        }
    }

    /// Pause between tries when the DLQ push fails.
    pub fn with_push_backoff(mut self, backoff: Duration) -> Self {
        self.push_backoff = backoff;
        self
    }

    /// Dead-letter `event` with its final error.
    ///
    /// A record that cannot be serialized is logged and dropped. The push is
    /// retried on queue errors; the last error is returned once the tries
    /// run out so the caller can report the lost event.
    pub async fn move_to_dlq(&self, mut event: Event, final_error: impl fmt::Display) -> Result<(), QueueError> {
        event.last_error = final_error.to_string();
        event.last_attempt_at = Some(Utc::now());

        let record = match event.to_record() {
            Ok(record) => record,
            Err(err) => {
                error!(
                    event_type = %event.event_type,
                    user_id = %event.user_id,
                    error = %err,
                    "failed to serialize event for dead letter queue"
                );
                return Ok(());
            }
        };

        push_retrying(
            self.queue.as_ref(),
            &self.key,
            record,
            PUSH_ATTEMPTS,
            self.push_backoff,
        )
        .await?;

        metric_inc("notify.dlq.inserted");
        warn!(
            event_type = %event.event_type,
            user_id = %event.user_id,
            attempts = event.attempt_count,
            error = %event.last_error,
            "event moved to dead letter queue"
        );
        Ok(())
    }

    pub async fn stats(&self) -> Result<DlqStats, QueueError> {
        Ok(DlqStats {
            size: self.queue.length(&self.key).await?,
        })
    }

    /// Up to `limit` entries, most recent first. Unparseable entries are
    /// skipped.
    pub async fn list_events(&self, limit: usize) -> Result<Vec<Event>, QueueError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let stop = i64::try_from(limit).unwrap_or(i64::MAX) - 1;
        let records = self.queue.range(&self.key, 0, stop).await?;

        Ok(records
            .iter()
            .filter_map(|record| match Event::from_record(record) {
                Ok(event) => Some(event),
                Err(err) => {
                    warn!(error = %err, "skipping malformed dead letter record");
                    None
                }
            })
            .collect())
    }
}
