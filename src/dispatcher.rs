use std::sync::Arc;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::adapter::AdapterRegistry;
use crate::config::DispatcherConfig;
use crate::dlq::{DlqManager, DlqStats};
use crate::error::{DispatchError, QueueError};
use crate::processor::EventProcessor;
use crate::queue::{InMemoryQueue, QueueService};
use crate::retry::RetryScheduler;
use crate::router::channel_for_severity;
use crate::telemetry::metric_inc;
use crate::types::{Event, IngestRequest, Submission};

/// Owns the pipeline: accepts submissions, runs the event processor and
/// retry scheduler as background tasks and serves DLQ reads.
///
/// Both loops start on construction, so a tokio runtime must be running.
pub struct Dispatcher {
    queue: Arc<dyn QueueService>,
    adapters: Arc<AdapterRegistry>,
    config: DispatcherConfig,
    dlq: DlqManager,
    cancel: CancellationToken,
    processor_handle: Option<JoinHandle<()>>,
    scheduler_handle: Option<JoinHandle<()>>,
}

impl Dispatcher {
    /// Dispatcher over an in-process queue.
    pub fn new(adapters: AdapterRegistry, config: DispatcherConfig) -> Self {
        Self::with_queue(Arc::new(InMemoryQueue::new()), adapters, config)
    }

    pub fn with_queue(
        queue: Arc<dyn QueueService>,
        adapters: AdapterRegistry,
        config: DispatcherConfig,
    ) -> Self {
        let adapters = Arc::new(adapters);
        let cancel = CancellationToken::new();
        let dlq = DlqManager::new(queue.clone(), config.dlq_key.clone())
            .with_push_backoff(config.queue_error_backoff);
        let retry = RetryScheduler::new(queue.clone(), config.clone());
        let processor = EventProcessor::new(
            queue.clone(),
            adapters.clone(),
            retry.clone(),
            dlq.clone(),
            config.clone(),
        );

        let processor_handle = tokio::spawn(processor.run(cancel.child_token()));
        let scheduler_handle = tokio::spawn(retry.run(cancel.child_token()));

        info!(
            channels = ?adapters.channels(),
            main_queue = %config.main_queue,
            retry_queue = %config.retry_queue,
            dlq = %config.dlq_key,
            "dispatcher started"
        );

        Self {
            queue,
            adapters,
            config,
            dlq,
            cancel,
            processor_handle: Some(processor_handle),
            scheduler_handle: Some(scheduler_handle),
        }
    }

    /// Validate a producer request and queue it for delivery.
    pub async fn submit(&self, request: IngestRequest) -> Result<Submission, DispatchError> {
        if !self.is_running() {
            return Err(DispatchError::Shutdown);
        }

        let channel = channel_for_severity(&request.severity);
        if !self.adapters.contains(channel) {
            metric_inc("notify.ingest.rejected");
            warn!(%channel, event_type = %request.event_type, "rejecting event for unregistered channel");
            return Err(DispatchError::UnknownChannel { channel });
        }

        let event = Event::from_request(request, Utc::now());
        let record = event.to_record()?;
        self.queue.push(&self.config.main_queue, record).await?;

        metric_inc("notify.ingest.accepted");
        info!(
            %channel,
            event_type = %event.event_type,
            user_id = %event.user_id,
            max_attempts = event.max_attempts,
            "event queued"
        );
        Ok(Submission {
            channel,
            max_attempts: event.max_attempts,
        })
    }

    pub async fn dlq_stats(&self) -> Result<DlqStats, QueueError> {
        self.dlq.stats().await
    }

    /// Most recent dead-lettered events first, at most `limit`.
    pub async fn dlq_events(&self, limit: usize) -> Result<Vec<Event>, QueueError> {
        self.dlq.list_events(limit).await
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        !self.cancel.is_cancelled()
    }

    /// Stop both loops and wait for them to finish their current step.
    pub async fn shutdown(&mut self) {
        self.cancel.cancel();

        if let Some(handle) = self.processor_handle.take() {
            let _ = handle.await;
        }
        if let Some(handle) = self.scheduler_handle.take() {
            let _ = handle.await;
        }
        info!("dispatcher stopped");
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
