use std::sync::Arc;

use chrono::Utc;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::adapter::AdapterRegistry;
use crate::config::DispatcherConfig;
use crate::dlq::DlqManager;
use crate::error::QueueError;
use crate::queue::QueueService;
use crate::retry::RetryScheduler;
use crate::router::determine_channel;
use crate::telemetry::metric_inc;
use crate::types::{Channel, Event};

/// Result of handling one record from the main queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    Delivered,
    RetryScheduled,
    DeadLettered,
    /// Dropped without a delivery attempt.
    Discarded(DiscardReason),
    /// Delivery failed and the hand-off to the retry queue or DLQ failed too.
    Lost,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscardReason {
    /// Record could not be parsed.
    Malformed,
    /// No adapter is registered for the routed channel.
    UnknownChannel(Channel),
}

/// Consumer of the main queue.
///
/// Each record is routed, attempted once, and on failure handed to the
/// retry scheduler or the DLQ. Errors never leave an iteration.
#[derive(Clone)]
pub struct EventProcessor {
    queue: Arc<dyn QueueService>,
    adapters: Arc<AdapterRegistry>,
    retry: RetryScheduler,
    dlq: DlqManager,
    config: DispatcherConfig,
}

impl EventProcessor {
    pub fn new(
        queue: Arc<dyn QueueService>,
        adapters: Arc<AdapterRegistry>,
        retry: RetryScheduler,
        dlq: DlqManager,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            queue,
            adapters,
            retry,
            dlq,
            config,
        }
    }

    /// Run until `cancel` fires. A record already popped is fully handled
    /// before the loop checks for cancellation again.
    pub async fn run(self, cancel: CancellationToken) {
        info!(queue = %self.config.main_queue, "event processor started");

        loop {
            let popped = tokio::select! {
                _ = cancel.cancelled() => break,
                popped = self.queue.blocking_pop(&self.config.main_queue, None) => popped,
            };

            match popped {
                Ok(Some(record)) => {
                    self.process_record(&record).await;
                }
                Ok(None) => {}
                Err(err) => {
                    metric_inc("notify.queue.error");
                    error!(error = %err, "failed to pop from main queue");
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = sleep(self.config.queue_error_backoff) => {}
                    }
                }
            }
        }

        info!("event processor stopped");
    }

    /// Block until one record is available and handle it.
    pub async fn process_once(&self) -> Result<ProcessOutcome, QueueError> {
        loop {
            if let Some(record) = self.queue.blocking_pop(&self.config.main_queue, None).await? {
                return Ok(self.process_record(&record).await);
            }
        }
    }

    pub async fn process_record(&self, record: &str) -> ProcessOutcome {
        let mut event = match Event::from_record(record) {
            Ok(event) => event,
            Err(err) => {
                metric_inc("notify.delivery.discarded");
                warn!(error = %err, "discarding malformed event record");
                return ProcessOutcome::Discarded(DiscardReason::Malformed);
            }
        };

        let channel = determine_channel(&event);
        let Some(adapter) = self.adapters.get(channel) else {
            metric_inc("notify.delivery.discarded");
            error!(
                %channel,
                event_type = %event.event_type,
                user_id = %event.user_id,
                "no adapter registered for channel, discarding event"
            );
            return ProcessOutcome::Discarded(DiscardReason::UnknownChannel(channel));
        };

        event.record_attempt(Utc::now());

        let err = match adapter.send(&event.recipient, &event.message).await {
            Ok(()) => {
                metric_inc("notify.delivery.success");
                info!(
                    %channel,
                    event_type = %event.event_type,
                    user_id = %event.user_id,
                    attempt = event.attempt_count,
                    "event delivered"
                );
                return ProcessOutcome::Delivered;
            }
            Err(err) => err,
        };

        metric_inc("notify.delivery.failure");
        warn!(
            %channel,
            event_type = %event.event_type,
            user_id = %event.user_id,
            attempt = event.attempt_count,
            max_attempts = event.max_attempts,
            error = %err,
            "delivery attempt failed"
        );

        if event.should_retry() {
            let event_type = event.event_type.clone();
            match self.retry.enqueue(event, &err).await {
                Ok(()) => ProcessOutcome::RetryScheduled,
                Err(handoff) => {
                    error!(%event_type, error = %handoff, "failed to schedule retry, event lost");
                    ProcessOutcome::Lost
                }
            }
        } else {
            let event_type = event.event_type.clone();
            match self.dlq.move_to_dlq(event, &err).await {
                Ok(()) => ProcessOutcome::DeadLettered,
                Err(handoff) => {
                    error!(%event_type, error = %handoff, "failed to move event to dead letter queue, event lost");
                    ProcessOutcome::Lost
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use std::time::Duration;

    use super::*;
    use crate::adapter::NotificationAdapter;
    use crate::error::SendError;
    use crate::queue::testing::Unreliable;
    use crate::queue::{InMemoryQueue, PUSH_ATTEMPTS};

    /// Replays scripted results, then succeeds.
    struct Scripted {
        channel: Channel,
        results: Mutex<VecDeque<Result<(), SendError>>>,
        sent: Mutex<Vec<(String, String)>>,
    }

    impl Scripted {
        fn new(channel: Channel, results: Vec<Result<(), SendError>>) -> Arc<Self> {
            Arc::new(Self {
                channel,
                results: Mutex::new(results.into()),
                sent: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl NotificationAdapter for Scripted {
        fn channel(&self) -> Channel {
            self.channel
        }

        async fn send(&self, recipient: &str, message: &str) -> Result<(), SendError> {
            self.sent
                .lock()
                .unwrap()
                .push((recipient.to_string(), message.to_string()));
            self.results.lock().unwrap().pop_front().unwrap_or(Ok(()))
        }
    }

    fn processor(adapters: AdapterRegistry) -> (Arc<InMemoryQueue>, EventProcessor) {
        let queue = Arc::new(InMemoryQueue::new());
        let processor = processor_over(queue.clone(), adapters);
        (queue, processor)
    }

    fn processor_over(queue: Arc<dyn QueueService>, adapters: AdapterRegistry) -> EventProcessor {
        let config = DispatcherConfig {
            queue_error_backoff: Duration::from_millis(1),
            ..Default::default()
        };
        EventProcessor::new(
            queue.clone(),
            Arc::new(adapters),
            RetryScheduler::new(queue.clone(), config.clone()),
            DlqManager::new(queue, config.dlq_key.clone())
                .with_push_backoff(config.queue_error_backoff),
            config,
        )
    }

    fn failure() -> Result<(), SendError> {
        Err(SendError::Transport("connection reset".to_string()))
    }

    fn record(event: &Event) -> String {
        event.to_record().unwrap()
    }

    #[tokio::test]
    async fn success_leaves_no_trace() {
        let email = Scripted::new(Channel::Email, vec![]);
        let (queue, processor) = processor(AdapterRegistry::new().with_shared(email.clone()));
        let event = Event::new("u1", "signup", "hi", "a@example.com").with_severity("low");

        assert_eq!(processor.process_record(&record(&event)).await, ProcessOutcome::Delivered);

        assert_eq!(
            email.sent.lock().unwrap().as_slice(),
            &[("a@example.com".to_string(), "hi".to_string())]
        );
        assert_eq!(queue.length("retry_queue").await.unwrap(), 0);
        assert_eq!(queue.length("dlq").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn failure_with_budget_left_goes_to_retry_queue() {
        let sms = Scripted::new(Channel::Sms, vec![failure()]);
        let (queue, processor) = processor(AdapterRegistry::new().with_shared(sms));
        let event = Event::new("u1", "otp", "code 42", "+15551234567").with_severity("high");

        assert_eq!(
            processor.process_record(&record(&event)).await,
            ProcessOutcome::RetryScheduled
        );

        let parked = queue.range("retry_queue", 0, -1).await.unwrap();
        let parked = Event::from_record(&parked[0]).unwrap();
        assert_eq!(parked.attempt_count, 1);
        assert!(parked.last_attempt_at.is_some());
        assert_eq!(parked.last_error, "transport error: connection reset");
        assert_eq!(parked.created_at, event.created_at);
        assert_eq!(queue.length("dlq").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn failure_on_last_attempt_goes_to_dlq() {
        let sms = Scripted::new(Channel::Sms, vec![failure()]);
        let (queue, processor) = processor(AdapterRegistry::new().with_shared(sms));
        let mut event = Event::new("u1", "otp", "code 42", "+15551234567")
            .with_severity("high")
            .with_max_attempts(2);
        event.attempt_count = 1;

        assert_eq!(
            processor.process_record(&record(&event)).await,
            ProcessOutcome::DeadLettered
        );

        assert_eq!(queue.length("retry_queue").await.unwrap(), 0);
        let dead = queue.range("dlq", 0, -1).await.unwrap();
        let dead = Event::from_record(&dead[0]).unwrap();
        assert_eq!(dead.attempt_count, 2);
        assert!(!dead.last_error.is_empty());
    }

    #[tokio::test]
    async fn malformed_record_is_discarded() {
        let (queue, processor) = processor(AdapterRegistry::new());
        assert_eq!(
            processor.process_record("{\"message\":").await,
            ProcessOutcome::Discarded(DiscardReason::Malformed)
        );
        assert_eq!(queue.length("retry_queue").await.unwrap(), 0);
        assert_eq!(queue.length("dlq").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn record_without_created_at_is_discarded() {
        let email = Scripted::new(Channel::Email, vec![]);
        let (queue, processor) = processor(AdapterRegistry::new().with_shared(email.clone()));
        let mut value = serde_json::to_value(Event::new("u1", "signup", "hi", "a@example.com")).unwrap();
        value.as_object_mut().unwrap().remove("created_at");

        assert_eq!(
            processor.process_record(&value.to_string()).await,
            ProcessOutcome::Discarded(DiscardReason::Malformed)
        );
        assert!(email.sent.lock().unwrap().is_empty());
        assert_eq!(queue.length("dlq").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn missing_adapter_discards_without_attempt() {
        let email = Scripted::new(Channel::Email, vec![]);
        let (queue, processor) = processor(AdapterRegistry::new().with_shared(email.clone()));
        let event = Event::new("u1", "otp", "code 42", "+15551234567").with_severity("high");

        assert_eq!(
            processor.process_record(&record(&event)).await,
            ProcessOutcome::Discarded(DiscardReason::UnknownChannel(Channel::Sms))
        );
        assert!(email.sent.lock().unwrap().is_empty());
        assert_eq!(queue.length("retry_queue").await.unwrap(), 0);
        assert_eq!(queue.length("dlq").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn process_once_pops_from_main_queue() {
        let email = Scripted::new(Channel::Email, vec![]);
        let (queue, processor) = processor(AdapterRegistry::new().with_shared(email));
        let event = Event::new("u1", "signup", "hi", "a@example.com");
        queue.push("event_queue", record(&event)).await.unwrap();

        assert_eq!(processor.process_once().await.unwrap(), ProcessOutcome::Delivered);
        assert_eq!(queue.length("event_queue").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn dead_letter_push_survives_a_brief_outage() {
        let email = Scripted::new(Channel::Email, vec![failure()]);
        let queue = Arc::new(Unreliable::failing_pushes(1));
        let processor = processor_over(queue.clone(), AdapterRegistry::new().with_shared(email));
        let event = Event::new("u1", "signup", "hi", "a@example.com").with_max_attempts(1);

        assert_eq!(
            processor.process_record(&record(&event)).await,
            ProcessOutcome::DeadLettered
        );
        assert_eq!(queue.inner.length("dlq").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn failed_dead_letter_push_reports_lost() {
        let email = Scripted::new(Channel::Email, vec![failure()]);
        let queue = Arc::new(Unreliable::failing_pushes(PUSH_ATTEMPTS));
        let processor = processor_over(queue.clone(), AdapterRegistry::new().with_shared(email));
        let event = Event::new("u1", "signup", "hi", "a@example.com").with_max_attempts(1);

        assert_eq!(processor.process_record(&record(&event)).await, ProcessOutcome::Lost);
        assert_eq!(queue.inner.length("dlq").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn failed_retry_handoff_reports_lost() {
        let email = Scripted::new(Channel::Email, vec![failure()]);
        let queue = Arc::new(Unreliable::failing_pushes(PUSH_ATTEMPTS));
        let processor = processor_over(queue.clone(), AdapterRegistry::new().with_shared(email));
        let event = Event::new("u1", "signup", "hi", "a@example.com");

        assert_eq!(processor.process_record(&record(&event)).await, ProcessOutcome::Lost);
        assert_eq!(queue.inner.length("retry_queue").await.unwrap(), 0);
        assert_eq!(queue.inner.length("dlq").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn run_keeps_consuming_after_pop_error() {
        let email = Scripted::new(Channel::Email, vec![]);
        let queue = Arc::new(Unreliable::failing_pops(1));
        let processor = processor_over(queue.clone(), AdapterRegistry::new().with_shared(email.clone()));
        let event = Event::new("u1", "signup", "hi", "a@example.com");
        queue.inner.push("event_queue", record(&event)).await.unwrap();

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(processor.run(cancel.clone()));

        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        while email.sent.lock().unwrap().is_empty() {
            assert!(tokio::time::Instant::now() < deadline, "record never delivered");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(queue.pop_failures.load(std::sync::atomic::Ordering::SeqCst), 0);
        assert_eq!(queue.inner.length("event_queue").await.unwrap(), 0);

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("processor should stop")
            .unwrap();
    }
}
