//! A queue-backed email/SMS notification pipeline.
//!
//! Producers submit events, which land on a durable FIFO queue. An event
//! processor routes each one to a channel adapter and attempts delivery;
//! failures wait out an exponential backoff on a retry queue and, once
//! their attempts are spent, land in a dead-letter queue for inspection.
//!
//! ## Guarantees
//! - At-least-once delivery attempts, bounded by `max_attempts`
//! - Failed events are never silently dropped; they end in the DLQ
//! - FIFO per queue
//!
//! ## Non-Guarantees
//! - Exactly-once delivery
//! - Ordering across events, especially between retried events
//! - Delivery latency bounds
//!
//! The processor and retry scheduler share no in-process state; they
//! coordinate only through the [`QueueService`].

mod adapter;
mod adapter_email;
mod adapter_sms;
mod config;
mod dispatcher;
mod dlq;
mod error;
mod processor;
mod queue;
mod retry;
mod router;
mod telemetry;
mod types;

#[cfg(feature = "redis")]
mod queue_redis;

pub use adapter::{AdapterRegistry, NotificationAdapter};
pub use adapter_email::{EmailAdapter, EmailConfig};
pub use adapter_sms::{SmsAdapter, SmsConfig};
pub use config::{redis_url_from_env, DispatcherConfig};
pub use dispatcher::Dispatcher;
pub use dlq::{DlqManager, DlqStats, DEFAULT_DLQ_LIST_LIMIT};
pub use error::{ConfigError, DispatchError, QueueError, SendError};
pub use processor::{DiscardReason, EventProcessor, ProcessOutcome};
pub use queue::{InMemoryQueue, QueueService};
pub use retry::{backoff, RetryOutcome, RetryPolicy, RetryScheduler};
pub use router::determine_channel;
pub use types::{Channel, Event, IngestRequest, Submission, DEFAULT_MAX_ATTEMPTS};

#[cfg(feature = "redis")]
pub use queue_redis::RedisQueue;
