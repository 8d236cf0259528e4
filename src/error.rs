use thiserror::Error;

use crate::types::Channel;

/// Failures of the queue backend.
///
/// Every queue error is treated as transient: loops log it, back off and
/// try again.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue backend unavailable: {0}")]
    Unavailable(String),

    #[cfg(feature = "redis")]
    #[error(transparent)]
    Redis(#[from] redis::RedisError),
}

/// Failure reported by a notification adapter for one send attempt.
///
/// All variants drive the retry path; the pipeline does not distinguish
/// permanent provider errors from transient ones.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SendError {
    /// Provider answered with a non-success status.
    #[error("provider rejected message ({status}): {body}")]
    Rejected { status: u16, body: String },

    /// Request never completed.
    #[error("transport error: {0}")]
    Transport(String),

    /// Adapter is missing credentials or other settings.
    #[error("adapter misconfigured: {0}")]
    Misconfigured(String),
}

/// Errors returned to producers when ingestion fails.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The event routes to a channel with no registered adapter.
    #[error("unknown channel: {channel}")]
    UnknownChannel { channel: Channel },

    #[error("failed to serialize event: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("failed to enqueue event: {0}")]
    Queue(#[from] QueueError),

    /// Dispatcher has been shut down.
    #[error("dispatcher is shut down")]
    Shutdown,
}

/// Invalid or missing configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unknown channel name: {0}")]
    UnknownChannel(String),

    #[error("missing configuration value: {0}")]
    Missing(&'static str),

    #[error("invalid value for {key}: {value}")]
    Invalid { key: &'static str, value: String },
}
