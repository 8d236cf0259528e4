use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;
use crate::retry::RetryPolicy;

pub const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379/0";
pub const DEFAULT_MAIN_QUEUE: &str = "event_queue";
pub const DEFAULT_RETRY_QUEUE: &str = "retry_queue";
pub const DEFAULT_DLQ_KEY: &str = "dlq";

/// Runtime settings for the pipeline loops.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Queue consumed by the event processor.
    pub main_queue: String,

    /// Queue holding events that wait out their backoff.
    pub retry_queue: String,

    /// List holding dead-lettered events.
    pub dlq_key: String,

    /// Bounded wait of the retry scheduler's pop.
    pub retry_poll_timeout: Duration,

    /// Pause after pushing back an event that is not ready yet.
    pub retry_requeue_delay: Duration,

    /// Pause after a failed queue operation before the loop tries again.
    pub queue_error_backoff: Duration,

    pub retry_policy: RetryPolicy,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            main_queue: DEFAULT_MAIN_QUEUE.to_string(),
            retry_queue: DEFAULT_RETRY_QUEUE.to_string(),
            dlq_key: DEFAULT_DLQ_KEY.to_string(),
            retry_poll_timeout: Duration::from_secs(1),
            retry_requeue_delay: Duration::from_millis(100),
            queue_error_backoff: Duration::from_secs(1),
            retry_policy: RetryPolicy::default(),
        }
    }
}

impl DispatcherConfig {
    /// Read `NOTIFY_*` overrides from the process environment.
    ///
    /// Call `dotenvy::dotenv()` first to pick up a `.env` file.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup; unset keys keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let millis = |key: &'static str, default: Duration| -> Result<Duration, ConfigError> {
            parse_or(&lookup, key, default.as_millis() as u64).map(Duration::from_millis)
        };

        let retry_policy = RetryPolicy::new(
            millis("NOTIFY_RETRY_BASE_MS", defaults.retry_policy.base)?,
            millis("NOTIFY_RETRY_MAX_BACKOFF_MS", defaults.retry_policy.max_backoff)?,
        );

        Ok(Self {
            main_queue: lookup("NOTIFY_MAIN_QUEUE").unwrap_or(defaults.main_queue),
            retry_queue: lookup("NOTIFY_RETRY_QUEUE").unwrap_or(defaults.retry_queue),
            dlq_key: lookup("NOTIFY_DLQ_KEY").unwrap_or(defaults.dlq_key),
            retry_poll_timeout: millis(
                "NOTIFY_RETRY_POLL_TIMEOUT_MS",
                defaults.retry_poll_timeout,
            )?,
            retry_requeue_delay: millis(
                "NOTIFY_RETRY_REQUEUE_DELAY_MS",
                defaults.retry_requeue_delay,
            )?,
            queue_error_backoff: millis(
                "NOTIFY_QUEUE_ERROR_BACKOFF_MS",
                defaults.queue_error_backoff,
            )?,
            retry_policy,
        })
    }
}

/// Redis connection URL from `NOTIFY_REDIS_URL`.
pub fn redis_url_from_env() -> String {
    std::env::var("NOTIFY_REDIS_URL").unwrap_or_else(|_| DEFAULT_REDIS_URL.to_string())
}

pub(crate) fn parse_or<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value }),
    }
}

pub(crate) fn required<F>(lookup: &F, key: &'static str) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .filter(|v| !v.is_empty())
        .ok_or(ConfigError::Missing(key))
}
