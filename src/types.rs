use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Attempts granted to an event whose producer did not set `max_attempts`.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

/// Delivery medium for a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Email,
    Sms,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Email => "email",
            Channel::Sms => "sms",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Channel {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "email" => Ok(Channel::Email),
            "sms" => Ok(Channel::Sms),
            other => Err(ConfigError::UnknownChannel(other.to_string())),
        }
    }
}

/// Unit of work carried through the delivery pipeline.
///
/// An event travels between queues as a flat JSON record (see
/// [`Event::to_record`]). The processing metadata (`attempt_count`,
/// `last_error`, `last_attempt_at`) is mutated in place by whichever
/// routine currently owns the event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Opaque user or tenant identifier.
    #[serde(default)]
    pub user_id: String,

    /// Free-form category, used for logging and DLQ inspection.
    #[serde(default)]
    pub event_type: String,

    /// Payload body handed to the adapter.
    pub message: String,

    /// Drives channel routing; `"high"` goes out as SMS.
    #[serde(default)]
    pub severity: String,

    /// Channel-specific address: email address or phone number.
    pub recipient: String,

    /// Delivery attempts made so far.
    #[serde(default)]
    pub attempt_count: u32,

    /// Attempts allowed before the event is dead-lettered.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Error from the most recent failed attempt, empty until one occurs.
    #[serde(default)]
    pub last_error: String,

    /// Set once at ingestion.
    pub created_at: DateTime<Utc>,

    /// Refreshed on every delivery attempt; absent before the first one.
    #[serde(default)]
    pub last_attempt_at: Option<DateTime<Utc>>,
}

impl Event {
    /// Create a fresh event with no attempts recorded.
    pub fn new(
        user_id: impl Into<String>,
        event_type: impl Into<String>,
        message: impl Into<String>,
        recipient: impl Into<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            event_type: event_type.into(),
            message: message.into(),
            severity: String::new(),
            recipient: recipient.into(),
            attempt_count: 0,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            last_error: String::new(),
            created_at: Utc::now(),
            last_attempt_at: None,
        }
    }

    /// Build the event for an accepted ingestion request.
    pub fn from_request(request: IngestRequest, now: DateTime<Utc>) -> Self {
        let max_attempts = request.effective_max_attempts();
        Self {
            user_id: request.user_id,
            event_type: request.event_type,
            message: request.message,
            severity: request.severity,
            recipient: request.recipient,
            attempt_count: 0,
            max_attempts,
            last_error: String::new(),
            created_at: now,
            last_attempt_at: None,
        }
    }

    pub fn with_severity(mut self, severity: impl Into<String>) -> Self {
        self.severity = severity.into();
        self
    }

    /// Set the attempt budget. Zero is raised to one.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Whether another delivery attempt is allowed.
    pub fn should_retry(&self) -> bool {
        self.attempt_count < self.max_attempts
    }

    /// Count a delivery attempt made at `now`.
    pub fn record_attempt(&mut self, now: DateTime<Utc>) {
        self.attempt_count = self.attempt_count.saturating_add(1);
        self.last_attempt_at = Some(now);
    }

    /// Serialize into the record stored on the queues.
    pub fn to_record(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Parse a record popped from a queue.
    pub fn from_record(record: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(record)
    }
}

/// Producer-facing request accepted at ingestion.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IngestRequest {
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub event_type: String,
    pub message: String,
    #[serde(default)]
    pub severity: String,
    pub recipient: String,
    /// Zero or absent means [`DEFAULT_MAX_ATTEMPTS`].
    #[serde(default)]
    pub max_attempts: Option<u32>,
}

impl IngestRequest {
    pub fn new(message: impl Into<String>, recipient: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            recipient: recipient.into(),
            ..Default::default()
        }
    }

    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = user_id.into();
        self
    }

    pub fn with_event_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_type = event_type.into();
        self
    }

    pub fn with_severity(mut self, severity: impl Into<String>) -> Self {
        self.severity = severity.into();
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    pub(crate) fn effective_max_attempts(&self) -> u32 {
        match self.max_attempts {
            Some(0) | None => DEFAULT_MAX_ATTEMPTS,
            Some(n) => n,
        }
    }
}

/// Receipt returned for an accepted ingestion request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Submission {
    pub channel: Channel,
    pub max_attempts: u32,
}
