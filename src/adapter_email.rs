//! Email delivery through an HTTP mail-sending API (Mailtrap-compatible).

use std::time::Duration;

use async_trait::async_trait;

use crate::adapter::NotificationAdapter;
use crate::config::{parse_or, required};
use crate::error::{ConfigError, SendError};
use crate::types::Channel;

pub const DEFAULT_EMAIL_API_URL: &str = "https://send.api.mailtrap.io/api/send";
pub const DEFAULT_EMAIL_SUBJECT: &str = "Notification";

#[derive(Debug, Clone)]
pub struct EmailConfig {
    pub api_url: String,
    pub api_token: String,
    pub from_address: String,
    pub subject: String,
    pub timeout: Duration,
}

impl EmailConfig {
    pub fn new(api_token: impl Into<String>, from_address: impl Into<String>) -> Self {
        Self {
            api_url: DEFAULT_EMAIL_API_URL.to_string(),
            api_token: api_token.into(),
            from_address: from_address.into(),
            subject: DEFAULT_EMAIL_SUBJECT.to_string(),
            timeout: Duration::from_secs(10),
        }
    }

    /// Read `EMAIL_API_URL`, `EMAIL_API_TOKEN`, `EMAIL_FROM`, `EMAIL_SUBJECT`
    /// and `EMAIL_TIMEOUT_MS`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::new(
            required(&lookup, "EMAIL_API_TOKEN")?,
            required(&lookup, "EMAIL_FROM")?,
        );
        if let Some(url) = lookup("EMAIL_API_URL") {
            config.api_url = url;
        }
        if let Some(subject) = lookup("EMAIL_SUBJECT") {
            config.subject = subject;
        }
        config.timeout = Duration::from_millis(parse_or(&lookup, "EMAIL_TIMEOUT_MS", 10_000)?);
        Ok(config)
    }
}

pub struct EmailAdapter {
    config: EmailConfig,
    #[cfg(feature = "http")]
    client: reqwest::Client,
}

impl EmailAdapter {
    pub fn new(config: EmailConfig) -> Self {
        Self {
            config,
            #[cfg(feature = "http")]
            client: reqwest::Client::new(),
        }
    }

    fn payload(&self, recipient: &str, message: &str) -> serde_json::Value {
        serde_json::json!({
            "from": { "email": self.config.from_address },
            "to": [{ "email": recipient }],
            "subject": self.config.subject,
            "text": message,
        })
    }
}

#[async_trait]
impl NotificationAdapter for EmailAdapter {
    fn channel(&self) -> Channel {
        Channel::Email
    }

    async fn send(&self, recipient: &str, message: &str) -> Result<(), SendError> {
        if recipient.is_empty() {
            return Err(SendError::Misconfigured("empty recipient".to_string()));
        }
        let payload = self.payload(recipient, message);

        #[cfg(feature = "http")]
        {
            let response = self
                .client
                .post(&self.config.api_url)
                .bearer_auth(&self.config.api_token)
                .timeout(self.config.timeout)
                .json(&payload)
                .send()
                .await
                .map_err(|e| SendError::Transport(e.to_string()))?;

            let status = response.status();
            if status.is_success() {
                tracing::debug!(recipient, "email accepted by provider");
                return Ok(());
            }
            let body = response.text().await.unwrap_or_default();
            return Err(SendError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        #[cfg(not(feature = "http"))]
        {
            tracing::info!(recipient, %payload, "http feature disabled, email not sent");
            Ok(())
        }
    }
}
