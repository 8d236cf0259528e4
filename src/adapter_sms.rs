//! SMS delivery through the Twilio Messages API.

use std::time::Duration;

use async_trait::async_trait;

use crate::adapter::NotificationAdapter;
use crate::config::{parse_or, required};
use crate::error::{ConfigError, SendError};
use crate::types::Channel;

pub const DEFAULT_TWILIO_API_BASE: &str = "https://api.twilio.com";

#[derive(Debug, Clone)]
pub struct SmsConfig {
    pub account_sid: String,
    pub auth_token: String,
    pub from_number: String,
    pub api_base: String,
    pub timeout: Duration,
}

impl SmsConfig {
    pub fn new(
        account_sid: impl Into<String>,
        auth_token: impl Into<String>,
        from_number: impl Into<String>,
    ) -> Self {
        Self {
            account_sid: account_sid.into(),
            auth_token: auth_token.into(),
            from_number: from_number.into(),
            api_base: DEFAULT_TWILIO_API_BASE.to_string(),
            timeout: Duration::from_secs(10),
        }
    }

    /// Read `TWILIO_ACCOUNT_SID`, `TWILIO_AUTH_TOKEN`, `TWILIO_FROM_NUMBER`,
    /// `TWILIO_API_BASE` and `TWILIO_TIMEOUT_MS`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::new(
            required(&lookup, "TWILIO_ACCOUNT_SID")?,
            required(&lookup, "TWILIO_AUTH_TOKEN")?,
            required(&lookup, "TWILIO_FROM_NUMBER")?,
        );
        if let Some(base) = lookup("TWILIO_API_BASE") {
            config.api_base = base;
        }
        config.timeout = Duration::from_millis(parse_or(&lookup, "TWILIO_TIMEOUT_MS", 10_000)?);
        Ok(config)
    }

    fn messages_url(&self) -> String {
        format!(
            "{}/2010-04-01/Accounts/{}/Messages.json",
            self.api_base.trim_end_matches('/'),
            self.account_sid
        )
    }
}

pub struct SmsAdapter {
    config: SmsConfig,
    #[cfg(feature = "http")]
    client: reqwest::Client,
}

impl SmsAdapter {
    pub fn new(config: SmsConfig) -> Self {
        Self {
            config,
            #[cfg(feature = "http")]
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl NotificationAdapter for SmsAdapter {
    fn channel(&self) -> Channel {
        Channel::Sms
    }

    async fn send(&self, recipient: &str, message: &str) -> Result<(), SendError> {
        if recipient.is_empty() {
            return Err(SendError::Misconfigured("empty recipient".to_string()));
        }
        let url = self.config.messages_url();

        #[cfg(feature = "http")]
        {
            let form = [
                ("To", recipient),
                ("From", self.config.from_number.as_str()),
                ("Body", message),
            ];
            let response = self
                .client
                .post(&url)
                .basic_auth(&self.config.account_sid, Some(&self.config.auth_token))
                .timeout(self.config.timeout)
                .form(&form)
                .send()
                .await
                .map_err(|e| SendError::Transport(e.to_string()))?;

            let status = response.status();
            if status.is_success() {
                tracing::debug!(recipient, "sms accepted by provider");
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
            tracing::info!(recipient, %url, message, "http feature disabled, sms not sent");
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_url_targets_the_account() {
        let mut config = SmsConfig::new("AC123", "secret", "+15550000000");
        assert_eq!(
            config.messages_url(),
            "https://api.twilio.com/2010-04-01/Accounts/AC123/Messages.json"
        );

        config.api_base = "http://localhost:8080/".to_string();
        assert_eq!(
            config.messages_url(),
            "http://localhost:8080/2010-04-01/Accounts/AC123/Messages.json"
        );
    }

    #[test]
    fn config_requires_credentials() {
        let err = SmsConfig::from_lookup(|key| match key {
            "TWILIO_ACCOUNT_SID" => Some("AC123".to_string()),
            _ => None,
        })
        .unwrap_err();
        assert!(matches!(err, ConfigError::Missing("TWILIO_AUTH_TOKEN")));
    }

    #[tokio::test]
    async fn empty_recipient_is_rejected_before_any_request() {
        let adapter = SmsAdapter::new(SmsConfig::new("AC123", "secret", "+15550000000"));
        assert_eq!(adapter.channel(), Channel::Sms);
        let err = adapter.send("", "code 42").await.unwrap_err();
        assert!(matches!(err, SendError::Misconfigured(_)));
    }
}
