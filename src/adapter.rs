use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{ConfigError, SendError};
use crate::types::Channel;

/// Sends a message to a recipient over one channel.
#[async_trait]
pub trait NotificationAdapter: Send + Sync {
    /// Channel this adapter delivers on.
    fn channel(&self) -> Channel;

    async fn send(&self, recipient: &str, message: &str) -> Result<(), SendError>;
}

/// Channel to adapter mapping, built once at startup and read-only after.
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    adapters: HashMap<Channel, Arc<dyn NotificationAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adapter under the channel it reports.
    /// A later registration for the same channel replaces the earlier one.
    pub fn with_adapter<A>(self, adapter: A) -> Self
    where
        A: NotificationAdapter + 'static,
    {
        self.with_shared(Arc::new(adapter))
    }

    pub fn with_shared(mut self, adapter: Arc<dyn NotificationAdapter>) -> Self {
        self.adapters.insert(adapter.channel(), adapter);
        self
    }

    /// Register an adapter under a configured channel name.
    ///
    /// Fails when the name is not a known channel or does not match the
    /// adapter's own channel.
    pub fn register_named(
        self,
        name: &str,
        adapter: Arc<dyn NotificationAdapter>,
    ) -> Result<Self, ConfigError> {
        let channel: Channel = name.parse()?;
        if channel != adapter.channel() {
            return Err(ConfigError::Invalid {
                key: "channel",
                value: format!("{name} (adapter delivers {})", adapter.channel()),
            });
        }
        Ok(self.with_shared(adapter))
    }

    pub fn get(&self, channel: Channel) -> Option<Arc<dyn NotificationAdapter>> {
        self.adapters.get(&channel).cloned()
    }

    pub fn contains(&self, channel: Channel) -> bool {
        self.adapters.contains_key(&channel)
    }

    pub fn channels(&self) -> Vec<Channel> {
        self.adapters.keys().copied().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}
