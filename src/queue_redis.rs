use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;

use crate::error::QueueError;
use crate::queue::QueueService;

/// Redis-backed queue using `LPUSH` / `BRPOP` / `LLEN` / `LRANGE`.
///
/// Every operation opens its own connection. A blocking `BRPOP` holds its
/// connection for the whole wait, so sharing one would stall the other loop.
pub struct RedisQueue {
    client: redis::Client,
    prefix: String,
}

impl RedisQueue {
    pub fn new(client: redis::Client) -> Self {
        Self {
            client,
            prefix: String::new(),
        }
    }

    /// Open a client for `url` (e.g. `redis://127.0.0.1:6379/0`).
    pub fn open(url: &str) -> Result<Self, QueueError> {
        Ok(Self::new(redis::Client::open(url)?))
    }

    /// Namespace every key as `<prefix>:<queue>`.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    fn key(&self, queue: &str) -> String {
        if self.prefix.is_empty() {
            queue.to_string()
        } else {
            format!("{}:{}", self.prefix, queue)
        }
    }

    async fn connection(&self) -> Result<MultiplexedConnection, QueueError> {
        Ok(self.client.get_multiplexed_async_connection().await?)
    }
}

#[async_trait]
impl QueueService for RedisQueue {
    async fn push(&self, queue: &str, record: String) -> Result<(), QueueError> {
        let mut conn = self.connection().await?;
        let _: () = conn.lpush(self.key(queue), record).await?;
        Ok(())
    }

    async fn blocking_pop(
        &self,
        queue: &str,
        timeout: Option<Duration>,
    ) -> Result<Option<String>, QueueError> {
        let mut conn = self.connection().await?;
        // BRPOP treats a zero timeout as "wait forever".
        let timeout_secs = timeout.map(|t| t.as_secs_f64().max(0.001)).unwrap_or(0.0);
        let popped: Option<(String, String)> = redis::cmd("BRPOP")
            .arg(self.key(queue))
            .arg(timeout_secs)
            .query_async(&mut conn)
            .await?;
        Ok(popped.map(|(_, record)| record))
    }

    async fn length(&self, queue: &str) -> Result<u64, QueueError> {
        let mut conn = self.connection().await?;
        Ok(conn.llen(self.key(queue)).await?)
    }

    async fn range(&self, queue: &str, start: i64, stop: i64) -> Result<Vec<String>, QueueError> {
        let mut conn = self.connection().await?;
        Ok(conn
            .lrange(self.key(queue), start as isize, stop as isize)
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_prefixed() {
        let queue = RedisQueue::open("redis://127.0.0.1:6379/0")
            .expect("client")
            .with_prefix("notify");
        assert_eq!(queue.key("dlq"), "notify:dlq");

        let bare = RedisQueue::open("redis://127.0.0.1:6379/0").expect("client");
        assert_eq!(bare.key("dlq"), "dlq");
    }

    #[test]
    fn invalid_url_is_rejected() {
        assert!(RedisQueue::open("not a url").is_err());
    }
}
