use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;

use crate::error::QueueError;

/// Durable FIFO list store shared by the pipeline loops.
///
/// Semantics follow Redis lists: `push` inserts at the head, `blocking_pop`
/// removes from the tail, `range` reads from the head. Push/pop is FIFO and
/// `range(q, 0, n)` lists newest first. Records are opaque strings.
#[async_trait]
pub trait QueueService: Send + Sync {
    async fn push(&self, queue: &str, record: String) -> Result<(), QueueError>;

    /// Remove the oldest record, waiting up to `timeout` for one to arrive.
    ///
    /// `None` waits indefinitely. `Ok(None)` means the wait timed out.
    async fn blocking_pop(
        &self,
        queue: &str,
        timeout: Option<Duration>,
    ) -> Result<Option<String>, QueueError>;

    async fn length(&self, queue: &str) -> Result<u64, QueueError>;

    /// Records between `start` and `stop` inclusive, counted from the head.
    /// Negative indices count from the tail, as in `LRANGE`.
    async fn range(&self, queue: &str, start: i64, stop: i64) -> Result<Vec<String>, QueueError>;
}

/// Tries a push gets before a popped record is given up as lost.
pub(crate) const PUSH_ATTEMPTS: u32 = 3;

/// Push, retrying up to `attempts` times with `backoff` between tries.
///
/// Used where the caller already holds a popped record and giving up would
/// lose it.
pub(crate) async fn push_retrying(
    queue: &dyn QueueService,
    name: &str,
    record: String,
    attempts: u32,
    backoff: Duration,
) -> Result<(), QueueError> {
    let attempts = attempts.max(1);
    let mut tried = 1;
    loop {
        match queue.push(name, record.clone()).await {
            Ok(()) => return Ok(()),
            Err(err) if tried >= attempts => return Err(err),
            Err(err) => {
                tracing::warn!(queue = name, attempt = tried, error = %err, "queue push failed, retrying");
                tried += 1;
                tokio::time::sleep(backoff).await;
            }
        }
    }
}

/// In-memory queue for tests and single-process deployments.
#[derive(Default)]
pub struct InMemoryQueue {
    lists: Mutex<HashMap<String, VecDeque<String>>>,
    pushed: Notify,
}

impl InMemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    async fn try_pop(&self, queue: &str) -> Option<String> {
        let mut lists = self.lists.lock().await;
        lists.get_mut(queue).and_then(|list| list.pop_back())
    }
}

#[async_trait]
impl QueueService for InMemoryQueue {
    async fn push(&self, queue: &str, record: String) -> Result<(), QueueError> {
        self.lists
            .lock()
            .await
            .entry(queue.to_string())
            .or_default()
            .push_front(record);
        self.pushed.notify_waiters();
        Ok(())
    }

    async fn blocking_pop(
        &self,
        queue: &str,
        timeout: Option<Duration>,
    ) -> Result<Option<String>, QueueError> {
        let deadline = timeout.map(|t| Instant::now() + t);

        loop {
            // Register for wakeups before checking so a push between the
            // check and the await is not missed.
            let notified = self.pushed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(record) = self.try_pop(queue).await {
                return Ok(Some(record));
            }

            match deadline {
                None => notified.await,
                Some(deadline) => {
                    if tokio::time::timeout_at(deadline, notified).await.is_err() {
                        return Ok(self.try_pop(queue).await);
                    }
                }
            }
        }
    }

    async fn length(&self, queue: &str) -> Result<u64, QueueError> {
        let lists = self.lists.lock().await;
        Ok(lists.get(queue).map(|l| l.len() as u64).unwrap_or(0))
    }

    async fn range(&self, queue: &str, start: i64, stop: i64) -> Result<Vec<String>, QueueError> {
        let lists = self.lists.lock().await;
        let Some(list) = lists.get(queue) else {
            return Ok(Vec::new());
        };
        let Some((from, to)) = resolve_range(list.len(), start, stop) else {
            return Ok(Vec::new());
        };
        Ok(list.range(from..=to).cloned().collect())
    }
}

/// Clamp `LRANGE`-style indices to `[0, len)`.
fn resolve_range(len: usize, start: i64, stop: i64) -> Option<(usize, usize)> {
    if len == 0 {
        return None;
    }
    let len = len as i64;
    let start = if start < 0 { (len + start).max(0) } else { start };
    let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };
    if start > stop || start >= len {
        return None;
    }
    Some((start as usize, stop as usize))
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    /// In-memory queue whose next `push_failures` pushes and `pop_failures`
    /// pops fail with `QueueError::Unavailable`.
    #[derive(Default)]
    pub(crate) struct Unreliable {
        pub(crate) inner: InMemoryQueue,
        pub(crate) push_failures: AtomicU32,
        pub(crate) pop_failures: AtomicU32,
    }

    impl Unreliable {
        pub(crate) fn failing_pushes(n: u32) -> Self {
            Self {
                push_failures: n.into(),
                ..Default::default()
            }
        }

        pub(crate) fn failing_pops(n: u32) -> Self {
            Self {
                pop_failures: n.into(),
                ..Default::default()
            }
        }
    }

    fn take(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    #[async_trait]
    impl QueueService for Unreliable {
        async fn push(&self, queue: &str, record: String) -> Result<(), QueueError> {
            if take(&self.push_failures) {
                return Err(QueueError::Unavailable("connection refused".into()));
            }
            self.inner.push(queue, record).await
        }

        async fn blocking_pop(
            &self,
            queue: &str,
            timeout: Option<Duration>,
        ) -> Result<Option<String>, QueueError> {
            if take(&self.pop_failures) {
                return Err(QueueError::Unavailable("connection reset".into()));
            }
            self.inner.blocking_pop(queue, timeout).await
        }

        async fn length(&self, queue: &str) -> Result<u64, QueueError> {
            self.inner.length(queue).await
        }

        async fn range(&self, queue: &str, start: i64, stop: i64) -> Result<Vec<String>, QueueError> {
            self.inner.range(queue, start, stop).await
        }
    }
}
