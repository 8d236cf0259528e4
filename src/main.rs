//! Queue consumer daemon.
//!
//! Runs the event processor and retry scheduler against Redis until Ctrl-C.
//! It exposes no ingestion or DLQ endpoint of its own. Producers either go
//! through `Dispatcher::submit` in-process, or `LPUSH` an `Event` JSON
//! record onto the main queue themselves. Such a record must carry
//! `created_at` (RFC 3339); without it the processor discards the record as
//! malformed. DLQ contents are read with `Dispatcher::dlq_stats` and
//! `Dispatcher::dlq_events`, or with `LLEN`/`LRANGE` on the DLQ key.

use std::sync::Arc;

use anyhow::Context;
use notification_dispatcher::{
    redis_url_from_env, AdapterRegistry, Dispatcher, DispatcherConfig, EmailAdapter, EmailConfig,
    RedisQueue, SmsAdapter, SmsConfig,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = DispatcherConfig::from_env().context("invalid dispatcher configuration")?;
    let redis_url = redis_url_from_env();
    let queue = Arc::new(RedisQueue::open(&redis_url).context("invalid redis url")?);

    let mut adapters = AdapterRegistry::new();
    match EmailConfig::from_env() {
        Ok(email) => adapters = adapters.with_adapter(EmailAdapter::new(email)),
        Err(err) => warn!(error = %err, "email channel disabled"),
    }
    match SmsConfig::from_env() {
        Ok(sms) => adapters = adapters.with_adapter(SmsAdapter::new(sms)),
        Err(err) => warn!(error = %err, "sms channel disabled"),
    }
    if adapters.is_empty() {
        warn!("no channel adapters configured, every event will be discarded");
    }

    let mut dispatcher = Dispatcher::with_queue(queue, adapters, config);
    match dispatcher.dlq_stats().await {
        Ok(stats) => info!(dlq_size = stats.size, "dead letter queue inspected"),
        Err(err) => warn!(error = %err, "queue backend unreachable at startup"),
    }

    tokio::signal::ctrl_c().await.context("failed to listen for ctrl-c")?;
    info!("shutdown signal received");
    dispatcher.shutdown().await;
    Ok(())
}
