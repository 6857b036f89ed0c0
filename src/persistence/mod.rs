//! Persistence module for VibeMQ.
//!
//! Maps broker persistence onto a flat key-value store:
//! - Retained messages, one key per topic
//! - Subscriptions, indexed both by client and by topic, with global
//!   offline counters
//! - Outgoing inflight packets, keyed by broker coordinates and by message id
//! - Incoming inflight packets
//! - Last-will messages, keyed by owning broker
//!
//! Multi-key updates go through gateway transactions. Independent single-key
//! reads and writes go through the batching pipeline, so that calls made in
//! the same turn share one round-trip.

mod error;
pub mod keys;
mod models;
mod packets;
mod retained;
mod subscriptions;
mod will;

#[cfg(test)]
mod tests;

pub use error::{PersistenceError, Result};
pub use models::{OfflineCount, Packet, QoS, Subscription, TopicSubscriber};

use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{self, BoxStream, StreamExt, TryStreamExt};
use tracing::info;

use crate::config::{BackendType, Config};
use crate::gateway::{scan_stream, Command, FjallGateway, KvGateway, MemoryGateway};
use crate::pipeline::Pipeline;
use crate::topic::{default_matcher, MatcherFactory};

use models::decode;

/// Tunables for a [`Persistence`] instance
#[derive(Debug, Clone)]
pub struct PersistenceOptions {
    /// Id of the broker this instance serves; wills are stored under it
    pub broker_id: String,
    /// Upper bound on commands per pipelined round-trip
    pub max_batch_size: usize,
    /// Extra time a batch stays open after its first command
    pub linger: Duration,
    /// Keys fetched per enumeration page
    pub scan_count: usize,
    /// Records fetched concurrently while streaming
    pub scan_concurrency: usize,
}

impl Default for PersistenceOptions {
    fn default() -> Self {
        Self {
            broker_id: "vibemq".to_string(),
            max_batch_size: 1000,
            linger: Duration::ZERO,
            scan_count: 100,
            scan_concurrency: 16,
        }
    }
}

impl From<&Config> for PersistenceOptions {
    fn from(config: &Config) -> Self {
        Self {
            broker_id: config.broker.id.clone(),
            max_batch_size: config.pipeline.max_batch_size,
            linger: config.pipeline.linger,
            scan_count: config.scan.count,
            scan_concurrency: config.scan.concurrency,
        }
    }
}

/// Broker persistence over a key-value gateway
pub struct Persistence {
    db: Arc<dyn KvGateway>,
    pipeline: Arc<Pipeline>,
    matcher: MatcherFactory,
    broker_id: String,
    scan_count: usize,
    scan_concurrency: usize,
}

impl Persistence {
    /// Create a persistence instance over the given gateway
    ///
    /// Must be called from within a tokio runtime: this spawns the pipeline
    /// task.
    pub fn new(db: Arc<dyn KvGateway>, options: PersistenceOptions) -> Self {
        let pipeline = Pipeline::new(db.clone(), options.max_batch_size, options.linger);

        Self {
            db,
            pipeline: Arc::new(pipeline),
            matcher: default_matcher(),
            broker_id: options.broker_id,
            scan_count: options.scan_count.max(1),
            scan_concurrency: options.scan_concurrency.max(1),
        }
    }

    /// Open the gateway described by the configuration
    pub fn open(config: &Config) -> Result<Self> {
        let db: Arc<dyn KvGateway> = match config.store.backend {
            BackendType::Memory => Arc::new(MemoryGateway::new()),
            BackendType::Fjall => Arc::new(
                FjallGateway::open(&config.store.path)?
                    .with_sync_writes(config.store.sync_writes),
            ),
        };

        info!(
            "Opened {:?} store for broker {}",
            config.store.backend, config.broker.id
        );
        Ok(Self::new(db, PersistenceOptions::from(config)))
    }

    /// Use a different topic matcher implementation
    pub fn with_matcher(mut self, matcher: MatcherFactory) -> Self {
        self.matcher = matcher;
        self
    }

    /// Flush pending pipelined commands and release the store connection
    pub async fn destroy(self) -> Result<()> {
        self.pipeline.shutdown().await;
        self.db.close().await?;
        info!("Persistence for broker {} destroyed", self.broker_id);
        Ok(())
    }

    /// Lazily stream the packets stored under `prefix` whose key passes `keep`.
    ///
    /// Keys are enumerated page by page; each page's records are fetched
    /// through the pipeline, several at a time, and decoded in key order.
    /// Keys removed between enumeration and fetch are skipped.
    fn fetch_packets<F>(&self, prefix: String, mut keep: F) -> BoxStream<'static, Result<Packet>>
    where
        F: FnMut(&str) -> bool + Send + 'static,
    {
        let pipeline = self.pipeline.clone();

        scan_stream(self.db.clone(), prefix, self.scan_count)
            .map_ok(move |page| {
                let kept: Vec<String> = page.into_iter().filter(|key| keep(key.as_str())).collect();
                stream::iter(kept.into_iter().map(Ok::<_, PersistenceError>))
            })
            .try_flatten()
            .map_ok(move |key| pipeline.submit(Command::Get(key)))
            .try_buffered(self.scan_concurrency)
            .try_filter_map(|reply| async move {
                match reply.into_bulk()? {
                    Some(bytes) => decode::<Packet>(&bytes).map(Some),
                    None => Ok(None),
                }
            })
            .boxed()
    }
}
