//! Last-will messages.
//!
//! Wills are keyed by the broker that accepted the connection, so a broker
//! recovering from a peer crash can find wills nobody is left to deliver.

use ahash::AHashSet;
use futures_util::stream::BoxStream;

use super::keys;
use super::models::{decode, encode, Packet};
use super::{Persistence, Result};
use crate::gateway::Command;

impl Persistence {
    /// Store the will of a client, owned by this broker
    pub async fn put_will(&self, client_id: &str, will: &Packet) -> Result<()> {
        let mut will = will.clone();
        will.client_id = Some(client_id.to_string());
        will.broker_id = Some(self.broker_id.clone());

        let key = keys::will(&self.broker_id, client_id);
        self.pipeline.call(Command::Set(key, encode(&will)?)).await?;
        Ok(())
    }

    pub async fn get_will(&self, client_id: &str) -> Result<Option<Packet>> {
        self.pipeline
            .call(Command::Get(keys::will(&self.broker_id, client_id)))
            .await?
            .into_bulk()?
            .map(|bytes| decode(&bytes))
            .transpose()
    }

    /// Delete the will of a client, returning it if there was one
    pub async fn del_will(&self, client_id: &str) -> Result<Option<Packet>> {
        let key = keys::will(&self.broker_id, client_id);

        // Read and delete share one round-trip
        let get = self.pipeline.submit(Command::Get(key.clone()));
        let del = self.pipeline.submit(Command::Del(key));
        let (will, _) = tokio::try_join!(get, del)?;

        will.into_bulk()?.map(|bytes| decode(&bytes)).transpose()
    }

    /// Lazily stream the wills of every broker not in `live_brokers`
    pub fn stream_will<I, S>(&self, live_brokers: I) -> BoxStream<'static, Result<Packet>>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let live: AHashSet<String> = live_brokers.into_iter().map(Into::into).collect();

        self.fetch_packets(keys::WILL.to_string(), move |key| {
            keys::will_broker(key).is_some_and(|broker| !live.contains(broker))
        })
    }
}
