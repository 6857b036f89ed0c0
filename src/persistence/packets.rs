//! Inflight packet tracking.
//!
//! An outgoing packet is stored under two keys:
//! - the pre-key `outgoing:<clientId>:<brokerId>:<brokerCounter>`, written
//!   when the packet is queued for the client
//! - the post-key `outgoing-id:<clientId>:<messageId>`, written once the
//!   broker allocates a message id for delivery
//!
//! Both hold the same record. The post-key lets the broker go from the
//! message id in an acknowledgement back to the pre-key coordinates.
//! Incoming packets use a single key per message id.

use futures_util::stream::BoxStream;
use tracing::{debug, warn};

use super::keys;
use super::models::{decode, encode, Packet, TopicSubscriber};
use super::{Persistence, PersistenceError, Result};
use crate::gateway::Command;

fn require_message_id(packet: &Packet) -> Result<u16> {
    packet
        .message_id
        .ok_or_else(|| PersistenceError::InvalidPacket("packet has no message id".to_string()))
}

impl Persistence {
    /// Queue a packet for the subscriber's client under its broker coordinates
    pub async fn outgoing_enqueue(&self, sub: &TopicSubscriber, packet: &Packet) -> Result<()> {
        let (broker_id, broker_counter) = packet.broker_coordinates().ok_or_else(|| {
            PersistenceError::InvalidPacket("outgoing packet has no broker id".to_string())
        })?;

        let key = keys::outgoing(&sub.client_id, broker_id, broker_counter);
        self.pipeline
            .call(Command::Set(key, encode(&packet.for_queue())?))
            .await?;
        Ok(())
    }

    /// Record the message id assigned to an outgoing packet.
    ///
    /// A packet that only carries a message id gets its broker coordinates
    /// from the post-key first. Returns the packet as stored.
    pub async fn outgoing_update(&self, client_id: &str, packet: &Packet) -> Result<Packet> {
        let mut packet = packet.clone();
        if packet.broker_coordinates().is_none() {
            self.augment_with_broker_data(client_id, &mut packet).await?;
        }
        self.update_with_broker_data(client_id, packet).await
    }

    /// Remove an acknowledged outgoing packet by message id.
    ///
    /// Returns the record that was removed.
    pub async fn outgoing_clear_message_id(
        &self,
        client_id: &str,
        packet: &Packet,
    ) -> Result<Packet> {
        let message_id = require_message_id(packet)?;
        let post_key = keys::outgoing_id(client_id, message_id);

        let stored = self
            .pipeline
            .call(Command::Get(post_key.clone()))
            .await?
            .into_bulk()?
            .ok_or_else(PersistenceError::no_such_packet)?;
        let stored: Packet = decode(&stored)?;

        let mut commands = vec![Command::Del(post_key)];
        if let Some((broker_id, broker_counter)) = stored.broker_coordinates() {
            commands.push(Command::Del(keys::outgoing(
                client_id,
                broker_id,
                broker_counter,
            )));
        } else {
            warn!(
                "Outgoing packet {} of client {} has no broker coordinates",
                message_id, client_id
            );
        }

        self.db.transaction(commands).await?;
        Ok(stored)
    }

    /// Lazily stream every queued outgoing packet of a client
    pub fn outgoing_stream(&self, client_id: &str) -> BoxStream<'static, Result<Packet>> {
        self.fetch_packets(keys::outgoing_prefix(client_id), |_| true)
    }

    /// Store a packet received from a client, keyed by its message id
    pub async fn incoming_store_packet(&self, client_id: &str, packet: &Packet) -> Result<()> {
        let key = keys::incoming(client_id, require_message_id(packet)?);
        self.pipeline.call(Command::Set(key, encode(packet)?)).await?;
        Ok(())
    }

    /// Fetch a stored incoming packet; `NotFound` if there is none
    pub async fn incoming_get_packet(&self, client_id: &str, message_id: u16) -> Result<Packet> {
        let bytes = self
            .pipeline
            .call(Command::Get(keys::incoming(client_id, message_id)))
            .await?
            .into_bulk()?
            .ok_or_else(PersistenceError::no_such_packet)?;
        decode(&bytes)
    }

    pub async fn incoming_del_packet(&self, client_id: &str, message_id: u16) -> Result<()> {
        self.pipeline
            .call(Command::Del(keys::incoming(client_id, message_id)))
            .await?;
        Ok(())
    }

    /// Copy broker coordinates from the post-key record into `packet`
    async fn augment_with_broker_data(&self, client_id: &str, packet: &mut Packet) -> Result<()> {
        let post_key = keys::outgoing_id(client_id, require_message_id(packet)?);
        let bytes = self
            .pipeline
            .call(Command::Get(post_key))
            .await?
            .into_bulk()?
            .ok_or_else(PersistenceError::no_such_packet)?;

        let stored: Packet = decode(&bytes)?;
        packet.broker_id = stored.broker_id;
        packet.broker_counter = stored.broker_counter;
        Ok(())
    }

    /// Write the packet under both keys, replacing a post-key left by an
    /// earlier message id
    async fn update_with_broker_data(&self, client_id: &str, packet: Packet) -> Result<Packet> {
        let message_id = require_message_id(&packet)?;
        let (broker_id, broker_counter) = packet
            .broker_coordinates()
            .ok_or_else(PersistenceError::no_such_packet)?;

        let pre_key = keys::outgoing(client_id, broker_id, broker_counter);
        let post_key = keys::outgoing_id(client_id, message_id);

        let previous = self
            .pipeline
            .call(Command::Get(pre_key.clone()))
            .await?
            .into_bulk()?
            .map(|bytes| decode::<Packet>(&bytes))
            .transpose()?;

        let mut commands = Vec::with_capacity(3);
        if let Some(stale) = previous
            .and_then(|previous| previous.message_id)
            .filter(|previous_id| *previous_id != message_id)
        {
            debug!(
                "Replacing message id {} with {} for client {}",
                stale, message_id, client_id
            );
            commands.push(Command::Del(keys::outgoing_id(client_id, stale)));
        }

        let encoded = encode(&packet)?;
        commands.push(Command::Set(post_key, encoded.clone()));
        commands.push(Command::Set(pre_key, encoded));

        self.db.transaction(commands).await?;
        Ok(packet)
    }
}
