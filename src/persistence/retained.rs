//! Retained messages.

use futures_util::stream::BoxStream;
use tracing::debug;

use super::keys;
use super::models::{encode, Packet};
use super::{Persistence, Result};
use crate::gateway::Command;
use crate::topic::literal_prefix;

impl Persistence {
    /// Store the retained message for a topic.
    ///
    /// An empty payload clears the topic instead; empty retained messages
    /// are never stored.
    pub async fn store_retained(&self, packet: &Packet) -> Result<()> {
        let key = keys::retained(&packet.topic);

        if packet.payload.is_empty() {
            debug!("Clearing retained message on {}", packet.topic);
            self.db.execute(Command::Del(key)).await?;
        } else {
            self.db.execute(Command::Set(key, encode(packet)?)).await?;
        }
        Ok(())
    }

    /// Lazily stream every retained message whose topic matches `pattern`.
    ///
    /// Only keys under the pattern's literal prefix are enumerated; each
    /// candidate topic is then checked against the full pattern. Calling
    /// this again starts a fresh enumeration.
    pub fn create_retained_stream(&self, pattern: &str) -> BoxStream<'static, Result<Packet>> {
        let mut matcher = (self.matcher)();
        matcher.add(pattern);

        let prefix = keys::retained(literal_prefix(pattern));
        self.fetch_packets(prefix, move |key| {
            key.strip_prefix(keys::RETAINED)
                .is_some_and(|topic| matcher.matches(topic))
        })
    }
}
