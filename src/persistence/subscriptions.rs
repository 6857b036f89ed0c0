//! Subscription index.
//!
//! Each subscription is recorded twice:
//! - `client:sub:<clientId>` holds every topic of the client with its QoS
//! - `sub:client:<topic>` holds every client subscribed to that exact
//!   pattern, only for QoS > 0
//!
//! Both views are always changed together in one transaction. Two global
//! counters track the clients that have a stored aggregate and the number
//! of QoS > 0 entries in the per-topic index. They are adjusted from the
//! transaction replies once it commits.

use bytes::Bytes;
use futures_util::future::try_join_all;
use futures_util::stream::{self, TryStreamExt};
use tracing::debug;

use super::keys;
use super::models::{decode, encode, OfflineCount, QoS, Subscription, TopicSubscriber};
use super::{Persistence, PersistenceError, Result};
use crate::gateway::{scan_stream, Command, Reply};

fn int_at(replies: &[Reply], index: usize) -> Result<i64> {
    replies
        .get(index)
        .ok_or_else(|| PersistenceError::Storage(format!("missing reply #{}", index)))?
        .as_int()
}

impl Persistence {
    /// Record subscriptions for a client.
    ///
    /// Re-subscribing to a topic overwrites its QoS. Re-subscribing with
    /// QoS 0 drops the client from that topic's index.
    pub async fn add_subscriptions(&self, client_id: &str, subs: &[Subscription]) -> Result<()> {
        if subs.is_empty() {
            return Ok(());
        }

        let client_key = keys::client_sub(client_id);
        let mut commands = Vec::with_capacity(subs.len() + 2);
        commands.push(Command::Exists(client_key.clone()));
        commands.push(Command::HSet(
            client_key,
            subs.iter()
                .map(|sub| (sub.topic.clone(), sub.qos.to_stored()))
                .collect(),
        ));

        for sub in subs {
            let topic_key = keys::sub_client(&sub.topic);
            if sub.qos.is_tracked() {
                commands.push(Command::HSet(
                    topic_key,
                    vec![(client_id.to_string(), encode(sub)?)],
                ));
            } else {
                commands.push(Command::HDel(topic_key, client_id.to_string()));
            }
        }

        let replies = self.db.transaction(commands).await?;
        let existed = int_at(&replies, 0)? > 0;

        // Net change of the per-topic index
        let mut delta = 0;
        for (i, sub) in subs.iter().enumerate() {
            let changed = int_at(&replies, i + 2)?;
            if sub.qos.is_tracked() {
                delta += changed;
            } else {
                delta -= changed;
            }
        }

        debug!(
            "Client {} added {} subscriptions (index delta {})",
            client_id,
            subs.len(),
            delta
        );
        self.adjust_offline(if existed { 0 } else { 1 }, delta).await
    }

    /// Remove subscriptions of a client by topic.
    ///
    /// Topics the client is not subscribed to are skipped.
    pub async fn remove_subscriptions<S: AsRef<str>>(
        &self,
        client_id: &str,
        topics: &[S],
    ) -> Result<()> {
        if topics.is_empty() {
            return Ok(());
        }

        let client_key = keys::client_sub(client_id);
        let mut commands = Vec::with_capacity(topics.len() * 2 + 2);
        commands.push(Command::Exists(client_key.clone()));
        for topic in topics {
            let topic = topic.as_ref();
            commands.push(Command::HDel(keys::sub_client(topic), client_id.to_string()));
            commands.push(Command::HDel(client_key.clone(), topic.to_string()));
        }
        commands.push(Command::HLen(client_key));

        let replies = self.db.transaction(commands).await?;
        let existed = int_at(&replies, 0)? > 0;
        let remaining = int_at(&replies, replies.len() - 1)?;

        let mut removed = 0;
        for i in 0..topics.len() {
            removed += int_at(&replies, 1 + i * 2)?;
        }

        debug!(
            "Client {} removed {} indexed subscriptions",
            client_id, removed
        );
        let clients = if existed && remaining == 0 { -1 } else { 0 };
        self.adjust_offline(clients, -removed).await
    }

    /// Subscriptions of a client, or `None` if it has none
    pub async fn subscriptions_by_client(&self, client_id: &str) -> Result<Option<Vec<Subscription>>> {
        let fields = self
            .pipeline
            .call(Command::HGetAll(keys::client_sub(client_id)))
            .await?
            .into_hash()?;

        if fields.is_empty() {
            return Ok(None);
        }

        let subs = fields
            .into_iter()
            .map(|(topic, qos)| Ok(Subscription::new(topic, QoS::parse_stored(&qos)?)))
            .collect::<Result<Vec<_>>>()?;
        Ok(Some(subs))
    }

    /// Every QoS > 0 subscription, across all clients, whose stored pattern
    /// matches `topic`
    ///
    /// `+` and `#` in `topic` are plain levels here, so `a/#` is found by the
    /// stored patterns `a/+`, `a/#` and `#` but not by `a/b`.
    pub async fn subscriptions_by_topic(&self, topic: &str) -> Result<Vec<TopicSubscriber>> {
        let matcher = self.matcher.clone();
        let query = topic.to_string();
        let pipeline = self.pipeline.clone();

        let maps: Vec<Vec<(String, Bytes)>> =
            scan_stream(self.db.clone(), keys::SUB_CLIENT.to_string(), self.scan_count)
                .map_ok(move |page| {
                    let kept: Vec<String> = page
                        .into_iter()
                        .filter(|key| {
                            let pattern = &key[keys::SUB_CLIENT.len()..];
                            let mut single = matcher();
                            single.add(pattern);
                            single.matches(&query)
                        })
                        .collect();
                    stream::iter(kept.into_iter().map(Ok::<_, PersistenceError>))
                })
                .try_flatten()
                .map_ok(move |key| pipeline.submit(Command::HGetAll(key)))
                .try_buffered(self.scan_concurrency)
                .and_then(|reply| async move { reply.into_hash() })
                .try_collect()
                .await?;

        let mut subscribers = Vec::new();
        for (client_id, encoded) in maps.into_iter().flatten() {
            let sub: Subscription = decode(&encoded)?;
            subscribers.push(TopicSubscriber {
                client_id,
                topic: sub.topic,
                qos: sub.qos,
            });
        }
        Ok(subscribers)
    }

    /// Drop every subscription of a client from both views
    pub async fn clean_subscriptions(&self, client_id: &str) -> Result<()> {
        let client_key = keys::client_sub(client_id);
        let fields = self
            .pipeline
            .call(Command::HGetAll(client_key.clone()))
            .await?
            .into_hash()?;

        let mut commands = Vec::with_capacity(fields.len() + 1);
        commands.push(Command::Del(client_key));
        for (topic, _) in &fields {
            commands.push(Command::HDel(keys::sub_client(topic), client_id.to_string()));
        }

        let replies = self.db.transaction(commands).await?;
        let existed = int_at(&replies, 0)? > 0;
        let mut removed = 0;
        for i in 1..replies.len() {
            removed += int_at(&replies, i)?;
        }

        debug!(
            "Cleaned {} subscriptions of client {}",
            fields.len(),
            client_id
        );
        self.adjust_offline(if existed { -1 } else { 0 }, -removed).await
    }

    /// Current offline counters
    ///
    /// Both reads share a pipelined round-trip with any other queued command.
    pub async fn count_offline(&self) -> Result<OfflineCount> {
        let subscriptions = self
            .pipeline
            .submit(Command::Get(keys::OFFLINE_SUBSCRIPTIONS.to_string()));
        let clients = self
            .pipeline
            .submit(Command::Get(keys::OFFLINE_CLIENTS.to_string()));

        let (subscriptions, clients) = tokio::try_join!(subscriptions, clients)?;
        Ok(OfflineCount {
            subscriptions: subscriptions.into_counter()?.max(0) as u64,
            clients: clients.into_counter()?.max(0) as u64,
        })
    }

    async fn adjust_offline(&self, clients: i64, subscriptions: i64) -> Result<()> {
        let mut pending = Vec::with_capacity(2);
        if clients != 0 {
            pending.push(
                self.pipeline
                    .submit(Command::IncrBy(keys::OFFLINE_CLIENTS.to_string(), clients)),
            );
        }
        if subscriptions != 0 {
            pending.push(self.pipeline.submit(Command::IncrBy(
                keys::OFFLINE_SUBSCRIPTIONS.to_string(),
                subscriptions,
            )));
        }
        try_join_all(pending).await?;
        Ok(())
    }
}
