//! VibeMQ KV - key-value persistence for the VibeMQ MQTT broker
//!
//! Stores retained messages, subscriptions, inflight packets and last-will
//! messages in a flat key-value store, so that several brokers can share
//! state and recover each other's wills.

pub mod config;
pub mod gateway;
pub mod persistence;
pub mod pipeline;
pub mod topic;

pub use config::Config;
pub use gateway::{FjallGateway, KvGateway, MemoryGateway};
pub use persistence::{
    OfflineCount, Packet, Persistence, PersistenceError, PersistenceOptions, QoS, Subscription,
    TopicSubscriber,
};
pub use topic::{TopicMatcher, TrieMatcher};
