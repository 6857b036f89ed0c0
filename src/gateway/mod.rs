//! Key-value gateway.
//!
//! The persistence layer talks to its store through the [`KvGateway`] trait:
//! a small Redis-like command set (strings, hashes, counters), batched
//! non-atomic pipelines, atomic multi-command transactions and prefix
//! enumeration. Two gateways are provided:
//! - `MemoryGateway` - in-process ordered map, for tests and ephemeral brokers
//! - `FjallGateway` - durable local LSM-tree storage

mod fjall;
mod memory;
mod value;

pub use self::fjall::FjallGateway;
pub use memory::MemoryGateway;

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::{self, BoxStream, StreamExt};

use crate::persistence::{PersistenceError, Result};

/// A single store command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Read a string value
    Get(String),
    /// Write a string value
    Set(String, Bytes),
    /// Delete a key of any kind, replies 1 if it existed
    Del(String),
    /// Replies 1 if the key exists
    Exists(String),
    /// Write hash fields, replies with the number of fields created
    HSet(String, Vec<(String, Bytes)>),
    /// Read every field of a hash
    HGetAll(String),
    /// Delete a hash field, replies 1 if it existed
    HDel(String, String),
    /// Number of fields in a hash
    HLen(String),
    /// Add to a decimal counter, replies with the new value
    IncrBy(String, i64),
}

/// Reply to a single command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Ok,
    Nil,
    Int(i64),
    Bulk(Bytes),
    Hash(Vec<(String, Bytes)>),
}

impl Reply {
    /// String value, `None` for a missing key
    pub fn into_bulk(self) -> Result<Option<Bytes>> {
        match self {
            Reply::Bulk(bytes) => Ok(Some(bytes)),
            Reply::Nil => Ok(None),
            other => Err(unexpected("bulk", &other)),
        }
    }

    pub fn as_int(&self) -> Result<i64> {
        match self {
            Reply::Int(n) => Ok(*n),
            other => Err(unexpected("integer", other)),
        }
    }

    pub fn into_hash(self) -> Result<Vec<(String, Bytes)>> {
        match self {
            Reply::Hash(fields) => Ok(fields),
            Reply::Nil => Ok(Vec::new()),
            other => Err(unexpected("hash", &other)),
        }
    }

    /// Counter stored as a decimal string; a missing key counts as zero
    pub fn into_counter(self) -> Result<i64> {
        match self.into_bulk()? {
            None => Ok(0),
            Some(raw) => std::str::from_utf8(&raw)
                .ok()
                .and_then(|s| s.parse::<i64>().ok())
                .ok_or_else(|| {
                    PersistenceError::Deserialize("counter is not an integer".to_string())
                }),
        }
    }
}

fn unexpected(expected: &str, got: &Reply) -> PersistenceError {
    PersistenceError::Storage(format!("expected {} reply, got {:?}", expected, got))
}

/// Connection to a key-value store
#[async_trait]
pub trait KvGateway: Send + Sync {
    /// Run commands in order without atomicity; one result per command.
    ///
    /// A failing command does not stop or roll back the others. The outer
    /// error is reserved for transport failures.
    async fn pipeline(&self, commands: Vec<Command>) -> Result<Vec<Result<Reply>>>;

    /// Run commands atomically.
    ///
    /// Later commands observe earlier writes. Either every command applies
    /// or none does, in which case `TransactionFailed` is returned.
    async fn transaction(&self, commands: Vec<Command>) -> Result<Vec<Reply>>;

    /// Up to `count` keys starting with `prefix`, in key order, strictly
    /// after the `after` cursor when one is given.
    async fn scan(&self, prefix: &str, after: Option<&str>, count: usize) -> Result<Vec<String>>;

    /// Release the connection. Later calls fail with `Unavailable`.
    async fn close(&self) -> Result<()>;

    /// Run one command on its own
    async fn execute(&self, command: Command) -> Result<Reply> {
        self.pipeline(vec![command])
            .await?
            .pop()
            .unwrap_or_else(|| Err(PersistenceError::Storage("empty pipeline reply".to_string())))
    }
}

struct ScanState {
    gateway: Arc<dyn KvGateway>,
    prefix: String,
    after: Option<String>,
    count: usize,
    done: bool,
}

/// Lazily enumerate keys under `prefix` as batches of at most `count` keys.
///
/// Each batch is fetched only when the previous one has been consumed.
/// Calling this again restarts the enumeration from the beginning.
pub fn scan_stream(
    gateway: Arc<dyn KvGateway>,
    prefix: String,
    count: usize,
) -> BoxStream<'static, Result<Vec<String>>> {
    let state = ScanState {
        gateway,
        prefix,
        after: None,
        count: count.max(1),
        done: false,
    };

    stream::try_unfold(state, |mut state| async move {
        if state.done {
            return Ok(None);
        }

        let keys = state
            .gateway
            .scan(&state.prefix, state.after.as_deref(), state.count)
            .await?;

        if keys.len() < state.count {
            state.done = true;
        }

        match keys.last() {
            Some(last) => {
                state.after = Some(last.clone());
                Ok(Some((keys, state)))
            }
            None => Ok(None),
        }
    })
    .boxed()
}
