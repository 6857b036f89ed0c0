//! Fjall-based gateway implementation.
//!
//! Uses fjall (an LSM-tree based embedded database) as a durable flat
//! keyspace. All keys live in a single partition so that prefix scans cover
//! the whole key layout; hash values are stored as one encoded record.

use std::ops::Bound;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use fjall::{Config, Keyspace, PartitionCreateOptions, PartitionHandle, PersistMode};
use parking_lot::Mutex;
use tracing::debug;

use super::value::{Overlay, Value, ValueStore, Writes};
use super::{Command, KvGateway, Reply};
use crate::persistence::{PersistenceError, Result};

const PARTITION: &str = "kv";

/// Fjall-based gateway
pub struct FjallGateway {
    keyspace: Keyspace,
    data: PartitionHandle,
    /// Serializes read-modify-write command application
    write_lock: Mutex<()>,
    sync_writes: bool,
    closed: AtomicBool,
}

impl FjallGateway {
    /// Open a fjall gateway at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let keyspace = Config::new(path).open()?;
        let data = keyspace.open_partition(PARTITION, PartitionCreateOptions::default())?;

        Ok(Self {
            keyspace,
            data,
            write_lock: Mutex::new(()),
            sync_writes: false,
            closed: AtomicBool::new(false),
        })
    }

    /// Fsync the journal after every commit
    pub fn with_sync_writes(mut self, sync_writes: bool) -> Self {
        self.sync_writes = sync_writes;
        self
    }

    /// Serialize a value using bincode
    fn serialize(value: &Value) -> Result<Vec<u8>> {
        bincode::encode_to_vec(value, bincode::config::standard()).map_err(PersistenceError::from)
    }

    /// Deserialize a value using bincode
    fn deserialize(bytes: &[u8]) -> Result<Value> {
        bincode::decode_from_slice(bytes, bincode::config::standard())
            .map(|(value, _)| value)
            .map_err(PersistenceError::from)
    }

    fn check_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(PersistenceError::Unavailable("connection closed".to_string()));
        }
        Ok(())
    }

    fn commit(&self, writes: Writes) -> Result<()> {
        if writes.is_empty() {
            return Ok(());
        }

        let mut batch = self.keyspace.batch();
        for (key, value) in writes {
            match value {
                Some(value) => batch.insert(&self.data, key.into_bytes(), Self::serialize(&value)?),
                None => batch.remove(&self.data, key.into_bytes()),
            }
        }
        batch.commit()?;

        if self.sync_writes {
            self.keyspace.persist(PersistMode::SyncData)?;
        }
        Ok(())
    }
}

impl ValueStore for PartitionHandle {
    fn load(&self, key: &str) -> Result<Option<Value>> {
        match self.get(key)? {
            Some(bytes) => Ok(Some(FjallGateway::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl KvGateway for FjallGateway {
    async fn pipeline(&self, commands: Vec<Command>) -> Result<Vec<Result<Reply>>> {
        self.check_open()?;

        let _guard = self.write_lock.lock();
        let mut results = Vec::with_capacity(commands.len());
        for command in &commands {
            let mut overlay = Overlay::new(&self.data);
            let result = overlay.apply(command);
            results.push(self.commit(overlay.into_writes()).and(result));
        }
        Ok(results)
    }

    async fn transaction(&self, commands: Vec<Command>) -> Result<Vec<Reply>> {
        self.check_open()?;

        let _guard = self.write_lock.lock();
        let mut overlay = Overlay::new(&self.data);
        let mut replies = Vec::with_capacity(commands.len());
        for command in &commands {
            let reply = overlay
                .apply(command)
                .map_err(|e| PersistenceError::TransactionFailed(e.to_string()))?;
            replies.push(reply);
        }
        self.commit(overlay.into_writes())?;
        Ok(replies)
    }

    async fn scan(&self, prefix: &str, after: Option<&str>, count: usize) -> Result<Vec<String>> {
        self.check_open()?;

        let start = match after {
            Some(cursor) => Bound::Excluded(cursor.as_bytes().to_vec()),
            None => Bound::Included(prefix.as_bytes().to_vec()),
        };

        let mut keys = Vec::with_capacity(count);
        for item in self.data.range((start, Bound::<Vec<u8>>::Unbounded)) {
            let (key, _) = item?;
            if !key.starts_with(prefix.as_bytes()) || keys.len() >= count {
                break;
            }
            keys.push(String::from_utf8_lossy(&key).to_string());
        }
        Ok(keys)
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.keyspace.persist(PersistMode::SyncAll)?;
        debug!("fjall gateway closed");
        // fjall handles cleanup on drop
        Ok(())
    }
}
