//! In-process gateway backed by an ordered map.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use super::value::{Overlay, Value, Writes};
use super::{Command, KvGateway, Reply};
use crate::persistence::{PersistenceError, Result};

/// Gateway keeping everything in memory
#[derive(Default)]
pub struct MemoryGateway {
    data: Mutex<BTreeMap<String, Value>>,
    closed: AtomicBool,
}

impl MemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys currently stored
    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.data.lock().len()
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.data.lock().is_empty()
    }

    fn check_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(PersistenceError::Unavailable("connection closed".to_string()));
        }
        Ok(())
    }

    fn commit(data: &mut BTreeMap<String, Value>, writes: Writes) {
        for (key, value) in writes {
            match value {
                Some(value) => {
                    data.insert(key, value);
                }
                None => {
                    data.remove(&key);
                }
            }
        }
    }
}

#[async_trait]
impl KvGateway for MemoryGateway {
    async fn pipeline(&self, commands: Vec<Command>) -> Result<Vec<Result<Reply>>> {
        self.check_open()?;

        let mut data = self.data.lock();
        let mut results = Vec::with_capacity(commands.len());
        for command in &commands {
            let mut overlay = Overlay::new(&*data);
            let result = overlay.apply(command);
            let writes = overlay.into_writes();
            Self::commit(&mut data, writes);
            results.push(result);
        }
        Ok(results)
    }

    async fn transaction(&self, commands: Vec<Command>) -> Result<Vec<Reply>> {
        self.check_open()?;

        let mut data = self.data.lock();
        let mut overlay = Overlay::new(&*data);
        let mut replies = Vec::with_capacity(commands.len());
        for command in &commands {
            let reply = overlay
                .apply(command)
                .map_err(|e| PersistenceError::TransactionFailed(e.to_string()))?;
            replies.push(reply);
        }
        let writes = overlay.into_writes();
        Self::commit(&mut data, writes);
        Ok(replies)
    }

    async fn scan(&self, prefix: &str, after: Option<&str>, count: usize) -> Result<Vec<String>> {
        self.check_open()?;

        let start = match after {
            Some(cursor) => Bound::Excluded(cursor),
            None => Bound::Included(prefix),
        };

        let data = self.data.lock();
        let keys = data
            .range::<str, _>((start, Bound::Unbounded))
            .map(|(key, _)| key)
            .take_while(|key| key.starts_with(prefix))
            .take(count)
            .cloned()
            .collect();
        Ok(keys)
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}
