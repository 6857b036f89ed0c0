//! Command semantics shared by the gateways.
//!
//! Commands are applied to an [`Overlay`]: writes are staged on top of a
//! read-only view of the store, and the gateway commits the staged writes
//! once the whole pipeline step or transaction has been applied.

use std::collections::BTreeMap;

use bincode::{Decode, Encode};
use bytes::Bytes;

use super::{Command, Reply};
use crate::persistence::{PersistenceError, Result};

const WRONGTYPE: &str = "WRONGTYPE Operation against a key holding the wrong kind of value";

/// A value held under one key
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub(crate) enum Value {
    Bytes(Vec<u8>),
    Hash(BTreeMap<String, Vec<u8>>),
}

/// Read access to committed values
pub(crate) trait ValueStore {
    fn load(&self, key: &str) -> Result<Option<Value>>;
}

impl ValueStore for BTreeMap<String, Value> {
    fn load(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.get(key).cloned())
    }
}

/// Staged writes, `None` meaning delete
pub(crate) type Writes = BTreeMap<String, Option<Value>>;

pub(crate) struct Overlay<'a, S: ValueStore + ?Sized> {
    base: &'a S,
    writes: Writes,
}

impl<'a, S: ValueStore + ?Sized> Overlay<'a, S> {
    pub(crate) fn new(base: &'a S) -> Self {
        Self {
            base,
            writes: BTreeMap::new(),
        }
    }

    pub(crate) fn into_writes(self) -> Writes {
        self.writes
    }

    fn get(&self, key: &str) -> Result<Option<Value>> {
        match self.writes.get(key) {
            Some(staged) => Ok(staged.clone()),
            None => self.base.load(key),
        }
    }

    fn put(&mut self, key: &str, value: Value) {
        self.writes.insert(key.to_string(), Some(value));
    }

    fn remove(&mut self, key: &str) {
        self.writes.insert(key.to_string(), None);
    }

    fn hash(&self, key: &str) -> Result<BTreeMap<String, Vec<u8>>> {
        match self.get(key)? {
            None => Ok(BTreeMap::new()),
            Some(Value::Hash(fields)) => Ok(fields),
            Some(Value::Bytes(_)) => Err(PersistenceError::Storage(WRONGTYPE.to_string())),
        }
    }

    /// Store a hash, dropping the key once its last field is gone
    fn put_hash(&mut self, key: &str, fields: BTreeMap<String, Vec<u8>>) {
        if fields.is_empty() {
            self.remove(key);
        } else {
            self.put(key, Value::Hash(fields));
        }
    }

    pub(crate) fn apply(&mut self, command: &Command) -> Result<Reply> {
        match command {
            Command::Get(key) => match self.get(key)? {
                None => Ok(Reply::Nil),
                Some(Value::Bytes(bytes)) => Ok(Reply::Bulk(Bytes::from(bytes))),
                Some(Value::Hash(_)) => Err(PersistenceError::Storage(WRONGTYPE.to_string())),
            },
            Command::Set(key, value) => {
                self.put(key, Value::Bytes(value.to_vec()));
                Ok(Reply::Ok)
            }
            Command::Del(key) => {
                let existed = self.get(key)?.is_some();
                if existed {
                    self.remove(key);
                }
                Ok(Reply::Int(existed as i64))
            }
            Command::Exists(key) => Ok(Reply::Int(self.get(key)?.is_some() as i64)),
            Command::HSet(key, fields) => {
                let mut hash = self.hash(key)?;
                let mut created = 0;
                for (field, value) in fields {
                    if hash.insert(field.clone(), value.to_vec()).is_none() {
                        created += 1;
                    }
                }
                self.put_hash(key, hash);
                Ok(Reply::Int(created))
            }
            Command::HGetAll(key) => {
                let fields = self
                    .hash(key)?
                    .into_iter()
                    .map(|(field, value)| (field, Bytes::from(value)))
                    .collect();
                Ok(Reply::Hash(fields))
            }
            Command::HDel(key, field) => {
                let mut hash = self.hash(key)?;
                let removed = hash.remove(field).is_some();
                if removed {
                    self.put_hash(key, hash);
                }
                Ok(Reply::Int(removed as i64))
            }
            Command::HLen(key) => Ok(Reply::Int(self.hash(key)?.len() as i64)),
            Command::IncrBy(key, delta) => {
                let current = match self.get(key)? {
                    None => 0,
                    Some(Value::Bytes(raw)) => std::str::from_utf8(&raw)
                        .ok()
                        .and_then(|s| s.parse::<i64>().ok())
                        .ok_or_else(|| {
                            PersistenceError::Storage(
                                "value is not an integer or out of range".to_string(),
                            )
                        })?,
                    Some(Value::Hash(_)) => {
                        return Err(PersistenceError::Storage(WRONGTYPE.to_string()))
                    }
                };
                let next = current.checked_add(*delta).ok_or_else(|| {
                    PersistenceError::Storage("increment would overflow".to_string())
                })?;
                self.put(key, Value::Bytes(next.to_string().into_bytes()));
                Ok(Reply::Int(next))
            }
        }
    }
}
