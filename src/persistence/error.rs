//! Persistence error types.

use std::fmt;

/// Errors that can occur during persistence operations.
#[derive(Debug)]
pub enum PersistenceError {
    /// The key-value store could not be reached or the connection is closed
    Unavailable(String),
    /// A record required by a two-step update or clear does not exist
    NotFound(String),
    /// The decisive write of a multi-command transaction did not succeed
    TransactionFailed(String),
    /// The caller passed a packet missing a field the operation keys on
    InvalidPacket(String),
    /// Storage backend error
    Storage(String),
    /// Serialization error
    Serialize(String),
    /// Deserialization error
    Deserialize(String),
    /// IO error
    Io(std::io::Error),
}

impl PersistenceError {
    /// Shorthand used by lookups that found nothing.
    pub(crate) fn no_such_packet() -> Self {
        Self::NotFound("no such packet".to_string())
    }

    /// Whether the caller should treat this as "nothing to acknowledge".
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Copy of this error for fanning one batch failure out to many waiters.
    pub(crate) fn replicate(&self) -> Self {
        match self {
            Self::Unavailable(e) => Self::Unavailable(e.clone()),
            Self::NotFound(e) => Self::NotFound(e.clone()),
            Self::TransactionFailed(e) => Self::TransactionFailed(e.clone()),
            Self::InvalidPacket(e) => Self::InvalidPacket(e.clone()),
            Self::Storage(e) => Self::Storage(e.clone()),
            Self::Serialize(e) => Self::Serialize(e.clone()),
            Self::Deserialize(e) => Self::Deserialize(e.clone()),
            Self::Io(e) => Self::Io(std::io::Error::new(e.kind(), e.to_string())),
        }
    }
}

impl fmt::Display for PersistenceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unavailable(e) => write!(f, "store unavailable: {}", e),
            Self::NotFound(e) => write!(f, "not found: {}", e),
            Self::TransactionFailed(e) => write!(f, "transaction failed: {}", e),
            Self::InvalidPacket(e) => write!(f, "invalid packet: {}", e),
            Self::Storage(e) => write!(f, "storage error: {}", e),
            Self::Serialize(e) => write!(f, "serialization error: {}", e),
            Self::Deserialize(e) => write!(f, "deserialization error: {}", e),
            Self::Io(e) => write!(f, "IO error: {}", e),
        }
    }
}

impl std::error::Error for PersistenceError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for PersistenceError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<fjall::Error> for PersistenceError {
    fn from(err: fjall::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

impl From<bincode::error::EncodeError> for PersistenceError {
    fn from(err: bincode::error::EncodeError) -> Self {
        Self::Serialize(err.to_string())
    }
}

impl From<bincode::error::DecodeError> for PersistenceError {
    fn from(err: bincode::error::DecodeError) -> Self {
        Self::Deserialize(err.to_string())
    }
}

/// Result type for persistence operations.
pub type Result<T> = std::result::Result<T, PersistenceError>;
