use crate::traits::{Database, OpStatus};

/// Errors from the key-value engine contract.
#[derive(Debug, thiserror::Error)]
pub enum KvError {
    /// An engine operation returned a status the caller could not accept.
    #[error("{op} on {db} failed for key {key}: status {status:?}")]
    Operation {
        op: &'static str,
        db: String,
        key: String,
        status: OpStatus,
    },

    /// The database handle was closed or never opened.
    #[error("database not open: {0}")]
    DatabaseClosed(String),

    /// The engine handle has been closed.
    #[error("engine is closed")]
    EngineClosed,

    /// The engine handle could not be acquired (e.g. lock held after a crash).
    #[error("engine unavailable: {0}")]
    Unavailable(String),

    /// A failure injected by a test backend.
    #[error("injected failure: {0}")]
    Injected(String),
}

impl KvError {
    /// Build an [`KvError::Operation`] with a hex-rendered key.
    pub fn operation(op: &'static str, db: &Database, key: &[u8], status: OpStatus) -> Self {
        Self::Operation {
            op,
            db: db.name().to_string(),
            key: hex::encode(key),
            status,
        }
    }
}

/// Result alias for engine operations.
pub type KvResult<T> = Result<T, KvError>;
