use objdb_env::EnvError;
use objdb_kv::KvError;
use objdb_types::TypeError;

/// Errors from the object-id index.
#[derive(Debug, thiserror::Error)]
pub enum OidError {
    #[error("storage error: {0}")]
    Kv(#[from] KvError),

    #[error("environment error: {0}")]
    Env(#[from] EnvError),

    #[error("type error: {0}")]
    Type(#[from] TypeError),

    /// A WAL entry whose key or value does not decode.
    #[error("corrupt WAL entry {key}: {reason}")]
    CorruptWal { key: String, reason: String },

    /// A bitmap blob whose key or value does not decode.
    #[error("corrupt bitmap blob {key}: {reason}")]
    CorruptBlob { key: String, reason: String },

    /// Startup reconstruction did not complete. The id set holds only what
    /// was read before the failure.
    #[error("id population failed: {0}")]
    PopulationFailed(String),

    /// A thread panicked while holding the named lock.
    #[error("{0} lock poisoned")]
    LockPoisoned(String),

    #[error("invalid index configuration: {0}")]
    InvalidConfig(String),

    /// A background thread could not be spawned.
    #[error("thread spawn failed: {0}")]
    Spawn(#[from] std::io::Error),
}

pub type OidResult<T> = Result<T, OidError>;
