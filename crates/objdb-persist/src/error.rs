use objdb_collections::CollectionError;
use objdb_env::EnvError;
use objdb_kv::KvError;
use objdb_oid::OidError;
use objdb_types::TypeError;

/// Errors from the managed object store.
#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    #[error("environment error: {0}")]
    Env(#[from] EnvError),

    #[error("object id index error: {0}")]
    Oid(#[from] OidError),

    #[error("collection error: {0}")]
    Collection(#[from] CollectionError),

    #[error("storage error: {0}")]
    Kv(#[from] KvError),

    #[error("type error: {0}")]
    Type(#[from] TypeError),

    /// A record is missing, duplicated, or disagrees with the caller.
    #[error("data integrity: {0}")]
    DataIntegrity(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type PersistResult<T> = Result<T, PersistError>;
