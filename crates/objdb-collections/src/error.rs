use objdb_kv::KvError;
use objdb_types::{ObjectId, ObjectKind, TypeError};

/// Errors from the collection store.
#[derive(Debug, thiserror::Error)]
pub enum CollectionError {
    #[error("storage error: {0}")]
    Kv(#[from] KvError),

    #[error("type error: {0}")]
    Type(#[from] TypeError),

    /// Collections must belong to a real object.
    #[error("collection owner cannot be the null id")]
    NullOwner,

    /// The object kind is not stored in the collection store.
    #[error("object {id} of kind {kind} is not a persistable collection")]
    NotACollection { id: ObjectId, kind: ObjectKind },

    #[error("invalid collection configuration: {0}")]
    InvalidConfig(String),
}

pub type CollectionResult<T> = Result<T, CollectionError>;
