use objdb_kv::KvError;
use objdb_types::TypeError;

use crate::environment::EnvState;

/// Errors from environment, sequence, and root operations.
#[derive(Debug, thiserror::Error)]
pub enum EnvError {
    /// The operation is not legal in the environment's current state.
    #[error("environment is {state}: cannot {action}")]
    Lifecycle {
        state: EnvState,
        action: &'static str,
    },

    /// The previous run did not close cleanly.
    #[error("environment was not shut down cleanly; recovery required")]
    RecoveryRequired,

    /// An expected record is missing or does not decode.
    #[error("data integrity: {0}")]
    DataIntegrity(String),

    /// A thread panicked while holding the named lock.
    #[error("{0} lock poisoned")]
    LockPoisoned(String),

    #[error("storage error: {0}")]
    Kv(#[from] KvError),

    #[error("type error: {0}")]
    Type(#[from] TypeError),

    /// The first failure seen while closing. The environment is closed anyway.
    #[error("error while closing environment: {0}")]
    Close(#[source] KvError),
}

pub type EnvResult<T> = Result<T, EnvError>;
