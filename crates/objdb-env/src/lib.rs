//! Environment lifecycle for objdb.
//!
//! An [`Environment`] opens and closes the fixed set of named stores as one
//! unit on top of a [`KvBackend`](objdb_kv::KvBackend), and keeps a clean/dirty
//! flag in a separate control store so that a run which never reached
//! `close()` is detected by the next `open()`.
//!
//! # Key Types
//!
//! - [`Environment`] -- the lifecycle state machine
//! - [`DatabaseName`] -- the fixed set of data stores
//! - [`PersistentSequence`] / [`BatchedSequence`] -- durable counters
//! - [`RootStore`] -- named GC roots
//!
//! # Design Rules
//!
//! 1. A dirty environment is reported, never repaired. `open()` returns
//!    [`OpenOutcome::Dirty`] without opening a data store or writing a byte.
//! 2. Only acquiring the engine handle is retried. Every other failure moves
//!    the environment to [`EnvState::Error`] and later calls fail fast.
//! 3. `close()` always ends in [`EnvState::Closed`], even when it reports an
//!    error.

pub mod config;
pub mod environment;
pub mod error;
pub mod roots;
pub mod sequence;

pub use config::{DurabilityMode, EnvironmentConfig};
pub use environment::{
    DatabaseName, EnvState, Environment, EnvironmentStats, OpenOutcome, CLEAN_FLAG_KEY,
    CONTROL_DATABASE,
};
pub use error::{EnvError, EnvResult};
pub use roots::RootStore;
pub use sequence::{BatchedSequence, PersistentSequence};
