//! Transactional key-value contract consumed by objdb.
//!
//! objdb does not implement a storage engine. It consumes an ordered
//! byte-key store with transactions and cursors through the traits in
//! [`traits`], and acquires engine handles through a [`KvBackend`].
//!
//! # Backends
//!
//! - [`MemoryBackend`] -- `BTreeMap`-based engine for tests and embedding.
//!   Committed data lives in a shared [`MemoryStore`] that survives engine
//!   close/reopen, which is what crash and restart tests need.
//! - [`RecordingBackend`] -- wraps another backend and records every
//!   underlying write in issue order.
//!
//! # Contract
//!
//! 1. Keys compare byte-wise; cursors visit keys in ascending order.
//! 2. A transaction sees its own writes. Nothing is visible to others
//!    until commit, and commit applies all writes or none.
//! 3. `put_no_overwrite` reports [`OpStatus::KeyExists`] instead of writing.
//! 4. Operations on a closed database or engine fail; they never no-op.

pub mod cursor;
pub mod error;
pub mod memory;
pub mod recording;
pub mod traits;

pub use cursor::Cursor;
pub use error::{KvError, KvResult};
pub use memory::{MemoryBackend, MemoryEngine, MemoryStore};
pub use recording::{RecordedWrite, RecordingBackend, WriteKind};
pub use traits::{
    with_transaction, Database, EngineStats, KvBackend, KvEngine, OpStatus, SeekBound, Transaction,
};
