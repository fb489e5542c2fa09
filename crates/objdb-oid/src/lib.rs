//! Object-id membership index for objdb.
//!
//! The commit path never touches a bitmap. Each committed batch of adds or
//! deletes becomes one WAL entry in the `oid_store_log` store; a checkpoint
//! pass later merges WAL entries, in sequence order, into three compressed
//! bitmaps (all objects, persistable collections, evictable objects).
//!
//! # Key Types
//!
//! - [`BitmapIdIndex`] -- WAL append, checkpoint pass, on-disk membership
//! - [`CheckpointRunner`] -- background checkpoint thread with adaptive pacing
//! - [`ObjectIdSet`] -- write-once id set filled at startup
//! - [`ObjectIdManager`] -- one interface over the [`IndexStrategy`] variants
//!
//! # Design Rules
//!
//! 1. WAL entries apply in strict sequence order; a pass consumes a prefix
//!    of the log and never skips an entry.
//! 2. A pass merges and deletes its WAL entries in one transaction, so a
//!    failed or cancelled pass leaves every entry for the next one.
//! 3. All bitmap mutation is serialized by one mutex per index.
//! 4. An all-zero blob is deleted, never stored.

mod cache;
pub mod codec;
pub mod config;
pub mod error;
pub mod idset;
pub mod index;
pub mod manager;
pub mod population;
pub mod runner;

pub use codec::{Blob, WalOp};
pub use config::OidIndexConfig;
pub use error::{OidError, OidResult};
pub use idset::ObjectIdSet;
pub use index::{
    BitmapIdIndex, BitmapKind, CheckpointReport, CheckpointStats, IndexStores, WAL_SEQUENCE_NAME,
};
pub use manager::{IndexStrategy, ObjectIdManager, RelaxedIdIndex};
pub use population::{spawn_full_scan, spawn_population, IdSets, PopulationHandle};
pub use runner::{AdaptiveSchedule, CheckpointRunner, ShutdownSignal};
