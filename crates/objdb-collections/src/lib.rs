//! Delta-tracked persistence of large maps and sets.
//!
//! A persistent collection is stored as one record per element in the
//! `collections` store, keyed by the owning object's id followed by the
//! element key. Saving a collection writes only what changed since it was
//! loaded.
//!
//! # Key Types
//!
//! - [`PersistentCollection`] -- baseline plus pending writes, tombstones
//!   and a clear marker
//! - [`CollectionDeltaStore`] -- commit, load, and delete against the store
//!
//! # Design Rules
//!
//! 1. A commit applies the clear first, then writes, then tombstones, so an
//!    entry added after a clear survives it.
//! 2. Owner prefixes are exactly 8 bytes; a scan for one owner stops at the
//!    first key of any other owner.

pub mod collection;
pub mod config;
pub mod error;
pub mod store;

pub use collection::{CollectionKind, EntryState, PersistentCollection};
pub use config::CollectionConfig;
pub use error::{CollectionError, CollectionResult};
pub use store::{entry_key, CollectionDeltaStore};
