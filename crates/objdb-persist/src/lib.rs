//! Managed object store for objdb.
//!
//! Ties the environment, the object-id index, and the collection store
//! together behind [`ManagedObjectStore`]: object saves and deletes that keep
//! records, collection entries, and id membership consistent within a
//! transaction.
//!
//! # Key Types
//!
//! - [`ManagedObjectStore`] -- save, load, delete, roots, id allocation
//! - [`ManagedObject`] -- serialized state plus dirty/new bookkeeping
//! - [`PersistenceConfig`] -- every component's settings, loadable from TOML
//!
//! # Design Rules
//!
//! 1. Multi-object writes go out in ascending id order.
//! 2. New ids reach the index as WAL entries in the saving transaction;
//!    the bitmaps are only ever touched by checkpoint passes.
//! 3. `delete_all` removes collection entries before the records that own
//!    them.

pub mod config;
pub mod error;
pub mod object;
pub mod store;

pub use config::{PersistenceConfig, StoreConfig};
pub use error::{PersistError, PersistResult};
pub use object::ManagedObject;
pub use store::{ManagedObjectStore, StoreStats, OBJECT_ID_SEQUENCE_NAME};
