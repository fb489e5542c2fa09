//! The engine, transaction, and backend traits.

use std::fmt;
use std::sync::Arc;

use tracing::warn;

use crate::error::{KvError, KvResult};

/// Handle to a named database inside an engine.
///
/// Handles are cheap to clone. The id is assigned by the engine that opened
/// the database and is only meaningful to that engine.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Database {
    id: u32,
    name: Arc<str>,
}

impl Database {
    pub fn new(id: u32, name: &str) -> Self {
        Self {
            id,
            name: Arc::from(name),
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Database({}#{})", self.name, self.id)
    }
}

impl fmt::Display for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Status of a single-record operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OpStatus {
    Success,
    NotFound,
    KeyExists,
}

/// Where a seek lands relative to the target key.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SeekBound {
    /// First key `>=` the target.
    Inclusive,
    /// First key `>` the target.
    Exclusive,
}

/// One engine transaction.
///
/// All reads and writes go through a transaction. Dropping a transaction
/// without calling `commit` or `abort` discards its writes.
pub trait Transaction: Send {
    /// Point lookup. Returns `Ok(None)` if the key does not exist.
    fn get(&mut self, db: &Database, key: &[u8]) -> KvResult<Option<Vec<u8>>>;

    /// Insert or overwrite.
    fn put(&mut self, db: &Database, key: &[u8], value: &[u8]) -> KvResult<OpStatus>;

    /// Insert only if absent; returns [`OpStatus::KeyExists`] otherwise.
    fn put_no_overwrite(&mut self, db: &Database, key: &[u8], value: &[u8])
        -> KvResult<OpStatus>;

    /// Delete a key; returns [`OpStatus::NotFound`] if it did not exist.
    fn delete(&mut self, db: &Database, key: &[u8]) -> KvResult<OpStatus>;

    /// Return the first entry at or after `key` according to `bound`.
    ///
    /// This is the single positioning primitive that [`Cursor`] is built on.
    ///
    /// [`Cursor`]: crate::cursor::Cursor
    fn seek(
        &mut self,
        db: &Database,
        key: &[u8],
        bound: SeekBound,
    ) -> KvResult<Option<(Vec<u8>, Vec<u8>)>>;

    /// Make all writes durable and visible.
    fn commit(self: Box<Self>) -> KvResult<()>;

    /// Discard all writes.
    fn abort(self: Box<Self>) -> KvResult<()>;
}

/// Counters reported by an engine.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EngineStats {
    pub open_databases: usize,
    pub transactions_committed: u64,
    pub transactions_aborted: u64,
}

/// An open engine handle.
pub trait KvEngine: Send + Sync {
    /// Open (creating if needed) the named database.
    fn open_database(&self, name: &str) -> KvResult<Database>;

    /// Close a database handle. Later operations on it fail.
    fn close_database(&self, db: &Database) -> KvResult<()>;

    /// Begin a new transaction.
    fn begin(&self) -> KvResult<Box<dyn Transaction>>;

    /// Close the engine handle. Open databases are closed with it.
    fn close(&self) -> KvResult<()>;

    fn stats(&self) -> EngineStats;
}

/// Acquires engine handles. This is the step the environment retries.
pub trait KvBackend: Send + Sync {
    fn open(&self) -> KvResult<Arc<dyn KvEngine>>;
}

/// Run `f` in a fresh transaction: commit on `Ok`, abort on `Err`.
///
/// The error from `f` always wins; an abort failure is only logged.
pub fn with_transaction<T, E, F>(engine: &dyn KvEngine, f: F) -> Result<T, E>
where
    E: From<KvError>,
    F: FnOnce(&mut dyn Transaction) -> Result<T, E>,
{
    let mut tx = engine.begin()?;
    match f(tx.as_mut()) {
        Ok(value) => {
            tx.commit()?;
            Ok(value)
        }
        Err(e) => {
            if let Err(abort_err) = tx.abort() {
                warn!(error = %abort_err, "abort after failed operation also failed");
            }
            Err(e)
        }
    }
}
