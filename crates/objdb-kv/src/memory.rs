use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use tracing::debug;

use crate::error::{KvError, KvResult};
use crate::traits::{
    Database, EngineStats, KvBackend, KvEngine, OpStatus, SeekBound, Transaction,
};

type Table = BTreeMap<Vec<u8>, Vec<u8>>;

/// Committed data shared by every engine opened from one [`MemoryBackend`].
///
/// This plays the role of the on-disk files: closing an engine and opening a
/// new one from the same backend sees everything committed before. Test
/// helpers here read and seed tables directly and inject faults.
pub struct MemoryStore {
    tables: RwLock<HashMap<String, Table>>,
    open_log: Mutex<Vec<String>>,
    commit_failures: AtomicU32,
}

impl MemoryStore {
    fn new() -> Self {
        Self {
            tables: RwLock::new(HashMap::new()),
            open_log: Mutex::new(Vec::new()),
            commit_failures: AtomicU32::new(0),
        }
    }

    /// All committed records of a database, in key order.
    pub fn records(&self, name: &str) -> Vec<(Vec<u8>, Vec<u8>)> {
        let tables = self.tables.read().expect("lock poisoned");
        tables
            .get(name)
            .map(|t| t.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default()
    }

    /// Number of committed records in a database.
    pub fn len(&self, name: &str) -> usize {
        let tables = self.tables.read().expect("lock poisoned");
        tables.get(name).map(|t| t.len()).unwrap_or(0)
    }

    /// Read one committed record.
    pub fn get(&self, name: &str, key: &[u8]) -> Option<Vec<u8>> {
        let tables = self.tables.read().expect("lock poisoned");
        tables.get(name).and_then(|t| t.get(key).cloned())
    }

    /// Write a record directly, bypassing transactions.
    pub fn put_raw(&self, name: &str, key: &[u8], value: &[u8]) {
        let mut tables = self.tables.write().expect("lock poisoned");
        tables
            .entry(name.to_string())
            .or_default()
            .insert(key.to_vec(), value.to_vec());
    }

    /// Names of databases opened so far, in open order, across all engines.
    pub fn open_log(&self) -> Vec<String> {
        self.open_log.lock().expect("lock poisoned").clone()
    }

    pub fn clear_open_log(&self) {
        self.open_log.lock().expect("lock poisoned").clear();
    }

    /// Make the next `n` commits fail with [`KvError::Injected`].
    pub fn fail_next_commits(&self, n: u32) {
        self.commit_failures.store(n, Ordering::SeqCst);
    }

    fn take_commit_failure(&self) -> bool {
        self.commit_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tables = self.tables.read().expect("lock poisoned");
        f.debug_struct("MemoryStore")
            .field("table_count", &tables.len())
            .finish()
    }
}

/// Backend that hands out [`MemoryEngine`] handles over one shared store.
pub struct MemoryBackend {
    store: Arc<MemoryStore>,
    open_failures: AtomicU32,
    opens: AtomicU32,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            store: Arc::new(MemoryStore::new()),
            open_failures: AtomicU32::new(0),
            opens: AtomicU32::new(0),
        }
    }

    /// The shared committed data.
    pub fn store(&self) -> Arc<MemoryStore> {
        Arc::clone(&self.store)
    }

    /// Make the next `n` engine opens fail with [`KvError::Unavailable`].
    pub fn fail_next_opens(&self, n: u32) {
        self.open_failures.store(n, Ordering::SeqCst);
    }

    /// Number of open attempts, failed ones included.
    pub fn open_attempts(&self) -> u32 {
        self.opens.load(Ordering::SeqCst)
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl KvBackend for MemoryBackend {
    fn open(&self) -> KvResult<Arc<dyn KvEngine>> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .open_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(KvError::Unavailable("environment lock held".to_string()));
        }
        Ok(Arc::new(MemoryEngine::new(self.store())))
    }
}

struct EngineState {
    closed: bool,
    next_id: u32,
    open: HashMap<u32, String>,
}

struct Shared {
    store: Arc<MemoryStore>,
    state: Mutex<EngineState>,
    committed: AtomicU64,
    aborted: AtomicU64,
}

impl Shared {
    fn table_name(&self, db: &Database) -> KvResult<String> {
        let state = self.state.lock().expect("lock poisoned");
        if state.closed {
            return Err(KvError::EngineClosed);
        }
        state
            .open
            .get(&db.id())
            .cloned()
            .ok_or_else(|| KvError::DatabaseClosed(db.name().to_string()))
    }
}

/// In-memory engine handle.
///
/// Writes are buffered per transaction and applied atomically at commit.
/// There are no record locks: concurrent transactions never block each
/// other, and the last committer wins.
pub struct MemoryEngine {
    shared: Arc<Shared>,
}

impl MemoryEngine {
    pub fn new(store: Arc<MemoryStore>) -> Self {
        Self {
            shared: Arc::new(Shared {
                store,
                state: Mutex::new(EngineState {
                    closed: false,
                    next_id: 1,
                    open: HashMap::new(),
                }),
                committed: AtomicU64::new(0),
                aborted: AtomicU64::new(0),
            }),
        }
    }
}

impl KvEngine for MemoryEngine {
    fn open_database(&self, name: &str) -> KvResult<Database> {
        let mut state = self.shared.state.lock().expect("lock poisoned");
        if state.closed {
            return Err(KvError::EngineClosed);
        }
        let id = state.next_id;
        state.next_id += 1;
        state.open.insert(id, name.to_string());
        drop(state);

        self.shared
            .store
            .tables
            .write()
            .expect("lock poisoned")
            .entry(name.to_string())
            .or_default();
        self.shared
            .store
            .open_log
            .lock()
            .expect("lock poisoned")
            .push(name.to_string());
        debug!(db = name, id, "database opened");
        Ok(Database::new(id, name))
    }

    fn close_database(&self, db: &Database) -> KvResult<()> {
        let mut state = self.shared.state.lock().expect("lock poisoned");
        if state.closed {
            return Err(KvError::EngineClosed);
        }
        state
            .open
            .remove(&db.id())
            .map(|_| ())
            .ok_or_else(|| KvError::DatabaseClosed(db.name().to_string()))
    }

    fn begin(&self) -> KvResult<Box<dyn Transaction>> {
        if self.shared.state.lock().expect("lock poisoned").closed {
            return Err(KvError::EngineClosed);
        }
        Ok(Box::new(MemoryTransaction {
            shared: Arc::clone(&self.shared),
            writes: BTreeMap::new(),
        }))
    }

    fn close(&self) -> KvResult<()> {
        let mut state = self.shared.state.lock().expect("lock poisoned");
        if state.closed {
            return Err(KvError::EngineClosed);
        }
        state.closed = true;
        state.open.clear();
        Ok(())
    }

    fn stats(&self) -> EngineStats {
        let open_databases = self.shared.state.lock().expect("lock poisoned").open.len();
        EngineStats {
            open_databases,
            transactions_committed: self.shared.committed.load(Ordering::Relaxed),
            transactions_aborted: self.shared.aborted.load(Ordering::Relaxed),
        }
    }
}

/// Pending writes keyed by (table, key); `None` marks a delete.
type WriteSet = BTreeMap<(String, Vec<u8>), Option<Vec<u8>>>;

struct MemoryTransaction {
    shared: Arc<Shared>,
    writes: WriteSet,
}

impl MemoryTransaction {
    fn lookup(&self, table: &str, key: &[u8]) -> Option<Vec<u8>> {
        if let Some(pending) = self.writes.get(&(table.to_string(), key.to_vec())) {
            return pending.clone();
        }
        let tables = self.shared.store.tables.read().expect("lock poisoned");
        tables.get(table).and_then(|t| t.get(key).cloned())
    }

    fn pending_range(
        &self,
        table: &str,
        key: &[u8],
        bound: SeekBound,
    ) -> impl Iterator<Item = (&Vec<u8>, &Option<Vec<u8>>)> {
        let start = (table.to_string(), key.to_vec());
        let lower = match bound {
            SeekBound::Inclusive => Bound::Included(start),
            SeekBound::Exclusive => Bound::Excluded(start),
        };
        let table = table.to_string();
        self.writes
            .range((lower, Bound::Unbounded))
            .take_while(move |((t, _), _)| *t == table)
            .map(|((_, k), v)| (k, v))
    }
}

fn lower_bound(key: &[u8], bound: SeekBound) -> Bound<Vec<u8>> {
    match bound {
        SeekBound::Inclusive => Bound::Included(key.to_vec()),
        SeekBound::Exclusive => Bound::Excluded(key.to_vec()),
    }
}

impl Transaction for MemoryTransaction {
    fn get(&mut self, db: &Database, key: &[u8]) -> KvResult<Option<Vec<u8>>> {
        let table = self.shared.table_name(db)?;
        Ok(self.lookup(&table, key))
    }

    fn put(&mut self, db: &Database, key: &[u8], value: &[u8]) -> KvResult<OpStatus> {
        let table = self.shared.table_name(db)?;
        self.writes.insert((table, key.to_vec()), Some(value.to_vec()));
        Ok(OpStatus::Success)
    }

    fn put_no_overwrite(
        &mut self,
        db: &Database,
        key: &[u8],
        value: &[u8],
    ) -> KvResult<OpStatus> {
        let table = self.shared.table_name(db)?;
        if self.lookup(&table, key).is_some() {
            return Ok(OpStatus::KeyExists);
        }
        self.writes.insert((table, key.to_vec()), Some(value.to_vec()));
        Ok(OpStatus::Success)
    }

    fn delete(&mut self, db: &Database, key: &[u8]) -> KvResult<OpStatus> {
        let table = self.shared.table_name(db)?;
        if self.lookup(&table, key).is_none() {
            return Ok(OpStatus::NotFound);
        }
        self.writes.insert((table, key.to_vec()), None);
        Ok(OpStatus::Success)
    }

    fn seek(
        &mut self,
        db: &Database,
        key: &[u8],
        bound: SeekBound,
    ) -> KvResult<Option<(Vec<u8>, Vec<u8>)>> {
        let table = self.shared.table_name(db)?;

        // First committed entry not shadowed by a pending delete.
        let committed = {
            let tables = self.shared.store.tables.read().expect("lock poisoned");
            tables.get(&table).and_then(|t| {
                t.range((lower_bound(key, bound), Bound::Unbounded))
                    .find(|(k, _)| {
                        !matches!(self.writes.get(&(table.clone(), (*k).clone())), Some(None))
                    })
                    .map(|(k, v)| (k.clone(), v.clone()))
            })
        };

        let pending = self
            .pending_range(&table, key, bound)
            .find_map(|(k, v)| v.as_ref().map(|v| (k.clone(), v.clone())));

        Ok(match (committed, pending) {
            (Some(c), Some(p)) => Some(if p.0 <= c.0 { p } else { c }),
            (c, None) => c,
            (None, p) => p,
        })
    }

    fn commit(self: Box<Self>) -> KvResult<()> {
        let MemoryTransaction { shared, writes } = *self;
        if shared.state.lock().expect("lock poisoned").closed {
            return Err(KvError::EngineClosed);
        }
        if shared.store.take_commit_failure() {
            shared.aborted.fetch_add(1, Ordering::Relaxed);
            return Err(KvError::Injected("commit".to_string()));
        }
        let count = writes.len();
        let mut tables = shared.store.tables.write().expect("lock poisoned");
        for ((table, key), value) in writes {
            let t = tables.entry(table).or_default();
            match value {
                Some(v) => {
                    t.insert(key, v);
                }
                None => {
                    t.remove(&key);
                }
            }
        }
        drop(tables);
        shared.committed.fetch_add(1, Ordering::Relaxed);
        debug!(writes = count, "transaction committed");
        Ok(())
    }

    fn abort(self: Box<Self>) -> KvResult<()> {
        self.shared.aborted.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}
