//! The environment lifecycle state machine.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;

use objdb_kv::{with_transaction, Database, EngineStats, KvBackend, KvEngine, KvError};
use tracing::{debug, error, info, warn};

use crate::config::EnvironmentConfig;
use crate::error::{EnvError, EnvResult};

/// Name of the store that holds the clean flag.
pub const CONTROL_DATABASE: &str = "control";

/// Key of the clean flag inside the control store.
pub const CLEAN_FLAG_KEY: &[u8] = &[0x01];

const CLEAN: u8 = 1;
const DIRTY: u8 = 2;

/// The data stores opened and closed as one unit.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DatabaseName {
    GlobalSequence,
    Objects,
    ObjectOidStore,
    MapsOidStore,
    OidStoreLog,
    EvictableOidStore,
    Roots,
    ClientState,
    Transactions,
    StringIndex,
    ClassDefinitions,
    Collections,
    ClusterState,
}

impl DatabaseName {
    pub const ALL: [DatabaseName; 13] = [
        DatabaseName::GlobalSequence,
        DatabaseName::Objects,
        DatabaseName::ObjectOidStore,
        DatabaseName::MapsOidStore,
        DatabaseName::OidStoreLog,
        DatabaseName::EvictableOidStore,
        DatabaseName::Roots,
        DatabaseName::ClientState,
        DatabaseName::Transactions,
        DatabaseName::StringIndex,
        DatabaseName::ClassDefinitions,
        DatabaseName::Collections,
        DatabaseName::ClusterState,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            DatabaseName::GlobalSequence => "global_sequence",
            DatabaseName::Objects => "objects",
            DatabaseName::ObjectOidStore => "object_oid_store",
            DatabaseName::MapsOidStore => "maps_oid_store",
            DatabaseName::OidStoreLog => "oid_store_log",
            DatabaseName::EvictableOidStore => "evictable_oid_store",
            DatabaseName::Roots => "roots",
            DatabaseName::ClientState => "client_state",
            DatabaseName::Transactions => "transactions",
            DatabaseName::StringIndex => "string_index",
            DatabaseName::ClassDefinitions => "class_definitions",
            DatabaseName::Collections => "collections",
            DatabaseName::ClusterState => "cluster_state",
        }
    }
}

impl fmt::Display for DatabaseName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of an [`Environment`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EnvState {
    Init,
    Opening,
    Open,
    Closing,
    Closed,
    Error,
}

impl fmt::Display for EnvState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EnvState::Init => "init",
            EnvState::Opening => "opening",
            EnvState::Open => "open",
            EnvState::Closing => "closing",
            EnvState::Closed => "closed",
            EnvState::Error => "in error",
        };
        f.write_str(s)
    }
}

/// Result of [`Environment::open`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[must_use]
pub enum OpenOutcome {
    /// The previous run closed cleanly; all data stores are open.
    Clean,
    /// The previous run did not close cleanly; nothing was opened.
    Dirty,
}

impl OpenOutcome {
    pub fn is_clean(self) -> bool {
        self == OpenOutcome::Clean
    }

    /// Treat a dirty outcome as fatal.
    pub fn require_clean(self) -> EnvResult<()> {
        match self {
            OpenOutcome::Clean => Ok(()),
            OpenOutcome::Dirty => Err(EnvError::RecoveryRequired),
        }
    }
}

/// Snapshot of environment counters.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EnvironmentStats {
    pub state: EnvState,
    pub data_stores_open: usize,
    pub engine: EngineStats,
}

struct Handles {
    state: EnvState,
    engine: Option<Arc<dyn KvEngine>>,
    control: Option<Database>,
    databases: Vec<(DatabaseName, Database)>,
}

impl Handles {
    /// Close every handle, ignoring failures.
    fn force_close(&mut self) {
        if let Some(engine) = self.engine.take() {
            for (_, db) in self.databases.drain(..) {
                let _ = engine.close_database(&db);
            }
            if let Some(control) = self.control.take() {
                let _ = engine.close_database(&control);
            }
            let _ = engine.close();
        }
        self.databases.clear();
        self.control = None;
    }

    fn require_open(&self, action: &'static str) -> EnvResult<()> {
        if self.state == EnvState::Open {
            Ok(())
        } else {
            Err(EnvError::Lifecycle {
                state: self.state,
                action,
            })
        }
    }
}

/// Opens and closes the named data stores as a unit and tracks whether the
/// previous run shut down cleanly.
pub struct Environment {
    backend: Arc<dyn KvBackend>,
    config: EnvironmentConfig,
    handles: Mutex<Handles>,
}

impl Environment {
    pub fn new(backend: Arc<dyn KvBackend>, config: EnvironmentConfig) -> Self {
        Self {
            backend,
            config,
            handles: Mutex::new(Handles {
                state: EnvState::Init,
                engine: None,
                control: None,
                databases: Vec::new(),
            }),
        }
    }

    pub fn config(&self) -> &EnvironmentConfig {
        &self.config
    }

    /// Open the environment.
    ///
    /// Legal from [`EnvState::Init`] or [`EnvState::Closed`]. A dirty
    /// environment returns [`OpenOutcome::Dirty`] and goes back to `Init`;
    /// the caller decides what to do about it.
    pub fn open(&self) -> EnvResult<OpenOutcome> {
        let mut handles = self.lock_checked()?;
        match handles.state {
            EnvState::Init | EnvState::Closed => {}
            state => {
                return Err(EnvError::Lifecycle {
                    state,
                    action: "open",
                })
            }
        }
        handles.state = EnvState::Opening;

        match self.open_locked(&mut handles) {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                error!(error = %e, "environment open failed");
                handles.force_close();
                handles.state = EnvState::Error;
                Err(e)
            }
        }
    }

    fn open_locked(&self, handles: &mut Handles) -> EnvResult<OpenOutcome> {
        let engine = self.acquire_engine()?;
        handles.engine = Some(Arc::clone(&engine));

        let control = engine.open_database(CONTROL_DATABASE)?;
        handles.control = Some(control.clone());

        let flag = with_transaction(engine.as_ref(), |tx| {
            Ok::<_, EnvError>(tx.get(&control, CLEAN_FLAG_KEY)?)
        })?;
        if !is_clean(flag.as_deref())? {
            warn!("environment was not closed cleanly; leaving data stores unopened");
            handles.force_close();
            handles.state = EnvState::Init;
            return Ok(OpenOutcome::Dirty);
        }

        if self.config.durability.marks_dirty_on_open() {
            write_flag(engine.as_ref(), &control, DIRTY)?;
            debug!("environment marked dirty until close");
        }

        for name in DatabaseName::ALL {
            let db = engine.open_database(name.as_str())?;
            handles.databases.push((name, db));
        }

        handles.state = EnvState::Open;
        info!(
            stores = handles.databases.len(),
            durability = ?self.config.durability,
            "environment open"
        );
        Ok(OpenOutcome::Clean)
    }

    fn acquire_engine(&self) -> EnvResult<Arc<dyn KvEngine>> {
        let mut retries = 0;
        loop {
            match self.backend.open() {
                Ok(engine) => return Ok(engine),
                Err(e) if retries < self.config.open_retry_count => {
                    retries += 1;
                    warn!(
                        attempt = retries,
                        max_retries = self.config.open_retry_count,
                        backoff_ms = self.config.open_retry_backoff_ms,
                        error = %e,
                        "engine open failed, retrying"
                    );
                    thread::sleep(self.config.open_retry_backoff());
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Close every data store, mark the environment clean, then close the
    /// control store and the engine.
    ///
    /// The first failure is returned as [`EnvError::Close`], but the
    /// environment ends in [`EnvState::Closed`] either way.
    pub fn close(&self) -> EnvResult<()> {
        let mut handles = self.lock();
        handles.require_open("close")?;
        handles.state = EnvState::Closing;

        let result = close_all(&mut handles);
        handles.state = EnvState::Closed;
        match result {
            Ok(()) => {
                info!("environment closed cleanly");
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "environment closed with errors");
                Err(EnvError::Close(e))
            }
        }
    }

    pub fn is_open(&self) -> bool {
        self.lock().state == EnvState::Open
    }

    pub fn state(&self) -> EnvState {
        self.lock().state
    }

    pub fn stats(&self) -> EnvironmentStats {
        let handles = self.lock();
        EnvironmentStats {
            state: handles.state,
            data_stores_open: handles.databases.len(),
            engine: handles
                .engine
                .as_ref()
                .map(|e| e.stats())
                .unwrap_or_default(),
        }
    }

    /// Handle to one of the named data stores.
    pub fn database(&self, name: DatabaseName) -> EnvResult<Database> {
        let handles = self.lock_checked()?;
        handles.require_open("use a data store")?;
        handles
            .databases
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, db)| db.clone())
            .ok_or(EnvError::Lifecycle {
                state: handles.state,
                action: "use a data store",
            })
    }

    /// The engine handle, for components that open their own transactions.
    pub fn engine(&self) -> EnvResult<Arc<dyn KvEngine>> {
        let handles = self.lock_checked()?;
        handles.require_open("use the engine")?;
        handles.engine.clone().ok_or(EnvError::Lifecycle {
            state: handles.state,
            action: "use the engine",
        })
    }

    /// The handles, refusing them if a thread panicked mid-transition.
    fn lock_checked(&self) -> EnvResult<MutexGuard<'_, Handles>> {
        self.handles
            .lock()
            .map_err(|_| EnvError::LockPoisoned("environment".into()))
    }

    /// The handles, poisoned or not. Used for state queries and close.
    fn lock(&self) -> MutexGuard<'_, Handles> {
        self.handles.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn is_clean(flag: Option<&[u8]>) -> EnvResult<bool> {
    match flag {
        None => Ok(true),
        Some([CLEAN]) => Ok(true),
        Some([DIRTY]) => Ok(false),
        Some(other) => Err(EnvError::DataIntegrity(format!(
            "unrecognized clean flag {other:?}"
        ))),
    }
}

fn write_flag(engine: &dyn KvEngine, control: &Database, value: u8) -> Result<(), KvError> {
    with_transaction(engine, |tx| {
        tx.put(control, CLEAN_FLAG_KEY, &[value])?;
        Ok(())
    })
}

/// Keep the first error, keep going.
fn close_all(handles: &mut Handles) -> Result<(), KvError> {
    let mut first: Option<KvError> = None;
    let Some(engine) = handles.engine.take() else {
        return Ok(());
    };

    for (name, db) in handles.databases.drain(..) {
        if let Err(e) = engine.close_database(&db) {
            warn!(db = %name, error = %e, "failed to close data store");
            first.get_or_insert(e);
        }
    }
    if let Some(control) = handles.control.take() {
        if let Err(e) = write_flag(engine.as_ref(), &control, CLEAN) {
            first.get_or_insert(e);
        }
        if let Err(e) = engine.close_database(&control) {
            first.get_or_insert(e);
        }
    }
    if let Err(e) = engine.close() {
        first.get_or_insert(e);
    }

    match first {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
