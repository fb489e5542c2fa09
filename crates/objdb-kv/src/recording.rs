//! A pass-through backend that records every write in issue order.
//!
//! Used to verify ordering contracts (ascending-id writes) against the real
//! engine behaviour underneath.

use std::sync::{Arc, Mutex};

use crate::error::KvResult;
use crate::traits::{
    Database, EngineStats, KvBackend, KvEngine, OpStatus, SeekBound, Transaction,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriteKind {
    Put,
    PutNoOverwrite,
    Delete,
}

/// One write as issued to the wrapped engine.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordedWrite {
    pub kind: WriteKind,
    pub db: String,
    pub key: Vec<u8>,
}

type WriteLog = Arc<Mutex<Vec<RecordedWrite>>>;

/// Wraps a backend so that every engine it opens records its writes.
pub struct RecordingBackend {
    inner: Arc<dyn KvBackend>,
    log: WriteLog,
}

impl RecordingBackend {
    pub fn new(inner: Arc<dyn KvBackend>) -> Self {
        Self {
            inner,
            log: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Every recorded write, in issue order.
    pub fn writes(&self) -> Vec<RecordedWrite> {
        self.log.lock().expect("lock poisoned").clone()
    }

    /// Recorded writes to one database, in issue order.
    pub fn writes_to(&self, db: &str) -> Vec<RecordedWrite> {
        self.writes().into_iter().filter(|w| w.db == db).collect()
    }

    pub fn clear(&self) {
        self.log.lock().expect("lock poisoned").clear();
    }
}

impl KvBackend for RecordingBackend {
    fn open(&self) -> KvResult<Arc<dyn KvEngine>> {
        let inner = self.inner.open()?;
        Ok(Arc::new(RecordingEngine {
            inner,
            log: Arc::clone(&self.log),
        }))
    }
}

struct RecordingEngine {
    inner: Arc<dyn KvEngine>,
    log: WriteLog,
}

impl KvEngine for RecordingEngine {
    fn open_database(&self, name: &str) -> KvResult<Database> {
        self.inner.open_database(name)
    }

    fn close_database(&self, db: &Database) -> KvResult<()> {
        self.inner.close_database(db)
    }

    fn begin(&self) -> KvResult<Box<dyn Transaction>> {
        Ok(Box::new(RecordingTransaction {
            inner: self.inner.begin()?,
            log: Arc::clone(&self.log),
        }))
    }

    fn close(&self) -> KvResult<()> {
        self.inner.close()
    }

    fn stats(&self) -> EngineStats {
        self.inner.stats()
    }
}

struct RecordingTransaction {
    inner: Box<dyn Transaction>,
    log: WriteLog,
}

impl RecordingTransaction {
    fn record(&self, kind: WriteKind, db: &Database, key: &[u8]) {
        self.log.lock().expect("lock poisoned").push(RecordedWrite {
            kind,
            db: db.name().to_string(),
            key: key.to_vec(),
        });
    }
}

impl Transaction for RecordingTransaction {
    fn get(&mut self, db: &Database, key: &[u8]) -> KvResult<Option<Vec<u8>>> {
        self.inner.get(db, key)
    }

    fn put(&mut self, db: &Database, key: &[u8], value: &[u8]) -> KvResult<OpStatus> {
        self.record(WriteKind::Put, db, key);
        self.inner.put(db, key, value)
    }

    fn put_no_overwrite(
        &mut self,
        db: &Database,
        key: &[u8],
        value: &[u8],
    ) -> KvResult<OpStatus> {
        self.record(WriteKind::PutNoOverwrite, db, key);
        self.inner.put_no_overwrite(db, key, value)
    }

    fn delete(&mut self, db: &Database, key: &[u8]) -> KvResult<OpStatus> {
        self.record(WriteKind::Delete, db, key);
        self.inner.delete(db, key)
    }

    fn seek(
        &mut self,
        db: &Database,
        key: &[u8],
        bound: SeekBound,
    ) -> KvResult<Option<(Vec<u8>, Vec<u8>)>> {
        self.inner.seek(db, key, bound)
    }

    fn commit(self: Box<Self>) -> KvResult<()> {
        self.inner.commit()
    }

    fn abort(self: Box<Self>) -> KvResult<()> {
        self.inner.abort()
    }
}
