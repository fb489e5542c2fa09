//! Durable monotonic counters stored in the global sequence store.

use std::sync::{Arc, Mutex, MutexGuard};

use objdb_kv::{with_transaction, Database, KvEngine, OpStatus, Transaction};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::error::{EnvError, EnvResult};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
struct SequenceRecord {
    current: u64,
    uid: String,
}

impl SequenceRecord {
    fn encode(&self) -> EnvResult<Vec<u8>> {
        bincode::serialize(self).map_err(|e| EnvError::DataIntegrity(e.to_string()))
    }

    fn decode(name: &str, bytes: &[u8]) -> EnvResult<Self> {
        bincode::deserialize(bytes)
            .map_err(|e| EnvError::DataIntegrity(format!("sequence {name}: {e}")))
    }
}

/// A named durable counter.
///
/// Each allocation runs in its own transaction, so a value handed out is
/// never handed out again, even after a crash.
pub struct PersistentSequence {
    engine: Arc<dyn KvEngine>,
    db: Database,
    name: String,
    uid: String,
    write_lock: Mutex<()>,
}

impl PersistentSequence {
    /// Open the sequence, creating it at `initial` with a fresh uid if it
    /// does not exist yet.
    pub fn open(
        engine: Arc<dyn KvEngine>,
        db: Database,
        name: &str,
        initial: u64,
    ) -> EnvResult<Self> {
        let record = with_transaction(engine.as_ref(), |tx| {
            if let Some(bytes) = tx.get(&db, name.as_bytes())? {
                return SequenceRecord::decode(name, &bytes);
            }
            let record = SequenceRecord {
                current: initial,
                uid: Uuid::now_v7().to_string(),
            };
            match tx.put_no_overwrite(&db, name.as_bytes(), &record.encode()?)? {
                OpStatus::Success => {
                    debug!(sequence = name, initial, uid = %record.uid, "sequence created");
                    Ok(record)
                }
                status => Err(objdb_kv::KvError::operation(
                    "put_no_overwrite",
                    &db,
                    name.as_bytes(),
                    status,
                )
                .into()),
            }
        })?;

        Ok(Self {
            engine,
            db,
            name: name.to_string(),
            uid: record.uid,
            write_lock: Mutex::new(()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Identifier assigned when the sequence was first created.
    pub fn uid(&self) -> &str {
        &self.uid
    }

    /// Reserve `n` values. Returns the first; the counter moves past the last.
    pub fn next_batch(&self, n: u64) -> EnvResult<u64> {
        let _guard = self.lock()?;
        with_transaction(self.engine.as_ref(), |tx| {
            let mut record = self.read(tx)?;
            let start = record.current;
            record.current = start.checked_add(n).ok_or_else(|| {
                EnvError::DataIntegrity(format!("sequence {} overflowed", self.name))
            })?;
            self.write(tx, &record)?;
            Ok(start)
        })
    }

    /// The next value that would be handed out.
    pub fn current(&self) -> EnvResult<u64> {
        with_transaction(self.engine.as_ref(), |tx| Ok(self.read(tx)?.current))
    }

    /// Move the counter forward to `next`. Moving it backwards is refused.
    pub fn set_next(&self, next: u64) -> EnvResult<()> {
        let _guard = self.lock()?;
        with_transaction(self.engine.as_ref(), |tx| {
            let mut record = self.read(tx)?;
            if next < record.current {
                return Err(EnvError::DataIntegrity(format!(
                    "sequence {} cannot move back from {} to {next}",
                    self.name, record.current
                )));
            }
            record.current = next;
            self.write(tx, &record)
        })
    }

    fn lock(&self) -> EnvResult<MutexGuard<'_, ()>> {
        self.write_lock
            .lock()
            .map_err(|_| EnvError::LockPoisoned(format!("sequence {}", self.name)))
    }

    fn read(&self, tx: &mut dyn Transaction) -> EnvResult<SequenceRecord> {
        let bytes = tx
            .get(&self.db, self.name.as_bytes())?
            .ok_or_else(|| EnvError::DataIntegrity(format!("sequence {} missing", self.name)))?;
        SequenceRecord::decode(&self.name, &bytes)
    }

    fn write(&self, tx: &mut dyn Transaction, record: &SequenceRecord) -> EnvResult<()> {
        tx.put(&self.db, self.name.as_bytes(), &record.encode()?)?;
        Ok(())
    }
}

struct Reservation {
    next: u64,
    end: u64,
}

/// Hands out single values from batches reserved on a [`PersistentSequence`].
///
/// Values left in the current batch at shutdown are skipped, never reused.
pub struct BatchedSequence {
    sequence: PersistentSequence,
    batch_size: u64,
    reservation: Mutex<Reservation>,
}

impl BatchedSequence {
    pub fn new(sequence: PersistentSequence, batch_size: u64) -> Self {
        Self {
            sequence,
            batch_size: batch_size.max(1),
            reservation: Mutex::new(Reservation { next: 0, end: 0 }),
        }
    }

    pub fn next(&self) -> EnvResult<u64> {
        let mut r = self
            .reservation
            .lock()
            .map_err(|_| EnvError::LockPoisoned(format!("batched {}", self.sequence.name)))?;
        if r.next == r.end {
            let start = self.sequence.next_batch(self.batch_size)?;
            r.next = start;
            r.end = start + self.batch_size;
        }
        let value = r.next;
        r.next += 1;
        Ok(value)
    }

    pub fn sequence(&self) -> &PersistentSequence {
        &self.sequence
    }
}
