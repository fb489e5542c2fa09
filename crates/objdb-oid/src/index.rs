//! The bitmap-backed object-id index and its checkpoint pass.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use objdb_env::{BatchedSequence, DatabaseName, Environment, PersistentSequence};
use objdb_kv::{with_transaction, Cursor, Database, KvEngine, KvError, OpStatus, Transaction};
use objdb_types::{ObjectFlags, ObjectId};
use tracing::{debug, info, warn};

use crate::cache::BlobCache;
use crate::codec::{decode_wal_key, decode_wal_value, encode_wal_key, encode_wal_value, Blob, WalOp};
use crate::config::OidIndexConfig;
use crate::error::{OidError, OidResult};

/// Name of the WAL sequence in the global sequence store.
pub const WAL_SEQUENCE_NAME: &str = "oid_store_log_sequence";

/// The three bitmaps kept by the index.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BitmapKind {
    /// Every live object.
    Objects,
    /// Objects whose contents live in the collection store.
    Collections,
    /// Objects in the evictable index.
    Evictable,
}

impl BitmapKind {
    pub const ALL: [BitmapKind; 3] = [
        BitmapKind::Objects,
        BitmapKind::Collections,
        BitmapKind::Evictable,
    ];
}

/// Database handles used by the index.
#[derive(Clone, Debug)]
pub struct IndexStores {
    pub objects: Database,
    pub collections: Database,
    pub evictable: Database,
    pub wal: Database,
}

impl IndexStores {
    pub fn from_environment(env: &Environment) -> OidResult<Self> {
        Ok(Self {
            objects: env.database(DatabaseName::ObjectOidStore)?,
            collections: env.database(DatabaseName::MapsOidStore)?,
            evictable: env.database(DatabaseName::EvictableOidStore)?,
            wal: env.database(DatabaseName::OidStoreLog)?,
        })
    }

    pub fn bitmap(&self, kind: BitmapKind) -> &Database {
        match kind {
            BitmapKind::Objects => &self.objects,
            BitmapKind::Collections => &self.collections,
            BitmapKind::Evictable => &self.evictable,
        }
    }
}

/// Outcome of one checkpoint pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CheckpointReport {
    /// Id tuples applied.
    pub changes: usize,
    /// WAL entries consumed.
    pub entries: usize,
    /// `true` if the WAL was empty when the pass finished.
    pub drained: bool,
    /// `true` if the pass was cancelled and rolled back.
    pub cancelled: bool,
    pub blobs_written: usize,
    pub blobs_deleted: usize,
}

/// Cumulative checkpoint counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CheckpointStats {
    pub passes: u64,
    pub cancelled: u64,
    pub failed: u64,
    pub changes: u64,
    pub entries: u64,
    pub wal_entries_recorded: u64,
}

#[derive(Default)]
struct StatsCell {
    passes: AtomicU64,
    cancelled: AtomicU64,
    failed: AtomicU64,
    changes: AtomicU64,
    entries: AtomicU64,
    recorded: AtomicU64,
}

impl StatsCell {
    fn snapshot(&self) -> CheckpointStats {
        CheckpointStats {
            passes: self.passes.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            changes: self.changes.load(Ordering::Relaxed),
            entries: self.entries.load(Ordering::Relaxed),
            wal_entries_recorded: self.recorded.load(Ordering::Relaxed),
        }
    }
}

/// Object-id membership index: WAL appends on the commit path, merged into
/// compressed bitmap blobs by checkpoint passes.
///
/// Only checkpoints touch the bitmaps, and they run one at a time under a
/// single per-index mutex.
pub struct BitmapIdIndex {
    engine: Arc<dyn KvEngine>,
    stores: IndexStores,
    config: OidIndexConfig,
    sequence: BatchedSequence,
    checkpoint_lock: Mutex<()>,
    stats: StatsCell,
}

impl BitmapIdIndex {
    /// Open the index and merge any WAL left over by the previous run.
    pub fn open(
        engine: Arc<dyn KvEngine>,
        stores: IndexStores,
        sequence: PersistentSequence,
        config: OidIndexConfig,
    ) -> OidResult<Self> {
        config.validate()?;
        let index = Self {
            engine,
            stores,
            sequence: BatchedSequence::new(sequence, config.wal_sequence_batch),
            config,
            checkpoint_lock: Mutex::new(()),
            stats: StatsCell::default(),
        };

        let report = index.checkpoint(&AtomicBool::new(false), 0)?;
        info!(
            changes = report.changes,
            entries = report.entries,
            "merged WAL left over from previous run"
        );
        Ok(index)
    }

    /// Open the index on the stores of an open environment.
    pub fn open_in(env: &Environment, config: OidIndexConfig) -> OidResult<Self> {
        let engine = env.engine()?;
        let sequence = PersistentSequence::open(
            Arc::clone(&engine),
            env.database(DatabaseName::GlobalSequence)?,
            WAL_SEQUENCE_NAME,
            0,
        )?;
        Self::open(engine, IndexStores::from_environment(env)?, sequence, config)
    }

    pub fn config(&self) -> &OidIndexConfig {
        &self.config
    }

    pub fn stores(&self) -> &IndexStores {
        &self.stores
    }

    pub fn engine(&self) -> &Arc<dyn KvEngine> {
        &self.engine
    }

    /// Append one WAL entry covering the whole batch.
    ///
    /// The bitmaps are untouched until the next checkpoint. An empty batch
    /// writes nothing.
    pub fn record(
        &self,
        tx: &mut dyn Transaction,
        entries: &[(ObjectId, ObjectFlags)],
        op: WalOp,
    ) -> OidResult<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let seq = self.sequence.next()?;
        let key = encode_wal_key(seq, op);
        match tx.put_no_overwrite(&self.stores.wal, &key, &encode_wal_value(entries))? {
            OpStatus::Success => {
                self.stats.recorded.fetch_add(1, Ordering::Relaxed);
                debug!(seq, %op, ids = entries.len(), "WAL entry appended");
                Ok(())
            }
            status => Err(KvError::operation("put_no_overwrite", &self.stores.wal, &key, status).into()),
        }
    }

    /// Merge WAL entries into the bitmaps in sequence order.
    ///
    /// Stops after the entry that brings the change count to `max_changes`
    /// (0 means unlimited). If `cancel` is raised mid-scan the transaction is
    /// aborted and nothing is merged. On failure the transaction is aborted
    /// and the WAL is left intact.
    pub fn checkpoint(&self, cancel: &AtomicBool, max_changes: usize) -> OidResult<CheckpointReport> {
        let _guard = self
            .checkpoint_lock
            .lock()
            .map_err(|_| OidError::LockPoisoned("checkpoint".into()))?;
        let started = Instant::now();

        let mut tx = self.engine.begin()?;
        let result = self.merge(tx.as_mut(), cancel, max_changes);
        let report = match result {
            Ok(report) if report.cancelled => {
                tx.abort()?;
                self.stats.cancelled.fetch_add(1, Ordering::Relaxed);
                debug!("checkpoint cancelled");
                return Ok(report);
            }
            Ok(report) => {
                if let Err(e) = tx.commit() {
                    self.stats.failed.fetch_add(1, Ordering::Relaxed);
                    return Err(e.into());
                }
                report
            }
            Err(e) => {
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
                if let Err(abort_err) = tx.abort() {
                    warn!(error = %abort_err, "abort after failed checkpoint also failed");
                }
                return Err(e);
            }
        };

        self.stats.passes.fetch_add(1, Ordering::Relaxed);
        self.stats.changes.fetch_add(report.changes as u64, Ordering::Relaxed);
        self.stats.entries.fetch_add(report.entries as u64, Ordering::Relaxed);
        debug!(
            changes = report.changes,
            entries = report.entries,
            drained = report.drained,
            blobs_written = report.blobs_written,
            blobs_deleted = report.blobs_deleted,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "checkpoint complete"
        );
        Ok(report)
    }

    fn merge(
        &self,
        tx: &mut dyn Transaction,
        cancel: &AtomicBool,
        max_changes: usize,
    ) -> OidResult<CheckpointReport> {
        let mut objects = BlobCache::new(self.stores.objects.clone(), self.config.ids_per_blob);
        let mut collections =
            BlobCache::new(self.stores.collections.clone(), self.config.collection_ids_per_blob);
        let mut evictable =
            BlobCache::new(self.stores.evictable.clone(), self.config.collection_ids_per_blob);

        let mut report = CheckpointReport {
            drained: true,
            ..CheckpointReport::default()
        };
        {
            let mut cursor = Cursor::open(tx, &self.stores.wal);
            while let Some((key, value)) = cursor.next()? {
                if cancel.load(Ordering::Acquire) {
                    report.cancelled = true;
                    report.drained = false;
                    return Ok(report);
                }

                let (_, op) = decode_wal_key(&key)?;
                for (id, flags) in decode_wal_value(&key, &value)? {
                    let tx = cursor.transaction();
                    objects.apply(tx, id, op)?;
                    if flags.is_persistable_collection() {
                        collections.apply(tx, id, op)?;
                    }
                    if flags.is_evictable() {
                        evictable.apply(tx, id, op)?;
                    }
                    report.changes += 1;
                }
                cursor.delete_current()?;
                report.entries += 1;

                if max_changes > 0 && report.changes >= max_changes {
                    report.drained = cursor.next()?.is_none();
                    break;
                }
            }
        }

        for cache in [&mut objects, &mut collections, &mut evictable] {
            let flushed = cache.flush(tx)?;
            report.blobs_written += flushed.written;
            report.blobs_deleted += flushed.deleted;
        }
        Ok(report)
    }

    /// Members of one bitmap as stored on disk, ignoring unmerged WAL.
    pub fn members(&self, kind: BitmapKind) -> OidResult<BTreeSet<ObjectId>> {
        let db = self.stores.bitmap(kind);
        with_transaction(self.engine.as_ref(), |tx| {
            let mut ids = BTreeSet::new();
            let mut cursor = Cursor::open(tx, db);
            while let Some((key, value)) = cursor.next()? {
                ids.extend(Blob::decode(&key, &value)?.ids());
            }
            Ok(ids)
        })
    }

    /// Number of WAL entries waiting for a checkpoint.
    pub fn pending_wal_entries(&self) -> OidResult<usize> {
        with_transaction(self.engine.as_ref(), |tx| {
            let mut cursor = Cursor::open(tx, &self.stores.wal);
            let mut n = 0;
            while cursor.next()?.is_some() {
                n += 1;
            }
            Ok(n)
        })
    }

    pub fn stats(&self) -> CheckpointStats {
        self.stats.snapshot()
    }
}
