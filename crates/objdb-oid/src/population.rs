//! Startup reconstruction of the in-memory id sets.
//!
//! Bitmap mode runs a reader thread per bitmap store that cursor-scans the
//! blobs and hands them to a worker thread through a bounded channel, so
//! reading and bit expansion overlap. Relaxed mode scans the object store
//! once and decodes every record's kind.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use crossbeam_channel::{bounded, Receiver};
use objdb_kv::{Cursor, Database, KvEngine};
use objdb_types::{ObjectId, ObjectRecord};
use tracing::{error, info};

use crate::codec::Blob;
use crate::error::{OidError, OidResult};
use crate::idset::ObjectIdSet;

/// Completion handle for one population task.
pub struct PopulationHandle {
    name: String,
    handle: JoinHandle<OidResult<usize>>,
}

impl PopulationHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the task. Returns the number of ids published.
    pub fn join(self) -> OidResult<usize> {
        self.handle
            .join()
            .map_err(|_| OidError::PopulationFailed(format!("{} thread panicked", self.name)))?
    }
}

/// Fill `set` from the bitmap blobs in `db`.
pub fn spawn_population(
    engine: Arc<dyn KvEngine>,
    db: Database,
    set: Arc<ObjectIdSet>,
    queue_bound: usize,
) -> OidResult<PopulationHandle> {
    let name = format!("oid-reader-{}", db.name());
    let handle = thread::Builder::new()
        .name(name.clone())
        .spawn(move || read_bitmap(engine, db, set, queue_bound))?;
    Ok(PopulationHandle { name, handle })
}

fn read_bitmap(
    engine: Arc<dyn KvEngine>,
    db: Database,
    set: Arc<ObjectIdSet>,
    queue_bound: usize,
) -> OidResult<usize> {
    let started = Instant::now();
    let (tx_blobs, rx_blobs) = bounded::<Blob>(queue_bound.max(1));
    let worker = thread::Builder::new()
        .name(format!("oid-expander-{}", db.name()))
        .spawn(move || expand(rx_blobs));
    let worker = match worker {
        Ok(worker) => worker,
        Err(e) => {
            set.fail_population(BTreeSet::new(), e.to_string());
            return Err(e.into());
        }
    };

    let scanned = scan_blobs(engine.as_ref(), &db, |blob| {
        // A closed channel means the worker is gone; its result says why.
        let _ = tx_blobs.send(blob);
    });
    drop(tx_blobs);

    let ids = match worker.join() {
        Ok(ids) => ids,
        Err(_) => {
            let reason = "expander thread panicked".to_string();
            set.fail_population(BTreeSet::new(), reason.clone());
            return Err(OidError::PopulationFailed(reason));
        }
    };
    let count = ids.len();
    match scanned {
        Ok(blobs) => {
            set.populate(ids);
            info!(
                db = %db,
                blobs,
                ids = count,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "id set populated"
            );
            Ok(count)
        }
        Err(e) => {
            error!(db = %db, error = %e, ids = count, "id population failed; publishing partial set");
            set.fail_population(ids, e.to_string());
            Err(e)
        }
    }
}

fn scan_blobs(engine: &dyn KvEngine, db: &Database, mut sink: impl FnMut(Blob)) -> OidResult<usize> {
    let mut tx = engine.begin()?;
    let mut blobs = 0;
    let scanned = (|| -> OidResult<()> {
        let mut cursor = Cursor::open(tx.as_mut(), db);
        while let Some((key, value)) = cursor.next()? {
            sink(Blob::decode(&key, &value)?);
            blobs += 1;
        }
        Ok(())
    })();
    match scanned {
        Ok(()) => {
            tx.commit()?;
            Ok(blobs)
        }
        Err(e) => {
            let _ = tx.abort();
            Err(e)
        }
    }
}

fn expand(blobs: Receiver<Blob>) -> BTreeSet<ObjectId> {
    let mut ids = BTreeSet::new();
    for blob in blobs {
        ids.extend(blob.ids());
    }
    ids
}

/// The three sets filled by reconstruction.
#[derive(Clone, Debug)]
pub struct IdSets {
    pub objects: Arc<ObjectIdSet>,
    pub collections: Arc<ObjectIdSet>,
    pub evictable: Arc<ObjectIdSet>,
}

impl IdSets {
    /// Three sets waiting for population.
    pub fn pending() -> Self {
        Self {
            objects: Arc::new(ObjectIdSet::pending("objects")),
            collections: Arc::new(ObjectIdSet::pending("collections")),
            evictable: Arc::new(ObjectIdSet::pending("evictable")),
        }
    }

    /// Block until every set is populated; the first failure wins.
    pub fn wait_ready(&self) -> OidResult<()> {
        self.objects.wait_ready()?;
        self.collections.wait_ready()?;
        self.evictable.wait_ready()
    }
}

/// Fill all three sets from one linear scan of the object store.
pub fn spawn_full_scan(
    engine: Arc<dyn KvEngine>,
    objects_db: Database,
    sets: IdSets,
) -> OidResult<PopulationHandle> {
    let name = "oid-full-scan".to_string();
    let handle = thread::Builder::new()
        .name(name.clone())
        .spawn(move || full_scan(engine, objects_db, sets))?;
    Ok(PopulationHandle { name, handle })
}

fn full_scan(engine: Arc<dyn KvEngine>, db: Database, sets: IdSets) -> OidResult<usize> {
    let started = Instant::now();
    let mut objects = BTreeSet::new();
    let mut collections = BTreeSet::new();
    let mut evictable = BTreeSet::new();

    let scanned = (|| -> OidResult<()> {
        let mut tx = engine.begin()?;
        {
            let mut cursor = Cursor::open(tx.as_mut(), &db);
            while let Some((key, value)) = cursor.next()? {
                let id = ObjectId::from_key(&key)?;
                let kind = ObjectRecord::decode(&value)?.kind;
                objects.insert(id);
                if kind.is_persistable_collection() {
                    collections.insert(id);
                }
                if kind.is_evictable() {
                    evictable.insert(id);
                }
            }
        }
        tx.commit()?;
        Ok(())
    })();

    let count = objects.len();
    match scanned {
        Ok(()) => {
            sets.objects.populate(objects);
            sets.collections.populate(collections);
            sets.evictable.populate(evictable);
            info!(
                ids = count,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "id sets populated from full object scan"
            );
            Ok(count)
        }
        Err(e) => {
            error!(error = %e, ids = count, "full object scan failed; publishing partial sets");
            let reason = e.to_string();
            sets.objects.fail_population(objects, reason.clone());
            sets.collections.fail_population(collections, reason.clone());
            sets.evictable.fail_population(evictable, reason);
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use objdb_kv::{KvBackend, MemoryBackend};
    use objdb_types::ObjectKind;

    fn ids(raw: &[u64]) -> BTreeSet<ObjectId> {
        raw.iter().copied().map(ObjectId::new).collect()
    }

    fn seed_bitmap(backend: &MemoryBackend, db: &str, width: u64, raw: &[u64]) {
        let mut blobs: std::collections::BTreeMap<u64, Blob> = Default::default();
        for &id in raw {
            let id = ObjectId::new(id);
            let base = Blob::base_for(id, width);
            blobs
                .entry(base)
                .or_insert_with(|| Blob::empty(base, width))
                .set(id);
        }
        for blob in blobs.values() {
            backend.store().put_raw(db, &blob.key(), &blob.encode_value());
        }
    }

    // ---- Bitmap reconstruction ----

    #[test]
    fn reconstructs_prepopulated_bitmap() {
        let backend = MemoryBackend::new();
        seed_bitmap(&backend, "object_oid_store", 64, &[3, 7, 9]);
        let engine = backend.open().unwrap();
        let db = engine.open_database("object_oid_store").unwrap();

        let set = Arc::new(ObjectIdSet::pending("objects"));
        let handle = spawn_population(engine, db, Arc::clone(&set), 2).unwrap();
        assert_eq!(handle.join().unwrap(), 3);
        set.wait_ready().unwrap();
        assert_eq!(set.snapshot(), ids(&[3, 7, 9]));
    }

    #[test]
    fn many_blobs_through_a_small_queue() {
        let backend = MemoryBackend::new();
        let raw: Vec<u64> = (0..50).map(|i| i * 97).collect();
        seed_bitmap(&backend, "bits", 64, &raw);
        let engine = backend.open().unwrap();
        let db = engine.open_database("bits").unwrap();

        let set = Arc::new(ObjectIdSet::pending("objects"));
        spawn_population(engine, db, Arc::clone(&set), 1)
            .unwrap()
            .join()
            .unwrap();
        assert_eq!(set.snapshot(), ids(&raw));
    }

    #[test]
    fn corrupt_blob_fails_population() {
        let backend = MemoryBackend::new();
        seed_bitmap(&backend, "bits", 64, &[1]);
        backend.store().put_raw("bits", &512u64.to_be_bytes(), &[1, 2, 3]);
        let engine = backend.open().unwrap();
        let db = engine.open_database("bits").unwrap();

        let set = Arc::new(ObjectIdSet::pending("objects"));
        let result = spawn_population(engine, db, Arc::clone(&set), 4).unwrap().join();
        assert!(matches!(result, Err(OidError::CorruptBlob { .. })));
        assert!(matches!(set.wait_ready(), Err(OidError::PopulationFailed(_))));
        assert!(set.contains(ObjectId::new(1)));
    }

    // ---- Full scan ----

    #[test]
    fn full_scan_classifies_by_kind() {
        let backend = MemoryBackend::new();
        let store = backend.store();
        for (id, kind) in [
            (1, ObjectKind::Physical),
            (2, ObjectKind::TreeMap),
            (3, ObjectKind::EvictableMap),
        ] {
            let record = ObjectRecord::new(kind, vec![]).encode().unwrap();
            store.put_raw("objects", &ObjectId::new(id).to_key(), &record);
        }
        let engine = backend.open().unwrap();
        let db = engine.open_database("objects").unwrap();

        let sets = IdSets::pending();
        let handle = spawn_full_scan(engine, db, sets.clone()).unwrap();
        assert_eq!(handle.join().unwrap(), 3);
        sets.wait_ready().unwrap();
        assert_eq!(sets.objects.snapshot(), ids(&[1, 2, 3]));
        assert_eq!(sets.collections.snapshot(), ids(&[2, 3]));
        assert_eq!(sets.evictable.snapshot(), ids(&[3]));
    }
}
