//! The managed object store: object records, their collections, and the
//! id index, kept consistent inside caller transactions.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use objdb_collections::{CollectionDeltaStore, CollectionKind};
use objdb_env::{DatabaseName, Environment, PersistentSequence, RootStore};
use objdb_kv::{with_transaction, Database, KvEngine, OpStatus, Transaction};
use objdb_oid::{
    CheckpointReport, CheckpointRunner, CheckpointStats, IdSets, IndexStrategy, ObjectIdManager,
    PopulationHandle, WalOp,
};
use objdb_types::{ObjectFlags, ObjectId, ObjectRecord};
use tracing::{debug, error, info, warn};

use crate::config::{PersistenceConfig, StoreConfig};
use crate::error::{PersistError, PersistResult};
use crate::object::ManagedObject;

/// Name of the object-id counter in the global sequence store.
pub const OBJECT_ID_SEQUENCE_NAME: &str = "object_id_sequence";

/// Point-in-time counters of a [`ManagedObjectStore`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub strategy: IndexStrategy,
    /// `false` while startup population is still running. The counts are
    /// zero until then.
    pub loaded: bool,
    pub objects: usize,
    pub collections: usize,
    pub evictable: usize,
    pub checkpoint: CheckpointStats,
}

pub struct ManagedObjectStore {
    engine: Arc<dyn KvEngine>,
    objects: Database,
    manager: ObjectIdManager,
    collections: CollectionDeltaStore,
    roots: RootStore,
    object_ids: PersistentSequence,
    sets: IdSets,
    population: Mutex<Vec<PopulationHandle>>,
    config: StoreConfig,
}

impl ManagedObjectStore {
    /// Build the store on an open environment and start populating the
    /// in-memory id sets. Queries on those sets block until population
    /// finishes; see [`wait_until_loaded`](Self::wait_until_loaded).
    pub fn open(env: &Environment, config: PersistenceConfig) -> PersistResult<Self> {
        config.validate()?;
        let engine = env.engine()?;
        let manager = ObjectIdManager::open(config.store.index_strategy, env, config.oid_index)?;
        let collections = CollectionDeltaStore::new(
            env.database(DatabaseName::Collections)?,
            config.collections,
        )?;
        let roots = RootStore::new(Arc::clone(&engine), env.database(DatabaseName::Roots)?);
        let object_ids = PersistentSequence::open(
            Arc::clone(&engine),
            env.database(DatabaseName::GlobalSequence)?,
            OBJECT_ID_SEQUENCE_NAME,
            0,
        )?;

        let sets = IdSets::pending();
        let population = manager.start_population(&sets)?;
        info!(
            strategy = ?manager.strategy(),
            population_tasks = population.len(),
            "managed object store opened"
        );

        Ok(Self {
            engine,
            objects: env.database(DatabaseName::Objects)?,
            manager,
            collections,
            roots,
            object_ids,
            sets,
            population: Mutex::new(population),
            config: config.store,
        })
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn manager(&self) -> &ObjectIdManager {
        &self.manager
    }

    pub fn engine(&self) -> &Arc<dyn KvEngine> {
        &self.engine
    }

    // ---- Save / load / delete ----

    /// Save one object inside `tx`.
    ///
    /// A clean object writes nothing. A new object is recorded in the id
    /// index in the same transaction. The object's flags are left alone;
    /// call [`ManagedObject::mark_saved`] once `tx` has committed.
    pub fn save(&self, tx: &mut dyn Transaction, object: &ManagedObject) -> PersistResult<()> {
        if object.id.is_null() {
            return Err(PersistError::DataIntegrity(
                "cannot save an object with the null id".into(),
            ));
        }
        self.write_object(tx, object)?;
        if object.is_new {
            self.manager
                .record(tx, &[(object.id, object.kind.flags())], WalOp::Add)?;
        }
        Ok(())
    }

    /// Save a batch inside `tx`, in ascending id order.
    ///
    /// The slice is sorted before the first write. All new objects go into
    /// one WAL entry. As with [`save`](Self::save), flags are only cleared
    /// by [`ManagedObject::mark_saved`] after the commit. Returns the number
    /// of objects written.
    pub fn save_all(
        &self,
        tx: &mut dyn Transaction,
        objects: &mut [ManagedObject],
    ) -> PersistResult<usize> {
        objects.sort_by_key(|o| o.id);
        for pair in objects.windows(2) {
            if pair[0].id == pair[1].id {
                return Err(PersistError::DataIntegrity(format!(
                    "object {} appears twice in one save",
                    pair[0].id
                )));
            }
        }
        if objects.iter().any(|o| o.id.is_null()) {
            return Err(PersistError::DataIntegrity(
                "cannot save an object with the null id".into(),
            ));
        }

        let started = Instant::now();
        let mut written = 0;
        for object in objects.iter() {
            if self.write_object(tx, object)? {
                written += 1;
            }
        }

        let new_entries: Vec<(ObjectId, ObjectFlags)> = objects
            .iter()
            .filter(|o| o.is_new)
            .map(|o| (o.id, o.kind.flags()))
            .collect();
        if !new_entries.is_empty() {
            self.manager.record(tx, &new_entries, WalOp::Add)?;
        }
        debug!(
            objects = objects.len(),
            written,
            new = new_entries.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "objects saved"
        );
        Ok(written)
    }

    /// Save a batch in a transaction of its own. The objects are marked
    /// saved only if that transaction commits; after an error they keep
    /// their pending changes and can be saved again.
    pub fn commit_all(&self, objects: &mut [ManagedObject]) -> PersistResult<usize> {
        let written = with_transaction(self.engine.as_ref(), |tx| self.save_all(tx, objects))?;
        for object in objects.iter_mut() {
            object.mark_saved();
        }
        Ok(written)
    }

    /// Write the record and collection delta of a dirty object. Returns
    /// `true` if anything was written.
    fn write_object(
        &self,
        tx: &mut dyn Transaction,
        object: &ManagedObject,
    ) -> PersistResult<bool> {
        if !object.dirty {
            return Ok(false);
        }
        tx.put(&self.objects, &object.id.to_key(), &object.record().encode()?)?;

        if let Some(collection) = object.collection.as_ref() {
            let shape = CollectionKind::require(object.id, object.kind)?;
            if collection.owner() != object.id || collection.kind() != shape {
                return Err(PersistError::DataIntegrity(format!(
                    "object {} ({}) carries a {:?} collection of {}",
                    object.id,
                    object.kind,
                    collection.kind(),
                    collection.owner()
                )));
            }
            self.collections.write(tx, collection)?;
        }
        Ok(true)
    }

    /// Read one object, with its collection for persistable collection
    /// kinds.
    pub fn load(&self, id: ObjectId) -> PersistResult<Option<ManagedObject>> {
        if id.is_null() {
            return Ok(None);
        }
        with_transaction(self.engine.as_ref(), |tx| {
            let Some(bytes) = tx.get(&self.objects, &id.to_key())? else {
                return Ok(None);
            };
            let record = ObjectRecord::decode(&bytes)?;
            let collection = if record.kind.is_persistable_collection() {
                let shape = CollectionKind::require(id, record.kind)?;
                Some(self.collections.load(tx, id, shape)?)
            } else {
                None
            };
            Ok(Some(ManagedObject::loaded(id, record, collection)))
        })
    }

    /// Delete objects and their collections.
    ///
    /// Collections go first, in their own batched transactions. Records
    /// then go in batches of `delete_batch_size`, each with one DELETE WAL
    /// entry; after each batch commits its ids leave the collection and
    /// evictable sets. Missing records are skipped. Returns the number of
    /// records deleted.
    pub fn delete_all(&self, ids: &BTreeSet<ObjectId>) -> PersistResult<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        let collection_ids = self.sets.collections.snapshot();
        let entries_deleted = self.collections.delete_all_collections(
            self.engine.as_ref(),
            ids,
            &collection_ids,
            self.collections.config().delete_batch_size,
        )?;

        let ordered: Vec<ObjectId> = ids.iter().copied().collect();
        let mut deleted = 0;
        for batch in ordered.chunks(self.config.delete_batch_size) {
            let started = Instant::now();
            deleted += with_transaction(self.engine.as_ref(), |tx| {
                let mut n = 0;
                let mut entries = Vec::with_capacity(batch.len());
                for id in batch {
                    if tx.delete(&self.objects, &id.to_key())? == OpStatus::Success {
                        n += 1;
                    }
                    entries.push((*id, self.flags_of(*id)));
                }
                self.manager.record(tx, &entries, WalOp::Delete)?;
                Ok::<_, PersistError>(n)
            })?;
            self.sets.collections.remove_all(batch);
            self.sets.evictable.remove_all(batch);

            let elapsed = started.elapsed();
            if elapsed > self.config.slow_batch_threshold() {
                warn!(
                    batch = batch.len(),
                    elapsed_ms = elapsed.as_millis() as u64,
                    "slow object delete batch"
                );
            }
        }
        info!(
            requested = ids.len(),
            deleted,
            collection_entries = entries_deleted,
            "objects deleted"
        );
        Ok(deleted)
    }

    fn flags_of(&self, id: ObjectId) -> ObjectFlags {
        ObjectFlags::from_parts(
            self.sets.collections.contains(id),
            self.sets.evictable.contains(id),
        )
    }

    // ---- Roots ----

    pub fn add_root(&self, tx: &mut dyn Transaction, name: &str, id: ObjectId) -> PersistResult<()> {
        Ok(self.roots.add_root(tx, name, id)?)
    }

    pub fn load_root_id(&self, name: &str) -> PersistResult<Option<ObjectId>> {
        Ok(self.roots.load_root_id(name)?)
    }

    pub fn load_roots(&self) -> PersistResult<BTreeSet<ObjectId>> {
        Ok(self.roots.load_roots()?)
    }

    pub fn load_root_names(&self) -> PersistResult<BTreeSet<String>> {
        Ok(self.roots.load_root_names()?)
    }

    pub fn load_root_names_to_ids(&self) -> PersistResult<BTreeMap<String, ObjectId>> {
        Ok(self.roots.load_root_names_to_ids()?)
    }

    // ---- Id allocation ----

    /// Reserve `n` object ids. Returns the first.
    pub fn next_object_id_batch(&self, n: u64) -> PersistResult<ObjectId> {
        let start = self.object_ids.next_batch(n)?;
        let id = ObjectId::new(start);
        if id.is_null() {
            return Err(PersistError::DataIntegrity("object id space exhausted".into()));
        }
        Ok(id)
    }

    pub fn current_object_id_value(&self) -> PersistResult<u64> {
        Ok(self.object_ids.current()?)
    }

    pub fn set_next_available_object_id(&self, next: u64) -> PersistResult<()> {
        Ok(self.object_ids.set_next(next)?)
    }

    // ---- Extant ids ----

    /// Add a newly created object to the in-memory id sets. Returns `false`
    /// if it was already known.
    pub fn add_new_object(&self, object: &ManagedObject) -> bool {
        let (added, count) = self.sets.objects.add_and_len(object.id);
        if object.kind.is_persistable_collection() {
            self.sets.collections.add(object.id);
        }
        if object.kind.is_evictable() {
            self.sets.evictable.add(object.id);
        }
        if !added {
            warn!(id = %object.id, "object added twice");
        }
        if count >= self.config.object_count_warn_threshold {
            warn!(
                count,
                threshold = self.config.object_count_warn_threshold,
                "object count nearing capacity"
            );
        }
        added
    }

    pub fn contains_object(&self, id: ObjectId) -> bool {
        self.sets.objects.contains(id)
    }

    /// Forget ids from the live set. Returns how many were present.
    pub fn remove_all_object_ids(&self, ids: &BTreeSet<ObjectId>) -> usize {
        self.sets.objects.remove_all(ids)
    }

    pub fn object_count(&self) -> usize {
        self.sets.objects.len()
    }

    pub fn snapshot_object_ids(&self) -> BTreeSet<ObjectId> {
        self.sets.objects.snapshot()
    }

    pub fn snapshot_collection_object_ids(&self) -> BTreeSet<ObjectId> {
        self.sets.collections.snapshot()
    }

    /// Evictable ids that are still live.
    pub fn snapshot_evictable_object_ids(&self) -> BTreeSet<ObjectId> {
        let live = self.sets.objects.snapshot();
        self.sets
            .evictable
            .snapshot()
            .into_iter()
            .filter(|id| live.contains(id))
            .collect()
    }

    /// Block until startup population has finished.
    pub fn wait_until_loaded(&self) -> PersistResult<()> {
        let handles = std::mem::take(
            &mut *self
                .population
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        let mut first_error = None;
        for handle in handles {
            let name = handle.name().to_string();
            match handle.join() {
                Ok(count) => debug!(task = %name, count, "population finished"),
                Err(e) => {
                    error!(task = %name, error = %e, "population failed");
                    first_error.get_or_insert(e);
                }
            }
        }
        if let Some(e) = first_error {
            return Err(e.into());
        }
        Ok(self.sets.wait_ready()?)
    }

    // ---- Checkpointing ----

    /// Run one unlimited checkpoint pass now.
    pub fn checkpoint_now(&self) -> PersistResult<CheckpointReport> {
        Ok(self.manager.checkpoint(&AtomicBool::new(false), 0)?)
    }

    pub fn start_checkpointer(&self) -> PersistResult<Option<CheckpointRunner>> {
        Ok(self.manager.start_checkpointer()?)
    }

    pub fn stats(&self) -> StoreStats {
        let loaded = self.sets.objects.is_ready()
            && self.sets.collections.is_ready()
            && self.sets.evictable.is_ready();
        let mut stats = StoreStats {
            strategy: self.manager.strategy(),
            loaded,
            checkpoint: self.manager.stats(),
            ..StoreStats::default()
        };
        if loaded {
            stats.objects = self.sets.objects.len();
            stats.collections = self.sets.collections.len();
            stats.evictable = self.sets.evictable.len();
        }
        stats
    }
}
