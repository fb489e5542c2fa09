//! Commit, load, and delete of collection entries.
//!
//! Every entry of owner `O` is stored under `O:u64 BE ++ element key`. An
//! owner's entries are found by a range scan from the 8-byte prefix that
//! stops at the first key whose first 8 bytes differ.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Instant;

use objdb_kv::{with_transaction, Cursor, Database, KvEngine, OpStatus, Transaction};
use objdb_types::ObjectId;
use tracing::debug;

use crate::collection::{CollectionKind, PersistentCollection};
use crate::config::CollectionConfig;
use crate::error::{CollectionError, CollectionResult};

/// Storage key of one element.
pub fn entry_key(owner: ObjectId, element: &[u8]) -> Vec<u8> {
    let mut key = Vec::with_capacity(ObjectId::KEY_LEN + element.len());
    key.extend_from_slice(&owner.to_key());
    key.extend_from_slice(element);
    key
}

fn owned_by(key: &[u8], prefix: &[u8; ObjectId::KEY_LEN]) -> bool {
    key.len() >= ObjectId::KEY_LEN && key[..ObjectId::KEY_LEN] == prefix[..]
}

pub struct CollectionDeltaStore {
    db: Database,
    config: CollectionConfig,
}

impl CollectionDeltaStore {
    pub fn new(db: Database, config: CollectionConfig) -> CollectionResult<Self> {
        config.validate()?;
        Ok(Self { db, config })
    }

    pub fn config(&self) -> &CollectionConfig {
        &self.config
    }

    /// Write a collection's pending changes and fold them into its
    /// baseline. Returns the bytes written.
    ///
    /// The fold happens before `tx` commits. Callers that may abort and
    /// retry should use [`write`](Self::write) and call
    /// [`PersistentCollection::mark_committed`] once the commit succeeds.
    pub fn commit(
        &self,
        tx: &mut dyn Transaction,
        collection: &mut PersistentCollection,
    ) -> CollectionResult<usize> {
        let written = self.write(tx, collection)?;
        collection.mark_committed();
        Ok(written)
    }

    /// Write a collection's pending changes, leaving the collection dirty.
    /// Returns the bytes written.
    ///
    /// Order is fixed: a clear deletes every stored entry of the owner
    /// first, then pending writes go out, then tombstones are deleted.
    pub fn write(
        &self,
        tx: &mut dyn Transaction,
        collection: &PersistentCollection,
    ) -> CollectionResult<usize> {
        let owner = collection.owner();
        if owner.is_null() {
            return Err(CollectionError::NullOwner);
        }
        if !collection.is_dirty() {
            return Ok(0);
        }

        let mut cleared = 0;
        if collection.is_cleared() {
            cleared = self.delete_collection(tx, owner)?;
        }

        let mut written = 0;
        for (element, value) in collection.delta() {
            let key = entry_key(owner, element);
            tx.put(&self.db, &key, value)?;
            written += key.len() + value.len();
        }

        let mut deleted = 0;
        for element in collection.removed() {
            if tx.delete(&self.db, &entry_key(owner, element))? == OpStatus::Success {
                deleted += 1;
            }
        }

        debug!(
            owner = %owner,
            cleared,
            puts = collection.delta().len(),
            deleted,
            bytes = written,
            "collection written"
        );
        Ok(written)
    }

    /// Load the stored entries of `owner` into a fresh baseline.
    pub fn load(
        &self,
        tx: &mut dyn Transaction,
        owner: ObjectId,
        kind: CollectionKind,
    ) -> CollectionResult<PersistentCollection> {
        let prefix = owner.to_key();
        let mut baseline = BTreeMap::new();
        let mut cursor = Cursor::open(tx, &self.db);
        let mut entry = cursor.search_key_range(&prefix)?;
        while let Some((key, value)) = entry {
            if !owned_by(&key, &prefix) {
                break;
            }
            baseline.insert(key[ObjectId::KEY_LEN..].to_vec(), value);
            entry = cursor.next()?;
        }
        Ok(PersistentCollection::with_baseline(owner, kind, baseline))
    }

    /// Delete every stored entry of `owner`. Returns how many were deleted.
    pub fn delete_collection(
        &self,
        tx: &mut dyn Transaction,
        owner: ObjectId,
    ) -> CollectionResult<usize> {
        let prefix = owner.to_key();
        let mut cursor = Cursor::open(tx, &self.db);
        let mut deleted = 0;
        let mut entry = cursor.search_key_range(&prefix)?;
        while let Some((key, _)) = entry {
            if !owned_by(&key, &prefix) {
                break;
            }
            cursor.delete_current()?;
            deleted += 1;
            entry = cursor.next()?;
        }
        Ok(deleted)
    }

    /// Delete the collections of every owner in `owners` that is in
    /// `collection_ids`, in ascending owner order, `batch_size` owners per
    /// transaction. Returns the number of entries deleted.
    pub fn delete_all_collections(
        &self,
        engine: &dyn KvEngine,
        owners: &BTreeSet<ObjectId>,
        collection_ids: &BTreeSet<ObjectId>,
        batch_size: usize,
    ) -> CollectionResult<usize> {
        let targets: Vec<ObjectId> = owners
            .iter()
            .copied()
            .filter(|id| collection_ids.contains(id))
            .collect();
        let mut deleted = 0;
        for batch in targets.chunks(batch_size.max(1)) {
            let started = Instant::now();
            deleted += with_transaction(engine, |tx| {
                let mut n = 0;
                for owner in batch {
                    n += self.delete_collection(tx, *owner)?;
                }
                Ok::<_, CollectionError>(n)
            })?;
            debug!(
                owners = batch.len(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "collection delete batch committed"
            );
        }
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use objdb_kv::{KvBackend, MemoryBackend, RecordingBackend, WriteKind};
    use proptest::prelude::*;
    use std::sync::Arc;

    struct Fixture {
        backend: MemoryBackend,
        engine: Arc<dyn KvEngine>,
        store: CollectionDeltaStore,
    }

    fn fixture() -> Fixture {
        let backend = MemoryBackend::new();
        let engine = backend.open().unwrap();
        let db = engine.open_database("collections").unwrap();
        let store = CollectionDeltaStore::new(db, CollectionConfig::default()).unwrap();
        Fixture {
            backend,
            engine,
            store,
        }
    }

    fn commit(f: &Fixture, c: &mut PersistentCollection) -> usize {
        with_transaction(f.engine.as_ref(), |tx| f.store.commit(tx, c)).unwrap()
    }

    fn load(f: &Fixture, owner: u64) -> PersistentCollection {
        with_transaction(f.engine.as_ref(), |tx| {
            f.store.load(tx, ObjectId::new(owner), CollectionKind::Map)
        })
        .unwrap()
    }

    fn map(owner: u64, entries: &[(&str, &str)]) -> PersistentCollection {
        let mut c = PersistentCollection::new(ObjectId::new(owner), CollectionKind::Map);
        for (k, v) in entries {
            c.put(k.as_bytes().to_vec(), v.as_bytes().to_vec());
        }
        c
    }

    fn contents(c: &PersistentCollection) -> Vec<(String, String)> {
        c.iter()
            .map(|(k, v)| {
                (
                    String::from_utf8(k.to_vec()).unwrap(),
                    String::from_utf8(v.to_vec()).unwrap(),
                )
            })
            .collect()
    }

    fn pairs(entries: &[(&str, &str)]) -> Vec<(String, String)> {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    // ---- Commit and load ----

    #[test]
    fn commit_then_load() {
        let f = fixture();
        let mut c = map(5, &[("a", "1"), ("b", "2")]);
        let bytes = commit(&f, &mut c);
        assert_eq!(bytes, (8 + 1 + 1) * 2);
        assert!(!c.is_dirty());

        let stored = f.backend.store().records("collections");
        assert_eq!(stored[0].0, entry_key(ObjectId::new(5), b"a"));
        assert_eq!(contents(&load(&f, 5)), pairs(&[("a", "1"), ("b", "2")]));
    }

    #[test]
    fn clean_collection_writes_nothing() {
        let f = fixture();
        let mut c = map(5, &[]);
        assert_eq!(commit(&f, &mut c), 0);
        assert!(f.backend.store().records("collections").is_empty());
    }

    #[test]
    fn write_keeps_changes_pending_across_an_aborted_commit() {
        let f = fixture();
        commit(&f, &mut map(5, &[("a", "1")]));

        let mut c = load(&f, 5);
        c.remove(b"a");
        c.put(b"b".to_vec(), b"2".to_vec());
        f.backend.store().fail_next_commits(1);
        let result = with_transaction(f.engine.as_ref(), |tx| f.store.write(tx, &c));
        assert!(result.is_err());
        assert!(c.is_dirty());
        assert_eq!(contents(&load(&f, 5)), pairs(&[("a", "1")]));

        with_transaction(f.engine.as_ref(), |tx| f.store.write(tx, &c)).unwrap();
        c.mark_committed();
        assert!(!c.is_dirty());
        assert_eq!(contents(&load(&f, 5)), pairs(&[("b", "2")]));
    }

    #[test]
    fn tombstones_delete_stored_entries() {
        let f = fixture();
        commit(&f, &mut map(5, &[("a", "1"), ("b", "2")]));

        let mut c = load(&f, 5);
        c.remove(b"a");
        commit(&f, &mut c);
        assert_eq!(contents(&load(&f, 5)), pairs(&[("b", "2")]));
    }

    #[test]
    fn entries_added_after_clear_survive() {
        let f = fixture();
        commit(&f, &mut map(5, &[("a", "1"), ("b", "2")]));

        let mut c = load(&f, 5);
        c.clear();
        c.put(b"a".to_vec(), b"new".to_vec());
        c.put(b"z".to_vec(), b"26".to_vec());
        commit(&f, &mut c);
        assert_eq!(contents(&load(&f, 5)), pairs(&[("a", "new"), ("z", "26")]));
        assert_eq!(contents(&c), pairs(&[("a", "new"), ("z", "26")]));
    }

    #[test]
    fn commit_order_is_clear_writes_tombstones() {
        let backend = MemoryBackend::new();
        let seeded = backend.store();
        seeded.put_raw("collections", &entry_key(ObjectId::new(5), b"old"), b"x");
        seeded.put_raw("collections", &entry_key(ObjectId::new(5), b"gone"), b"x");

        let recording = RecordingBackend::new(Arc::new(backend));
        let engine = recording.open().unwrap();
        let db = engine.open_database("collections").unwrap();
        let store = CollectionDeltaStore::new(db, CollectionConfig::default()).unwrap();

        let mut c = with_transaction(engine.as_ref(), |tx| {
            store.load(tx, ObjectId::new(5), CollectionKind::Map)
        })
        .unwrap();
        c.clear();
        c.put(b"new".to_vec(), b"1".to_vec());
        c.put(b"tmp".to_vec(), b"1".to_vec());
        c.remove(b"tmp");
        with_transaction(engine.as_ref(), |tx| store.commit(tx, &mut c)).unwrap();

        let kinds: Vec<WriteKind> = recording.writes().iter().map(|w| w.kind).collect();
        assert_eq!(
            kinds,
            vec![
                WriteKind::Delete,
                WriteKind::Delete,
                WriteKind::Put,
                WriteKind::Delete
            ]
        );
        assert_eq!(
            seeded.records("collections"),
            vec![(entry_key(ObjectId::new(5), b"new"), b"1".to_vec())]
        );
    }

    #[test]
    fn null_owner_is_rejected() {
        let f = fixture();
        let mut c = map(u64::MAX, &[("a", "1")]);
        let result = with_transaction(f.engine.as_ref(), |tx| f.store.commit(tx, &mut c));
        assert!(matches!(result, Err(CollectionError::NullOwner)));
    }

    // ---- Prefix isolation ----

    #[test]
    fn adjacent_owners_never_see_each_other() {
        let f = fixture();
        commit(&f, &mut map(1, &[("k", "one"), ("\u{ff}", "edge")]));
        commit(&f, &mut map(2, &[("\0", "two"), ("k", "two")]));

        assert_eq!(contents(&load(&f, 1)), pairs(&[("k", "one"), ("\u{ff}", "edge")]));

        let mut one = load(&f, 1);
        one.clear();
        commit(&f, &mut one);
        assert!(load(&f, 1).is_empty());
        assert_eq!(contents(&load(&f, 2)), pairs(&[("\0", "two"), ("k", "two")]));

        commit(&f, &mut map(1, &[("k", "back")]));
        let deleted = with_transaction(f.engine.as_ref(), |tx| {
            f.store.delete_collection(tx, ObjectId::new(2))
        })
        .unwrap();
        assert_eq!(deleted, 2);
        assert_eq!(contents(&load(&f, 1)), pairs(&[("k", "back")]));
        assert!(load(&f, 2).is_empty());
    }

    // ---- Bulk delete ----

    #[test]
    fn delete_all_only_touches_collection_owners() {
        let f = fixture();
        for owner in 1..=5 {
            commit(&f, &mut map(owner, &[("a", "1"), ("b", "2")]));
        }
        let owners: BTreeSet<ObjectId> = [1, 2, 3, 4].into_iter().map(ObjectId::new).collect();
        let collections: BTreeSet<ObjectId> = [2, 3, 4, 5].into_iter().map(ObjectId::new).collect();

        let deleted = f
            .store
            .delete_all_collections(f.engine.as_ref(), &owners, &collections, 2)
            .unwrap();
        assert_eq!(deleted, 6);
        // Two batches: owners {2,3} then {4}.
        assert_eq!(f.engine.stats().transactions_committed, 5 + 2);
        assert_eq!(load(&f, 1).len(), 2);
        assert!(load(&f, 3).is_empty());
        assert_eq!(load(&f, 5).len(), 2);
    }

    // ---- Model ----

    #[derive(Clone, Debug)]
    enum Op {
        Put(u8, u8),
        Remove(u8),
        Clear,
        Commit,
    }

    fn ops() -> impl Strategy<Value = Vec<Op>> {
        let op = prop_oneof![
            4 => (0u8..8, any::<u8>()).prop_map(|(k, v)| Op::Put(k, v)),
            2 => (0u8..8).prop_map(Op::Remove),
            1 => Just(Op::Clear),
            1 => Just(Op::Commit),
        ];
        prop::collection::vec(op, 0..40)
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn committed_view_matches_model(ops in ops()) {
            let f = fixture();
            commit(&f, &mut map(6, &[("k", "neighbour")]));

            let mut c = load(&f, 5);
            let mut model: BTreeMap<Vec<u8>, Vec<u8>> = BTreeMap::new();
            for op in &ops {
                match op {
                    Op::Put(k, v) => {
                        prop_assert_eq!(c.put(vec![*k], vec![*v]), model.insert(vec![*k], vec![*v]));
                    }
                    Op::Remove(k) => {
                        prop_assert_eq!(c.remove(&[*k]), model.remove(&vec![*k]));
                    }
                    Op::Clear => {
                        c.clear();
                        model.clear();
                    }
                    Op::Commit => {
                        commit(&f, &mut c);
                    }
                }
                let view: BTreeMap<Vec<u8>, Vec<u8>> =
                    c.iter().map(|(k, v)| (k.to_vec(), v.to_vec())).collect();
                prop_assert_eq!(&view, &model);
            }
            commit(&f, &mut c);

            let stored: BTreeMap<Vec<u8>, Vec<u8>> =
                load(&f, 5).iter().map(|(k, v)| (k.to_vec(), v.to_vec())).collect();
            prop_assert_eq!(stored, model);
            prop_assert_eq!(contents(&load(&f, 6)), pairs(&[("k", "neighbour")]));
        }
    }
}
