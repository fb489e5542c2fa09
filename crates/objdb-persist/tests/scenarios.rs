use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use objdb_env::{
    DatabaseName, DurabilityMode, EnvState, Environment, EnvironmentConfig, OpenOutcome,
    CLEAN_FLAG_KEY, CONTROL_DATABASE,
};
use objdb_kv::{with_transaction, KvBackend, MemoryBackend, RecordingBackend, WriteKind};
use objdb_oid::{BitmapKind, IndexStrategy};
use objdb_persist::{ManagedObject, ManagedObjectStore, PersistenceConfig};
use objdb_types::{ObjectId, ObjectKind};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

fn ids(raw: &[u64]) -> BTreeSet<ObjectId> {
    raw.iter().copied().map(ObjectId::new).collect()
}

fn open_env(backend: Arc<dyn KvBackend>, config: &PersistenceConfig) -> Environment {
    let env = Environment::new(backend, config.environment.clone());
    env.open().unwrap().require_clean().unwrap();
    env
}

fn open_store(env: &Environment, config: &PersistenceConfig) -> ManagedObjectStore {
    let store = ManagedObjectStore::open(env, config.clone()).unwrap();
    store.wait_until_loaded().unwrap();
    store
}

fn save_all(store: &ManagedObjectStore, objects: &mut [ManagedObject]) -> usize {
    store.commit_all(objects).unwrap()
}

fn map_object(raw: u64, kind: ObjectKind, entries: &[(&str, &str)]) -> ManagedObject {
    let mut object = ManagedObject::new(ObjectId::new(raw), kind, vec![raw as u8]);
    if let Some(collection) = object.collection_mut() {
        for (k, v) in entries {
            collection.put(k.as_bytes().to_vec(), v.as_bytes().to_vec());
        }
    }
    object
}

// ---- Scenario A: WAL then checkpoint ----

#[test]
fn saved_object_reaches_bitmap_only_after_checkpoint() {
    init_tracing();
    let config = PersistenceConfig::default();
    let env = open_env(Arc::new(MemoryBackend::new()), &config);
    let store = open_store(&env, &config);
    let index = Arc::clone(store.manager().as_bitmap().unwrap());

    let object = ManagedObject::new(ObjectId::new(10), ObjectKind::Physical, b"s".to_vec());
    with_transaction(store.engine().as_ref(), |tx| store.save(tx, &object)).unwrap();
    assert_eq!(index.pending_wal_entries().unwrap(), 1);
    assert!(!index.members(BitmapKind::Objects).unwrap().contains(&ObjectId::new(10)));

    let report = store.checkpoint_now().unwrap();
    assert_eq!(report.changes, 1);
    assert!(report.drained);
    assert_eq!(index.pending_wal_entries().unwrap(), 0);
    assert_eq!(index.members(BitmapKind::Objects).unwrap(), ids(&[10]));
}

// ---- Scenario B: reconstruction after restart ----

#[test]
fn restart_reconstructs_id_sets_from_bitmaps() {
    init_tracing();
    let backend = Arc::new(MemoryBackend::new());
    let config = PersistenceConfig::default();
    {
        let env = open_env(backend.clone(), &config);
        let store = open_store(&env, &config);
        let mut objects = vec![
            map_object(9, ObjectKind::EvictableMap, &[("e", "1")]),
            map_object(3, ObjectKind::Physical, &[]),
            map_object(7, ObjectKind::TreeSet, &[("s", "")]),
        ];
        assert_eq!(save_all(&store, &mut objects), 3);
        store.checkpoint_now().unwrap();
        assert_eq!(
            store.manager().as_bitmap().unwrap().pending_wal_entries().unwrap(),
            0
        );
        env.close().unwrap();
    }

    let env = open_env(backend.clone(), &config);
    let store = open_store(&env, &config);
    assert_eq!(store.snapshot_object_ids(), ids(&[3, 7, 9]));
    assert_eq!(store.snapshot_collection_object_ids(), ids(&[7, 9]));
    assert_eq!(store.snapshot_evictable_object_ids(), ids(&[9]));
    assert_eq!(store.object_count(), 3);

    let seven = store.load(ObjectId::new(7)).unwrap().unwrap();
    assert!(seven.collection.unwrap().contains_key(b"s"));
}

#[test]
fn wal_left_by_previous_run_is_merged_on_open() {
    let backend = Arc::new(MemoryBackend::new());
    let config = PersistenceConfig::default();
    {
        let env = open_env(backend.clone(), &config);
        let store = open_store(&env, &config);
        save_all(&store, &mut [map_object(4, ObjectKind::Physical, &[])]);
        env.close().unwrap();
    }

    let env = open_env(backend.clone(), &config);
    let store = open_store(&env, &config);
    assert!(store.contains_object(ObjectId::new(4)));
    assert_eq!(backend.store().len(DatabaseName::OidStoreLog.as_str()), 0);
}

// ---- Scenario C: unclean shutdown ----

#[test]
fn crashed_run_is_reported_dirty_without_touching_data() {
    init_tracing();
    let backend = Arc::new(MemoryBackend::new());
    let config = PersistenceConfig {
        environment: EnvironmentConfig {
            durability: DurabilityMode::BestEffort,
            ..EnvironmentConfig::default()
        },
        ..PersistenceConfig::default()
    };
    {
        let env = open_env(backend.clone(), &config);
        let store = open_store(&env, &config);
        save_all(&store, &mut [map_object(1, ObjectKind::Physical, &[])]);
        // Dropped without close.
    }

    let raw = backend.store();
    let objects_before = raw.records(DatabaseName::Objects.as_str());
    raw.clear_open_log();

    let env = Environment::new(backend.clone(), config.environment.clone());
    assert_eq!(env.open().unwrap(), OpenOutcome::Dirty);
    assert_eq!(env.state(), EnvState::Init);
    assert_eq!(raw.open_log(), vec![CONTROL_DATABASE.to_string()]);
    assert_eq!(raw.records(DatabaseName::Objects.as_str()), objects_before);

    raw.put_raw(CONTROL_DATABASE, CLEAN_FLAG_KEY, &[1]);
    assert_eq!(env.open().unwrap(), OpenOutcome::Clean);
    let store = open_store(&env, &config);
    assert!(store.contains_object(ObjectId::new(1)));
}

// ---- Write ordering ----

#[test]
fn save_all_writes_in_ascending_id_order() {
    let config = PersistenceConfig::default();
    let recording = Arc::new(RecordingBackend::new(Arc::new(MemoryBackend::new())));
    let env = open_env(recording.clone(), &config);
    let store = open_store(&env, &config);
    recording.clear();

    let mut objects: Vec<ManagedObject> = [5, 1, 3]
        .into_iter()
        .map(|raw| map_object(raw, ObjectKind::Physical, &[]))
        .collect();
    save_all(&store, &mut objects);

    let keys: Vec<ObjectId> = recording
        .writes_to(DatabaseName::Objects.as_str())
        .iter()
        .map(|w| ObjectId::from_key(&w.key).unwrap())
        .collect();
    assert_eq!(keys, vec![ObjectId::new(1), ObjectId::new(3), ObjectId::new(5)]);
    assert!(objects.iter().all(|o| !o.dirty && !o.is_new));

    let wal = recording.writes_to(DatabaseName::OidStoreLog.as_str());
    assert_eq!(wal.len(), 1);
    assert_eq!(wal[0].kind, WriteKind::PutNoOverwrite);
}

// ---- Delete ----

#[test]
fn delete_all_removes_records_collections_and_membership() {
    init_tracing();
    let backend = Arc::new(MemoryBackend::new());
    let mut config = PersistenceConfig::default();
    config.store.delete_batch_size = 2;
    config.collections.delete_batch_size = 1;
    {
        let env = open_env(backend.clone(), &config);
        let store = open_store(&env, &config);
        let mut objects = vec![
            map_object(1, ObjectKind::TreeMap, &[("a", "1"), ("b", "2")]),
            map_object(2, ObjectKind::Physical, &[]),
            map_object(3, ObjectKind::EvictableMap, &[("c", "3")]),
            map_object(4, ObjectKind::Map, &[("keep", "4")]),
        ];
        save_all(&store, &mut objects);
        store.checkpoint_now().unwrap();
        env.close().unwrap();
    }

    let env = open_env(backend.clone(), &config);
    let store = open_store(&env, &config);
    let deleted = store.delete_all(&ids(&[1, 2, 3, 99])).unwrap();
    assert_eq!(deleted, 3);

    let raw = backend.store();
    assert_eq!(raw.len(DatabaseName::Objects.as_str()), 1);
    assert_eq!(raw.len(DatabaseName::Collections.as_str()), 1);
    assert_eq!(store.snapshot_collection_object_ids(), ids(&[4]));
    assert!(store.snapshot_evictable_object_ids().is_empty());
    // The live set is the caller's to prune.
    assert_eq!(store.object_count(), 4);
    assert_eq!(store.remove_all_object_ids(&ids(&[1, 2, 3])), 3);

    store.checkpoint_now().unwrap();
    let index = store.manager().as_bitmap().unwrap();
    assert_eq!(index.members(BitmapKind::Objects).unwrap(), ids(&[4]));
    assert_eq!(index.members(BitmapKind::Collections).unwrap(), ids(&[4]));
    assert!(index.members(BitmapKind::Evictable).unwrap().is_empty());
    assert!(store.load(ObjectId::new(1)).unwrap().is_none());
}

// ---- Roots ----

#[test]
fn roots_round_trip_through_store() {
    let backend = Arc::new(MemoryBackend::new());
    let config = PersistenceConfig::default();
    let env = open_env(backend, &config);
    let store = open_store(&env, &config);

    with_transaction(store.engine().as_ref(), |tx| {
        store.add_root(tx, "app", ObjectId::new(12))?;
        store.add_root(tx, "cache", ObjectId::new(30))
    })
    .unwrap();

    assert_eq!(store.load_root_id("app").unwrap(), Some(ObjectId::new(12)));
    assert_eq!(store.load_root_id("missing").unwrap(), None);
    assert_eq!(store.load_roots().unwrap(), ids(&[12, 30]));
    let names: Vec<String> = store.load_root_names().unwrap().into_iter().collect();
    assert_eq!(names, vec!["app".to_string(), "cache".to_string()]);
    assert_eq!(
        store.load_root_names_to_ids().unwrap().get("cache"),
        Some(&ObjectId::new(30))
    );
}

// ---- Relaxed strategy ----

#[test]
fn relaxed_strategy_rebuilds_sets_by_scanning_objects() {
    let backend = Arc::new(MemoryBackend::new());
    let mut config = PersistenceConfig::default();
    config.store.index_strategy = IndexStrategy::Relaxed;
    {
        let env = open_env(backend.clone(), &config);
        let store = open_store(&env, &config);
        assert!(store.start_checkpointer().unwrap().is_none());
        save_all(
            &store,
            &mut [
                map_object(2, ObjectKind::Set, &[("x", "")]),
                map_object(6, ObjectKind::EvictableMap, &[]),
            ],
        );
        env.close().unwrap();
    }
    assert_eq!(backend.store().len(DatabaseName::OidStoreLog.as_str()), 0);

    let env = open_env(backend.clone(), &config);
    let store = open_store(&env, &config);
    assert_eq!(store.snapshot_object_ids(), ids(&[2, 6]));
    assert_eq!(store.snapshot_collection_object_ids(), ids(&[2, 6]));
    assert_eq!(store.snapshot_evictable_object_ids(), ids(&[6]));
    assert_eq!(store.stats().strategy, IndexStrategy::Relaxed);
}

// ---- Background checkpointer ----

#[test]
fn background_checkpointer_drains_wal() {
    let mut config = PersistenceConfig::default();
    config.oid_index.checkpoint_min_sleep_ms = 5;
    config.oid_index.checkpoint_max_sleep_ms = 20;
    let env = open_env(Arc::new(MemoryBackend::new()), &config);
    let store = open_store(&env, &config);
    let mut runner = store.start_checkpointer().unwrap().unwrap();

    save_all(&store, &mut [map_object(21, ObjectKind::Physical, &[])]);
    let index = store.manager().as_bitmap().unwrap();
    let deadline = Instant::now() + Duration::from_secs(5);
    while index.pending_wal_entries().unwrap() > 0 && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(index.members(BitmapKind::Objects).unwrap(), ids(&[21]));
    runner.stop();

    let stats = store.stats();
    assert!(stats.loaded);
    assert!(stats.checkpoint.passes >= 2);
    assert_eq!(stats.checkpoint.wal_entries_recorded, 1);
}
