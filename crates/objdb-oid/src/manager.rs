//! One object-id manager interface over the bitmap and relaxed strategies.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use objdb_env::{DatabaseName, Environment};
use objdb_kv::{Database, KvEngine, Transaction};
use objdb_types::{ObjectFlags, ObjectId};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::codec::WalOp;
use crate::config::OidIndexConfig;
use crate::error::OidResult;
use crate::index::{BitmapIdIndex, CheckpointReport, CheckpointStats};
use crate::population::{spawn_full_scan, spawn_population, IdSets, PopulationHandle};
use crate::runner::CheckpointRunner;

/// How object-id membership is tracked across restarts.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexStrategy {
    /// WAL plus compressed bitmaps; fast startup.
    #[default]
    Bitmap,
    /// No index maintained; startup scans the whole object store.
    Relaxed,
}

/// The no-index strategy: nothing is recorded, and startup rebuilds the id
/// sets from the object store itself.
pub struct RelaxedIdIndex {
    engine: Arc<dyn KvEngine>,
    objects: Database,
}

impl RelaxedIdIndex {
    pub fn new(engine: Arc<dyn KvEngine>, objects: Database) -> Self {
        Self { engine, objects }
    }
}

pub enum ObjectIdManager {
    Bitmap(Arc<BitmapIdIndex>),
    Relaxed(RelaxedIdIndex),
}

impl ObjectIdManager {
    /// Build the manager for `strategy` on an open environment.
    pub fn open(
        strategy: IndexStrategy,
        env: &Environment,
        config: OidIndexConfig,
    ) -> OidResult<Self> {
        let manager = match strategy {
            IndexStrategy::Bitmap => {
                ObjectIdManager::Bitmap(Arc::new(BitmapIdIndex::open_in(env, config)?))
            }
            IndexStrategy::Relaxed => ObjectIdManager::Relaxed(RelaxedIdIndex::new(
                env.engine()?,
                env.database(DatabaseName::Objects)?,
            )),
        };
        info!(?strategy, "object id manager ready");
        Ok(manager)
    }

    pub fn strategy(&self) -> IndexStrategy {
        match self {
            ObjectIdManager::Bitmap(_) => IndexStrategy::Bitmap,
            ObjectIdManager::Relaxed(_) => IndexStrategy::Relaxed,
        }
    }

    pub fn record(
        &self,
        tx: &mut dyn Transaction,
        entries: &[(ObjectId, ObjectFlags)],
        op: WalOp,
    ) -> OidResult<()> {
        match self {
            ObjectIdManager::Bitmap(index) => index.record(tx, entries, op),
            ObjectIdManager::Relaxed(_) => Ok(()),
        }
    }

    pub fn checkpoint(&self, cancel: &AtomicBool, max_changes: usize) -> OidResult<CheckpointReport> {
        match self {
            ObjectIdManager::Bitmap(index) => index.checkpoint(cancel, max_changes),
            ObjectIdManager::Relaxed(_) => Ok(CheckpointReport {
                drained: true,
                ..CheckpointReport::default()
            }),
        }
    }

    /// Start filling `sets`. Callers wait on the handles or on the sets.
    pub fn start_population(&self, sets: &IdSets) -> OidResult<Vec<PopulationHandle>> {
        match self {
            ObjectIdManager::Bitmap(index) => {
                let stores = index.stores();
                let bound = index.config().reader_queue_bound;
                [
                    (&stores.objects, &sets.objects),
                    (&stores.collections, &sets.collections),
                    (&stores.evictable, &sets.evictable),
                ]
                .into_iter()
                .map(|(db, set)| {
                    spawn_population(Arc::clone(index.engine()), db.clone(), Arc::clone(set), bound)
                })
                .collect()
            }
            ObjectIdManager::Relaxed(relaxed) => Ok(vec![spawn_full_scan(
                Arc::clone(&relaxed.engine),
                relaxed.objects.clone(),
                sets.clone(),
            )?]),
        }
    }

    /// Start the background checkpointer. Relaxed mode has none.
    pub fn start_checkpointer(&self) -> OidResult<Option<CheckpointRunner>> {
        match self {
            ObjectIdManager::Bitmap(index) => {
                Ok(Some(CheckpointRunner::start(Arc::clone(index))?))
            }
            ObjectIdManager::Relaxed(_) => Ok(None),
        }
    }

    pub fn stats(&self) -> CheckpointStats {
        match self {
            ObjectIdManager::Bitmap(index) => index.stats(),
            ObjectIdManager::Relaxed(_) => CheckpointStats::default(),
        }
    }

    pub fn as_bitmap(&self) -> Option<&Arc<BitmapIdIndex>> {
        match self {
            ObjectIdManager::Bitmap(index) => Some(index),
            ObjectIdManager::Relaxed(_) => None,
        }
    }
}
