//! Write-once containment set filled by startup reconstruction.

use std::collections::BTreeSet;
use std::sync::{
    Condvar, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard,
};

use objdb_types::ObjectId;
use tracing::warn;

use crate::error::{OidError, OidResult};

#[derive(Clone, Debug, PartialEq, Eq)]
enum Population {
    Pending,
    Ready,
    Failed(String),
}

/// A set of object ids that becomes usable once populated.
///
/// Every query blocks until the population finishes. After that the set is
/// a plain concurrent read-mostly set. A failed population still publishes
/// whatever was read, and [`wait_ready`](Self::wait_ready) reports the
/// failure.
///
/// Each update leaves the set whole, so queries keep working after a thread
/// panics while holding a lock. [`wait_ready`](Self::wait_ready) reports
/// the poisoning as [`OidError::LockPoisoned`].
pub struct ObjectIdSet {
    name: String,
    population: Mutex<Population>,
    populated: Condvar,
    ids: RwLock<BTreeSet<ObjectId>>,
}

impl ObjectIdSet {
    /// A set that blocks until [`populate`](Self::populate) is called.
    pub fn pending(name: &str) -> Self {
        Self {
            name: name.to_string(),
            population: Mutex::new(Population::Pending),
            populated: Condvar::new(),
            ids: RwLock::new(BTreeSet::new()),
        }
    }

    /// A set that is ready immediately.
    pub fn ready(name: &str, ids: BTreeSet<ObjectId>) -> Self {
        let set = Self::pending(name);
        set.populate(ids);
        set
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Publish the reconstructed ids and release every waiter.
    pub fn populate(&self, ids: BTreeSet<ObjectId>) {
        self.finish(ids, Population::Ready);
    }

    /// Publish a partial result and mark the population failed.
    pub fn fail_population(&self, partial: BTreeSet<ObjectId>, reason: String) {
        self.finish(partial, Population::Failed(reason));
    }

    fn finish(&self, ids: BTreeSet<ObjectId>, outcome: Population) {
        let mut population = self.population();
        if *population != Population::Pending {
            warn!(set = %self.name, "id set already populated; ignoring second result");
            return;
        }
        *self.write() = ids;
        *population = outcome;
        self.populated.notify_all();
    }

    /// Block until populated. Returns the failure if population failed.
    pub fn wait_ready(&self) -> OidResult<()> {
        if self.ids.is_poisoned() {
            return Err(self.poisoned());
        }
        let guard = self.population.lock().map_err(|_| self.poisoned())?;
        let population = self
            .populated
            .wait_while(guard, |p| *p == Population::Pending)
            .map_err(|_| self.poisoned())?;
        match &*population {
            Population::Failed(reason) => Err(OidError::PopulationFailed(format!(
                "{}: {reason}",
                self.name
            ))),
            _ => Ok(()),
        }
    }

    pub fn is_ready(&self) -> bool {
        *self.population() != Population::Pending
    }

    fn poisoned(&self) -> OidError {
        OidError::LockPoisoned(format!("id set {}", self.name))
    }

    fn population(&self) -> MutexGuard<'_, Population> {
        self.population.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn read(&self) -> RwLockReadGuard<'_, BTreeSet<ObjectId>> {
        self.ids.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeSet<ObjectId>> {
        self.ids.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn await_population(&self) {
        let guard = self.population();
        drop(
            self.populated
                .wait_while(guard, |p| *p == Population::Pending)
                .unwrap_or_else(PoisonError::into_inner),
        );
    }

    pub fn contains(&self, id: ObjectId) -> bool {
        self.await_population();
        self.read().contains(&id)
    }

    /// Insert `id`; returns `true` if it was not present.
    pub fn add(&self, id: ObjectId) -> bool {
        self.await_population();
        self.write().insert(id)
    }

    /// Insert `id` and return whether it was new along with the new size.
    pub fn add_and_len(&self, id: ObjectId) -> (bool, usize) {
        self.await_population();
        let mut ids = self.write();
        let added = ids.insert(id);
        (added, ids.len())
    }

    pub fn remove(&self, id: ObjectId) -> bool {
        self.await_population();
        self.write().remove(&id)
    }

    /// Remove every id in `ids`; returns how many were present.
    pub fn remove_all<'a>(&self, ids: impl IntoIterator<Item = &'a ObjectId>) -> usize {
        self.await_population();
        let mut set = self.write();
        ids.into_iter().filter(|id| set.remove(id)).count()
    }

    pub fn len(&self) -> usize {
        self.await_population();
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn snapshot(&self) -> BTreeSet<ObjectId> {
        self.await_population();
        self.read().clone()
    }
}

impl std::fmt::Debug for ObjectIdSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectIdSet")
            .field("name", &self.name)
            .field("ready", &self.is_ready())
            .finish()
    }
}
