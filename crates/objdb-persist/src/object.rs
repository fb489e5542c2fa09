use objdb_collections::{CollectionKind, PersistentCollection};
use objdb_types::{ObjectId, ObjectKind, ObjectRecord};

/// An object as the store sees it: serialized state plus bookkeeping.
///
/// The caller owns it for the length of a transaction. `dirty` says the
/// state needs writing; `is_new` says the id has never been recorded in the
/// id index. Both stay set until [`mark_saved`](Self::mark_saved) runs after
/// a successful commit. Persistable collection kinds carry their collection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ManagedObject {
    pub id: ObjectId,
    pub kind: ObjectKind,
    pub state: Vec<u8>,
    pub dirty: bool,
    pub is_new: bool,
    pub collection: Option<PersistentCollection>,
}

impl ManagedObject {
    /// A freshly created object, dirty and new. Collection kinds start with
    /// an empty collection.
    pub fn new(id: ObjectId, kind: ObjectKind, state: Vec<u8>) -> Self {
        Self {
            id,
            kind,
            state,
            dirty: true,
            is_new: true,
            collection: CollectionKind::for_object(kind)
                .map(|shape| PersistentCollection::new(id, shape)),
        }
    }

    /// An object read back from the store: clean and known to the index.
    pub(crate) fn loaded(
        id: ObjectId,
        record: ObjectRecord,
        collection: Option<PersistentCollection>,
    ) -> Self {
        Self {
            id,
            kind: record.kind,
            state: record.state,
            dirty: false,
            is_new: false,
            collection,
        }
    }

    /// Replace the state and mark the object dirty.
    pub fn set_state(&mut self, state: Vec<u8>) {
        self.state = state;
        self.dirty = true;
    }

    /// Borrow the collection for changes. Marks the object dirty.
    pub fn collection_mut(&mut self) -> Option<&mut PersistentCollection> {
        if self.collection.is_some() {
            self.dirty = true;
        }
        self.collection.as_mut()
    }

    /// Record that the transaction which saved this object has committed:
    /// the object becomes clean, known to the index, and its collection's
    /// pending changes join the baseline.
    ///
    /// Leave an object untouched when its transaction aborts; saving it
    /// again then writes the same changes.
    pub fn mark_saved(&mut self) {
        if self.dirty {
            if let Some(collection) = self.collection.as_mut() {
                collection.mark_committed();
            }
        }
        self.dirty = false;
        self.is_new = false;
    }

    pub(crate) fn record(&self) -> ObjectRecord {
        ObjectRecord::new(self.kind, self.state.clone())
    }
}
