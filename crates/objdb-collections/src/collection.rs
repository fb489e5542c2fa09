//! In-memory view of one persistent collection and its pending changes.

use std::collections::{BTreeMap, BTreeSet};

use objdb_types::{ObjectId, ObjectKind};

use crate::error::{CollectionError, CollectionResult};

/// Shape of a persistent collection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CollectionKind {
    Map,
    /// Keys only; every stored value is empty.
    Set,
}

impl CollectionKind {
    /// The collection shape backing an object kind, if it has one.
    pub fn for_object(kind: ObjectKind) -> Option<Self> {
        if !kind.is_persistable_collection() {
            None
        } else if kind.is_set() {
            Some(CollectionKind::Set)
        } else {
            Some(CollectionKind::Map)
        }
    }

    /// Like [`for_object`](Self::for_object), but an error for kinds that
    /// are not stored in the collection store.
    pub fn require(id: ObjectId, kind: ObjectKind) -> CollectionResult<Self> {
        Self::for_object(kind).ok_or(CollectionError::NotACollection { id, kind })
    }
}

/// What a lookup sees for one key.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntryState<'a> {
    /// Not in the collection and nothing pending.
    Absent,
    /// Visible with this value, from the baseline or a pending write.
    Present(&'a [u8]),
    /// Removed in memory; the stored entry goes away at the next commit.
    PendingTombstone,
}

/// A map or set owned by one object, tracked as a loaded baseline plus the
/// changes made since.
///
/// Reads see the merged view. A commit writes only the changes, in the
/// order clear, writes, tombstones.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PersistentCollection {
    owner: ObjectId,
    kind: CollectionKind,
    baseline: BTreeMap<Vec<u8>, Vec<u8>>,
    delta: BTreeMap<Vec<u8>, Vec<u8>>,
    removed: BTreeSet<Vec<u8>>,
    cleared: bool,
}

impl PersistentCollection {
    pub fn new(owner: ObjectId, kind: CollectionKind) -> Self {
        Self {
            owner,
            kind,
            baseline: BTreeMap::new(),
            delta: BTreeMap::new(),
            removed: BTreeSet::new(),
            cleared: false,
        }
    }

    pub(crate) fn with_baseline(
        owner: ObjectId,
        kind: CollectionKind,
        baseline: BTreeMap<Vec<u8>, Vec<u8>>,
    ) -> Self {
        Self {
            baseline,
            ..Self::new(owner, kind)
        }
    }

    pub fn owner(&self) -> ObjectId {
        self.owner
    }

    pub fn kind(&self) -> CollectionKind {
        self.kind
    }

    pub fn entry_state(&self, key: &[u8]) -> EntryState<'_> {
        if let Some(value) = self.delta.get(key) {
            return EntryState::Present(value);
        }
        if self.removed.contains(key) {
            return EntryState::PendingTombstone;
        }
        if self.cleared {
            return EntryState::Absent;
        }
        match self.baseline.get(key) {
            Some(value) => EntryState::Present(value),
            None => EntryState::Absent,
        }
    }

    pub fn get(&self, key: &[u8]) -> Option<&[u8]> {
        match self.entry_state(key) {
            EntryState::Present(value) => Some(value),
            EntryState::Absent | EntryState::PendingTombstone => None,
        }
    }

    pub fn contains_key(&self, key: &[u8]) -> bool {
        self.get(key).is_some()
    }

    /// Insert or replace. Returns the previous value.
    pub fn put(&mut self, key: Vec<u8>, value: Vec<u8>) -> Option<Vec<u8>> {
        let previous = self.get(&key).map(<[u8]>::to_vec);
        self.removed.remove(&key);
        self.delta.insert(key, value);
        previous
    }

    /// Set insert. Returns `true` if the key was not present.
    pub fn insert(&mut self, key: Vec<u8>) -> bool {
        self.put(key, Vec::new()).is_none()
    }

    /// Remove `key`. Returns the value it had.
    pub fn remove(&mut self, key: &[u8]) -> Option<Vec<u8>> {
        let previous = self.get(key).map(<[u8]>::to_vec);
        if previous.is_some() {
            self.delta.remove(key);
            self.removed.insert(key.to_vec());
        }
        previous
    }

    /// Remove everything. Entries added afterwards survive the commit.
    pub fn clear(&mut self) {
        self.cleared = true;
        self.delta.clear();
        self.removed.clear();
    }

    /// Merged view in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&[u8], &[u8])> + '_ {
        let mut merged: BTreeMap<&[u8], &[u8]> = BTreeMap::new();
        if !self.cleared {
            for (k, v) in &self.baseline {
                if !self.removed.contains(k) {
                    merged.insert(k, v);
                }
            }
        }
        for (k, v) in &self.delta {
            merged.insert(k, v);
        }
        merged.into_iter()
    }

    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `true` if a commit would write anything.
    pub fn is_dirty(&self) -> bool {
        self.cleared || !self.delta.is_empty() || !self.removed.is_empty()
    }

    pub(crate) fn is_cleared(&self) -> bool {
        self.cleared
    }

    pub(crate) fn delta(&self) -> &BTreeMap<Vec<u8>, Vec<u8>> {
        &self.delta
    }

    pub(crate) fn removed(&self) -> &BTreeSet<Vec<u8>> {
        &self.removed
    }

    /// Fold committed changes into the baseline.
    pub fn mark_committed(&mut self) {
        if self.cleared {
            self.baseline.clear();
            self.cleared = false;
        }
        for key in std::mem::take(&mut self.removed) {
            self.baseline.remove(&key);
        }
        self.baseline.append(&mut self.delta);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loaded(entries: &[(&str, &str)]) -> PersistentCollection {
        let baseline = entries
            .iter()
            .map(|(k, v)| (k.as_bytes().to_vec(), v.as_bytes().to_vec()))
            .collect();
        PersistentCollection::with_baseline(ObjectId::new(1), CollectionKind::Map, baseline)
    }

    #[test]
    fn kind_for_object() {
        assert_eq!(CollectionKind::for_object(ObjectKind::TreeMap), Some(CollectionKind::Map));
        assert_eq!(CollectionKind::for_object(ObjectKind::TreeSet), Some(CollectionKind::Set));
        assert_eq!(CollectionKind::for_object(ObjectKind::List), None);
        assert!(matches!(
            CollectionKind::require(ObjectId::new(4), ObjectKind::List),
            Err(CollectionError::NotACollection { .. })
        ));
    }

    #[test]
    fn tri_state_lookups() {
        let mut c = loaded(&[("a", "1"), ("b", "2")]);
        assert_eq!(c.entry_state(b"a"), EntryState::Present(b"1"));
        assert_eq!(c.entry_state(b"z"), EntryState::Absent);

        assert_eq!(c.remove(b"a"), Some(b"1".to_vec()));
        assert_eq!(c.entry_state(b"a"), EntryState::PendingTombstone);
        assert_eq!(c.get(b"a"), None);

        c.put(b"a".to_vec(), b"3".to_vec());
        assert_eq!(c.entry_state(b"a"), EntryState::Present(b"3"));
        assert!(c.removed().is_empty());
    }

    #[test]
    fn removing_absent_key_leaves_no_tombstone() {
        let mut c = loaded(&[]);
        assert_eq!(c.remove(b"x"), None);
        assert!(!c.is_dirty());
    }

    #[test]
    fn clear_hides_baseline_but_keeps_later_writes() {
        let mut c = loaded(&[("a", "1"), ("b", "2")]);
        c.put(b"c".to_vec(), b"3".to_vec());
        c.clear();
        assert!(c.is_empty());
        assert_eq!(c.entry_state(b"a"), EntryState::Absent);

        c.put(b"b".to_vec(), b"9".to_vec());
        let view: Vec<_> = c.iter().collect();
        assert_eq!(view, vec![(&b"b"[..], &b"9"[..])]);
        assert!(c.is_dirty());
    }

    #[test]
    fn merged_view_and_fold() {
        let mut c = loaded(&[("a", "1"), ("b", "2"), ("c", "3")]);
        c.remove(b"b");
        c.put(b"c".to_vec(), b"30".to_vec());
        c.put(b"d".to_vec(), b"4".to_vec());
        let keys: Vec<_> = c.iter().map(|(k, _)| k.to_vec()).collect();
        assert_eq!(keys, vec![b"a".to_vec(), b"c".to_vec(), b"d".to_vec()]);
        assert_eq!(c.len(), 3);

        let before: Vec<(Vec<u8>, Vec<u8>)> =
            c.iter().map(|(k, v)| (k.to_vec(), v.to_vec())).collect();
        c.mark_committed();
        assert!(!c.is_dirty());
        let after: Vec<(Vec<u8>, Vec<u8>)> =
            c.iter().map(|(k, v)| (k.to_vec(), v.to_vec())).collect();
        assert_eq!(before, after);
    }

    #[test]
    fn set_insert_reports_novelty() {
        let mut s = PersistentCollection::new(ObjectId::new(2), CollectionKind::Set);
        assert!(s.insert(b"x".to_vec()));
        assert!(!s.insert(b"x".to_vec()));
        assert_eq!(s.get(b"x"), Some(&b""[..]));
    }
}
