//! Per-pass cache of bitmap blobs touched by one checkpoint.

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;

use objdb_kv::{Database, Transaction};
use objdb_types::ObjectId;

use crate::codec::{Blob, WalOp};
use crate::error::OidResult;

/// What flushing a cache wrote.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct FlushSummary {
    pub written: usize,
    pub deleted: usize,
}

/// Blobs of one bitmap store, loaded on first touch and written back
/// together at the end of the pass.
pub(crate) struct BlobCache {
    db: Database,
    width: u64,
    blobs: BTreeMap<u64, Blob>,
}

impl BlobCache {
    pub(crate) fn new(db: Database, width: u64) -> Self {
        Self {
            db,
            width,
            blobs: BTreeMap::new(),
        }
    }

    pub(crate) fn apply(
        &mut self,
        tx: &mut dyn Transaction,
        id: ObjectId,
        op: WalOp,
    ) -> OidResult<()> {
        let blob = self.load(tx, id)?;
        match op {
            WalOp::Add => blob.set(id),
            WalOp::Delete => blob.clear(id),
        };
        Ok(())
    }

    fn load(&mut self, tx: &mut dyn Transaction, id: ObjectId) -> OidResult<&mut Blob> {
        let base = Blob::base_for(id, self.width);
        match self.blobs.entry(base) {
            Entry::Occupied(e) => Ok(e.into_mut()),
            Entry::Vacant(e) => {
                let key = base.to_be_bytes();
                let blob = match tx.get(&self.db, &key)? {
                    Some(value) => Blob::decode(&key, &value)?,
                    None => Blob::empty(base, self.width),
                };
                Ok(e.insert(blob))
            }
        }
    }

    /// Write every touched blob, deleting the all-zero ones, and empty the
    /// cache.
    pub(crate) fn flush(&mut self, tx: &mut dyn Transaction) -> OidResult<FlushSummary> {
        let mut summary = FlushSummary::default();
        for (_, blob) in std::mem::take(&mut self.blobs) {
            if blob.is_empty() {
                tx.delete(&self.db, &blob.key())?;
                summary.deleted += 1;
            } else {
                tx.put(&self.db, &blob.key(), &blob.encode_value())?;
                summary.written += 1;
            }
        }
        Ok(summary)
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.blobs.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use objdb_kv::{KvBackend, MemoryBackend};

    #[test]
    fn loads_applies_and_flushes() {
        let backend = MemoryBackend::new();
        let engine = backend.open().unwrap();
        let db = engine.open_database("bits").unwrap();

        let mut existing = Blob::empty(64, 64);
        existing.set(ObjectId::new(70));
        backend
            .store()
            .put_raw("bits", &existing.key(), &existing.encode_value());

        let mut cache = BlobCache::new(db, 64);
        let mut tx = engine.begin().unwrap();
        cache.apply(tx.as_mut(), ObjectId::new(3), WalOp::Add).unwrap();
        cache.apply(tx.as_mut(), ObjectId::new(70), WalOp::Delete).unwrap();
        cache.apply(tx.as_mut(), ObjectId::new(5), WalOp::Add).unwrap();
        assert_eq!(cache.len(), 2);

        let summary = cache.flush(tx.as_mut()).unwrap();
        assert_eq!(summary, FlushSummary { written: 1, deleted: 1 });
        assert_eq!(cache.len(), 0);
        tx.commit().unwrap();

        let records = backend.store().records("bits");
        assert_eq!(records.len(), 1);
        let blob = Blob::decode(&records[0].0, &records[0].1).unwrap();
        assert_eq!(
            blob.ids().collect::<Vec<_>>(),
            vec![ObjectId::new(3), ObjectId::new(5)]
        );
    }
}
