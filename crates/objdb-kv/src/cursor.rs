//! Forward cursor over one database, built on [`Transaction::seek`].

use crate::error::KvResult;
use crate::traits::{Database, OpStatus, SeekBound, Transaction};

/// A forward cursor positioned inside one database of a transaction.
///
/// The cursor remembers the key it last returned. `next` continues strictly
/// after that key, so deleting the current entry never skips or repeats
/// anything.
pub struct Cursor<'t> {
    tx: &'t mut dyn Transaction,
    db: Database,
    current: Option<Vec<u8>>,
}

impl<'t> Cursor<'t> {
    /// Open an unpositioned cursor. The first `next` returns the first key.
    pub fn open(tx: &'t mut dyn Transaction, db: &Database) -> Self {
        Self {
            tx,
            db: db.clone(),
            current: None,
        }
    }

    /// Advance to the next entry.
    pub fn next(&mut self) -> KvResult<Option<(Vec<u8>, Vec<u8>)>> {
        let found = match self.current.as_deref() {
            None => self.tx.seek(&self.db, &[], SeekBound::Inclusive)?,
            Some(key) => self.tx.seek(&self.db, key, SeekBound::Exclusive)?,
        };
        self.position(found)
    }

    /// Position at the first entry whose key is `>= key`.
    pub fn search_key_range(&mut self, key: &[u8]) -> KvResult<Option<(Vec<u8>, Vec<u8>)>> {
        let found = self.tx.seek(&self.db, key, SeekBound::Inclusive)?;
        self.position(found)
    }

    /// Delete the entry the cursor is positioned on.
    ///
    /// Returns [`OpStatus::NotFound`] if the cursor is unpositioned.
    pub fn delete_current(&mut self) -> KvResult<OpStatus> {
        match self.current.as_deref() {
            Some(key) => self.tx.delete(&self.db, key),
            None => Ok(OpStatus::NotFound),
        }
    }

    /// The transaction this cursor reads through, for work on other
    /// databases while the cursor stays positioned.
    pub fn transaction(&mut self) -> &mut dyn Transaction {
        &mut *self.tx
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    fn position(
        &mut self,
        found: Option<(Vec<u8>, Vec<u8>)>,
    ) -> KvResult<Option<(Vec<u8>, Vec<u8>)>> {
        if let Some((key, _)) = &found {
            self.current = Some(key.clone());
        }
        Ok(found)
    }
}
