//! Named GC roots: UTF-8 name key to 8-byte object id value.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use objdb_kv::{with_transaction, Cursor, Database, KvEngine, Transaction};
use objdb_types::ObjectId;

use crate::error::{EnvError, EnvResult};

pub struct RootStore {
    engine: Arc<dyn KvEngine>,
    db: Database,
}

impl RootStore {
    pub fn new(engine: Arc<dyn KvEngine>, db: Database) -> Self {
        Self { engine, db }
    }

    /// Bind `name` to `id` inside the caller's transaction.
    pub fn add_root(&self, tx: &mut dyn Transaction, name: &str, id: ObjectId) -> EnvResult<()> {
        if id.is_null() {
            return Err(EnvError::DataIntegrity(format!(
                "root {name} cannot point at the null id"
            )));
        }
        tx.put(&self.db, name.as_bytes(), &id.to_key())?;
        Ok(())
    }

    pub fn load_root_id(&self, name: &str) -> EnvResult<Option<ObjectId>> {
        with_transaction(self.engine.as_ref(), |tx| {
            match tx.get(&self.db, name.as_bytes())? {
                Some(bytes) => Ok(Some(ObjectId::from_key(&bytes)?)),
                None => Ok(None),
            }
        })
    }

    pub fn load_roots(&self) -> EnvResult<BTreeSet<ObjectId>> {
        Ok(self.load_root_names_to_ids()?.into_values().collect())
    }

    pub fn load_root_names(&self) -> EnvResult<BTreeSet<String>> {
        Ok(self.load_root_names_to_ids()?.into_keys().collect())
    }

    pub fn load_root_names_to_ids(&self) -> EnvResult<BTreeMap<String, ObjectId>> {
        with_transaction(self.engine.as_ref(), |tx| {
            let mut roots = BTreeMap::new();
            let mut cursor = Cursor::open(tx, &self.db);
            while let Some((key, value)) = cursor.next()? {
                let name = String::from_utf8(key)
                    .map_err(|e| EnvError::DataIntegrity(format!("root name: {e}")))?;
                roots.insert(name, ObjectId::from_key(&value)?);
            }
            Ok(roots)
        })
    }
}
