//! In-memory [`PersistenceProvider`] backed by a `parking_lot::RwLock`.
//!
//! Collections are `BTreeMap`s keyed by id, so `get_all` is id-ordered.
//! Transactions buffer their writes and apply them under a single write lock.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;

use crate::traits::{PersistenceProvider, Transaction};

type Collections = HashMap<String, BTreeMap<String, Value>>;

/// Process-local persistence. Clones share the same data.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPersistence {
    collections: Arc<RwLock<Collections>>,
}

impl InMemoryPersistence {
    /// Creates a new, empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entities in `collection`.
    #[must_use]
    pub fn count(&self, collection: &str) -> usize {
        self.collections
            .read()
            .get(collection)
            .map_or(0, BTreeMap::len)
    }
}

#[async_trait]
impl PersistenceProvider for InMemoryPersistence {
    async fn save(&self, collection: &str, id: &str, entity: Value) -> anyhow::Result<()> {
        self.collections
            .write()
            .entry(collection.to_string())
            .or_default()
            .insert(id.to_string(), entity);
        Ok(())
    }

    async fn get_by_id(&self, collection: &str, id: &str) -> anyhow::Result<Option<Value>> {
        Ok(self
            .collections
            .read()
            .get(collection)
            .and_then(|c| c.get(id))
            .cloned())
    }

    async fn get_all(&self, collection: &str) -> anyhow::Result<Vec<Value>> {
        Ok(self
            .collections
            .read()
            .get(collection)
            .map(|c| c.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn get_by_ids(&self, collection: &str, ids: &[String]) -> anyhow::Result<Vec<Value>> {
        let guard = self.collections.read();
        let Some(entities) = guard.get(collection) else {
            return Ok(Vec::new());
        };
        Ok(ids.iter().filter_map(|id| entities.get(id).cloned()).collect())
    }

    async fn find_by_value(
        &self,
        collection: &str,
        field: &str,
        value: &Value,
    ) -> anyhow::Result<Vec<Value>> {
        Ok(self
            .collections
            .read()
            .get(collection)
            .map(|c| {
                c.values()
                    .filter(|entity| entity.get(field) == Some(value))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn delete(&self, collection: &str, id: &str) -> anyhow::Result<bool> {
        Ok(self
            .collections
            .write()
            .get_mut(collection)
            .is_some_and(|c| c.remove(id).is_some()))
    }

    async fn begin_transaction(&self) -> anyhow::Result<Box<dyn Transaction>> {
        Ok(Box::new(InMemoryTransaction {
            collections: Arc::clone(&self.collections),
            writes: Vec::new(),
        }))
    }
}

// ---------------------------------------------------------------------------
// Transaction
// ---------------------------------------------------------------------------

#[derive(Debug)]
enum Write {
    Save {
        collection: String,
        id: String,
        entity: Value,
    },
    Delete {
        collection: String,
        id: String,
    },
}

#[derive(Debug)]
struct InMemoryTransaction {
    collections: Arc<RwLock<Collections>>,
    writes: Vec<Write>,
}

#[async_trait]
impl Transaction for InMemoryTransaction {
    fn save(&mut self, collection: &str, id: &str, entity: Value) {
        self.writes.push(Write::Save {
            collection: collection.to_string(),
            id: id.to_string(),
            entity,
        });
    }

    fn delete(&mut self, collection: &str, id: &str) {
        self.writes.push(Write::Delete {
            collection: collection.to_string(),
            id: id.to_string(),
        });
    }

    async fn commit(self: Box<Self>) -> anyhow::Result<()> {
        let mut guard = self.collections.write();
        for write in self.writes {
            match write {
                Write::Save {
                    collection,
                    id,
                    entity,
                } => {
                    guard.entry(collection).or_default().insert(id, entity);
                }
                Write::Delete { collection, id } => {
                    if let Some(entities) = guard.get_mut(&collection) {
                        entities.remove(&id);
                    }
                }
            }
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> anyhow::Result<()> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
