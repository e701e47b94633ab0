use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

/// Pluggable persistence backend used by operation handlers.
///
/// Entities are JSON documents grouped by collection and keyed by id.
/// Implementations: memory (tests, demo host); SQL or key-value stores are
/// left to the embedding application.
#[async_trait]
pub trait PersistenceProvider: Send + Sync {
    /// Insert or replace an entity.
    async fn save(&self, collection: &str, id: &str, entity: Value) -> anyhow::Result<()>;

    /// Load a single entity by id.
    async fn get_by_id(&self, collection: &str, id: &str) -> anyhow::Result<Option<Value>>;

    /// Load every entity in a collection, ordered by id.
    async fn get_all(&self, collection: &str) -> anyhow::Result<Vec<Value>>;

    /// Load the entities with the given ids, in request order. Missing ids
    /// are skipped.
    async fn get_by_ids(&self, collection: &str, ids: &[String]) -> anyhow::Result<Vec<Value>>;

    /// Entities whose top-level `field` equals `value`.
    async fn find_by_value(
        &self,
        collection: &str,
        field: &str,
        value: &Value,
    ) -> anyhow::Result<Vec<Value>>;

    /// Delete an entity. Returns whether it existed.
    async fn delete(&self, collection: &str, id: &str) -> anyhow::Result<bool>;

    /// Start a transaction whose writes become visible on commit.
    async fn begin_transaction(&self) -> anyhow::Result<Box<dyn Transaction>>;
}

/// Buffered writes against a [`PersistenceProvider`].
///
/// Dropping a transaction without committing discards its writes.
#[async_trait]
pub trait Transaction: Send {
    fn save(&mut self, collection: &str, id: &str, entity: Value);

    fn delete(&mut self, collection: &str, id: &str);

    /// Apply every buffered write atomically.
    async fn commit(self: Box<Self>) -> anyhow::Result<()>;

    /// Discard every buffered write.
    async fn rollback(self: Box<Self>) -> anyhow::Result<()>;
}

/// A typed entity stored through [`PersistenceExt`].
pub trait Entity: Serialize + DeserializeOwned + Send + Sync {
    const COLLECTION: &'static str;

    fn id(&self) -> String;
}

/// Typed convenience layer over [`PersistenceProvider`].
#[async_trait]
pub trait PersistenceExt: PersistenceProvider {
    async fn save_entity<T: Entity>(&self, entity: &T) -> anyhow::Result<()> {
        let document = serde_json::to_value(entity)?;
        self.save(T::COLLECTION, &entity.id(), document).await
    }

    async fn get_entity<T: Entity>(&self, id: &str) -> anyhow::Result<Option<T>> {
        self.get_by_id(T::COLLECTION, id)
            .await?
            .map(serde_json::from_value)
            .transpose()
            .map_err(Into::into)
    }

    async fn get_all_typed<T: Entity>(&self) -> anyhow::Result<Vec<T>> {
        decode_all(self.get_all(T::COLLECTION).await?)
    }

    async fn get_by_ids_typed<T: Entity>(&self, ids: &[String]) -> anyhow::Result<Vec<T>> {
        decode_all(self.get_by_ids(T::COLLECTION, ids).await?)
    }

    async fn find_typed<T: Entity>(&self, field: &str, value: &Value) -> anyhow::Result<Vec<T>> {
        decode_all(self.find_by_value(T::COLLECTION, field, value).await?)
    }

    async fn delete_entity<T: Entity>(&self, id: &str) -> anyhow::Result<bool> {
        self.delete(T::COLLECTION, id).await
    }
}

impl<P: PersistenceProvider + ?Sized> PersistenceExt for P {}

fn decode_all<T: DeserializeOwned>(documents: Vec<Value>) -> anyhow::Result<Vec<T>> {
    documents
        .into_iter()
        .map(|doc| serde_json::from_value(doc).map_err(Into::into))
        .collect()
}
