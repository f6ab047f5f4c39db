//! # Entity store collaborator.
//!
//! Durable persistence of [`Entity`] records lives outside this crate. The
//! supervisor and provisioner only need [`EntityStore`]; [`MemoryStore`] is a
//! process-local implementation for embedding and tests.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::entity::{Entity, EntityId, EntityStatus};
use crate::error::StoreError;

/// Read/patch access to entity records.
#[async_trait]
pub trait EntityStore: Send + Sync + 'static {
    /// Loads one entity.
    async fn get(&self, id: &EntityId) -> Result<Entity, StoreError>;

    /// Inserts or replaces an entity.
    async fn save(&self, entity: Entity) -> Result<(), StoreError>;

    /// Removes an entity; returns whether it existed.
    async fn delete(&self, id: &EntityId) -> Result<bool, StoreError>;

    /// Lists every stored entity, sorted by id.
    async fn list(&self) -> Result<Vec<Entity>, StoreError>;
}

/// In-memory [`EntityStore`].
#[derive(Default)]
pub struct MemoryStore {
    entities: RwLock<HashMap<EntityId, Entity>>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store seeded with `entities`.
    pub fn with_entities(entities: impl IntoIterator<Item = Entity>) -> Self {
        let map = entities.into_iter().map(|e| (e.id.clone(), e)).collect();
        Self {
            entities: RwLock::new(map),
        }
    }
}

#[async_trait]
impl EntityStore for MemoryStore {
    async fn get(&self, id: &EntityId) -> Result<Entity, StoreError> {
        self.entities
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound { id: id.clone() })
    }

    async fn save(&self, entity: Entity) -> Result<(), StoreError> {
        self.entities
            .write()
            .await
            .insert(entity.id.clone(), entity);
        Ok(())
    }

    async fn delete(&self, id: &EntityId) -> Result<bool, StoreError> {
        Ok(self.entities.write().await.remove(id).is_some())
    }

    async fn list(&self) -> Result<Vec<Entity>, StoreError> {
        let mut all: Vec<Entity> = self.entities.read().await.values().cloned().collect();
        all.sort_unstable_by(|a, b| a.id.cmp(&b.id));
        Ok(all)
    }
}

/// Loads `id`, applies `patch`, saves it back and returns the saved record.
///
/// The get/save pair is not atomic; concurrent patches of the same entity are
/// last-writer-wins, which matches how status fields are owned (one writer per
/// lifecycle phase).
pub async fn patch_entity<F>(
    store: &dyn EntityStore,
    id: &EntityId,
    patch: F,
) -> Result<Entity, StoreError>
where
    F: FnOnce(&mut Entity) + Send,
{
    let mut entity = store.get(id).await?;
    patch(&mut entity);
    store.save(entity.clone()).await?;
    Ok(entity)
}

/// Sets the status of `id`, logging instead of failing.
///
/// Used by background paths (reader loop exit, provisioning) where nobody is
/// waiting for the error.
pub(crate) async fn set_status_logged(store: &dyn EntityStore, id: &EntityId, status: EntityStatus) {
    if let Err(e) = patch_entity(store, id, |e| e.status = status).await {
        tracing::warn!(entity = %id, status = %status, error = %e, "status update failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{NewEntity, ProcessKind};

    fn entity(id: &str) -> Entity {
        Entity::from_request(
            EntityId::from(id),
            NewEntity::new(id, ProcessKind::Vanilla, "1.20.1"),
        )
    }

    #[tokio::test]
    async fn test_get_missing_is_not_found() {
        let store = MemoryStore::new();
        let err = store.get(&EntityId::from("nope")).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_patch_roundtrip() {
        let store = MemoryStore::with_entities([entity("b"), entity("a")]);
        let patched = patch_entity(&store, &EntityId::from("a"), |e| {
            e.status = EntityStatus::Stopped;
        })
        .await
        .unwrap();
        assert_eq!(patched.status, EntityStatus::Stopped);
        assert_eq!(
            store.get(&EntityId::from("a")).await.unwrap().status,
            EntityStatus::Stopped
        );

        let ids: Vec<String> = store
            .list()
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.id.to_string())
            .collect();
        assert_eq!(ids, ["a", "b"]);

        assert!(store.delete(&EntityId::from("a")).await.unwrap());
        assert!(!store.delete(&EntityId::from("a")).await.unwrap());
    }
}
