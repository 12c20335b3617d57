//! Entity registry: the pool of addressable parties and their state.
//!
//! All mutation is single-writer-per-entity: workers acquire the entity's
//! logical lock through [`EntityRegistry::try_lock`] before touching it,
//! and status changes go through optimistic compare-and-set so concurrent
//! signal deliveries cannot clobber each other.

use crate::domain::{Entity, EntityId, EntityStatus, PipelineError, TimestampUtc};
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, RwLock};

/// Predicate applied by [`EntityRegistry::query`].
pub type EntityPredicate = Box<dyn Fn(&Entity) -> bool + Send + 'static>;

/// Source of record for entities.
///
/// The in-memory implementation backs tests and simulation; durable
/// implementations plug in behind the same trait.
#[async_trait]
pub trait EntityRegistry: Send + Sync {
    /// Validates and inserts or replaces an entity.
    async fn upsert(&self, entity: Entity) -> Result<(), PipelineError>;

    /// Fetches an entity by id.
    async fn get(&self, id: EntityId) -> Result<Entity, PipelineError>;

    /// Returns a lazy, finite, non-restartable stream of matching entities,
    /// ordered by entity id so results are deterministic for a fixed pool.
    fn query(&self, predicate: EntityPredicate) -> BoxStream<'static, Entity>;

    /// Transitions `id` from `expected` to `new` atomically.
    ///
    /// Fails with `Conflict` when the current status differs from
    /// `expected`, and with `InvalidTransition` when the change is outside
    /// the transition table. Returns the updated entity.
    async fn compare_and_set_status(
        &self,
        id: EntityId,
        expected: EntityStatus,
        new: EntityStatus,
        now: TimestampUtc,
    ) -> Result<Entity, PipelineError>;

    /// Acquires the entity's logical lock, or returns `None` when another
    /// worker holds it.
    fn try_lock(&self, id: EntityId) -> Option<EntityLease>;

    /// True while some worker holds the entity's lock.
    fn is_locked(&self, id: EntityId) -> bool;
}

/// Table of per-entity logical locks shared by registry implementations.
#[derive(Clone, Default)]
pub struct LockTable {
    held: Arc<Mutex<HashSet<EntityId>>>,
}

impl LockTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tries to acquire the lock for `id`; `None` if already held.
    pub fn try_acquire(&self, id: EntityId) -> Option<EntityLease> {
        let mut held = self.held.lock().unwrap_or_else(|e| e.into_inner());
        if held.insert(id) {
            Some(EntityLease {
                id,
                table: Arc::clone(&self.held),
            })
        } else {
            None
        }
    }

    pub fn is_held(&self, id: EntityId) -> bool {
        self.held
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(&id)
    }
}

/// RAII guard for a per-entity logical lock; released on drop.
pub struct EntityLease {
    id: EntityId,
    table: Arc<Mutex<HashSet<EntityId>>>,
}

impl EntityLease {
    pub fn entity_id(&self) -> EntityId {
        self.id
    }
}

impl Drop for EntityLease {
    fn drop(&mut self) {
        let mut held = self.table.lock().unwrap_or_else(|e| e.into_inner());
        held.remove(&self.id);
    }
}

/// In-memory registry used by tests, simulation, and single-node runs.
pub struct InMemoryRegistry {
    entities: Arc<RwLock<BTreeMap<EntityId, Entity>>>,
    locks: LockTable,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self {
            entities: Arc::new(RwLock::new(BTreeMap::new())),
            locks: LockTable::new(),
        }
    }

    /// Number of entities in the pool.
    pub fn len(&self) -> usize {
        self.entities
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InMemoryRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EntityRegistry for InMemoryRegistry {
    async fn upsert(&self, entity: Entity) -> Result<(), PipelineError> {
        entity.validate()?;
        let mut entities = self.entities.write().unwrap_or_else(|e| e.into_inner());
        entities.insert(entity.id, entity);
        Ok(())
    }

    async fn get(&self, id: EntityId) -> Result<Entity, PipelineError> {
        let entities = self.entities.read().unwrap_or_else(|e| e.into_inner());
        entities
            .get(&id)
            .cloned()
            .ok_or(PipelineError::NotFound { id: id.to_string() })
    }

    fn query(&self, predicate: EntityPredicate) -> BoxStream<'static, Entity> {
        // Snapshot under the read lock; the BTreeMap keeps iteration ordered
        // by entity id. The predicate runs lazily as the stream is consumed.
        let snapshot: Vec<Entity> = {
            let entities = self.entities.read().unwrap_or_else(|e| e.into_inner());
            entities.values().cloned().collect()
        };
        futures::stream::iter(snapshot.into_iter().filter(move |e| predicate(e))).boxed()
    }

    async fn compare_and_set_status(
        &self,
        id: EntityId,
        expected: EntityStatus,
        new: EntityStatus,
        now: TimestampUtc,
    ) -> Result<Entity, PipelineError> {
        let mut entities = self.entities.write().unwrap_or_else(|e| e.into_inner());
        let entity = entities
            .get_mut(&id)
            .ok_or(PipelineError::NotFound { id: id.to_string() })?;

        if entity.status != expected {
            return Err(PipelineError::Conflict {
                message: format!(
                    "entity {}: expected status {}, found {}",
                    id, expected, entity.status
                ),
            });
        }
        if !expected.can_transition_to(new) {
            return Err(PipelineError::invalid_transition(expected, new));
        }

        entity.status = new;
        entity.updated_at = now;
        Ok(entity.clone())
    }

    fn try_lock(&self, id: EntityId) -> Option<EntityLease> {
        self.locks.try_acquire(id)
    }

    fn is_locked(&self, id: EntityId) -> bool {
        self.locks.is_held(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ContactInfo, EntityCategory, EntityProfile};

    fn sample_entity() -> Entity {
        Entity::new(
            EntityCategory::Carrier,
            EntityProfile {
                contact: ContactInfo {
                    name: "Iris Chen".to_string(),
                    company: "Chen Hauling".to_string(),
                    email: "iris@chenhauling.example".to_string(),
                    phone: None,
                },
                estimated_revenue: 400_000.0,
                fleet_size: 18,
                monthly_volume: 90,
                industry: "Logistics".to_string(),
                region: "West".to_string(),
                capabilities: vec!["dry_van".to_string()],
                rating: 3.8,
            },
            TimestampUtc::now(),
        )
    }

    #[tokio::test]
    async fn upsert_then_get_round_trips() {
        let registry = InMemoryRegistry::new();
        let entity = sample_entity();
        let id = entity.id;
        registry.upsert(entity.clone()).await.unwrap();
        assert_eq!(registry.get(id).await.unwrap(), entity);
    }

    #[tokio::test]
    async fn upsert_rejects_invalid_entity() {
        let registry = InMemoryRegistry::new();
        let mut entity = sample_entity();
        entity.profile.contact.email = "nope".to_string();
        assert!(matches!(
            registry.upsert(entity).await,
            Err(PipelineError::Validation { .. })
        ));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn get_unknown_id_is_not_found() {
        let registry = InMemoryRegistry::new();
        assert!(matches!(
            registry.get(EntityId::new()).await,
            Err(PipelineError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn cas_applies_valid_transition() {
        let registry = InMemoryRegistry::new();
        let entity = sample_entity();
        let id = entity.id;
        registry.upsert(entity).await.unwrap();

        let updated = registry
            .compare_and_set_status(
                id,
                EntityStatus::New,
                EntityStatus::Contacted,
                TimestampUtc::now(),
            )
            .await
            .unwrap();
        assert_eq!(updated.status, EntityStatus::Contacted);
    }

    #[tokio::test]
    async fn cas_with_stale_expectation_conflicts() {
        let registry = InMemoryRegistry::new();
        let entity = sample_entity();
        let id = entity.id;
        registry.upsert(entity).await.unwrap();
        let now = TimestampUtc::now();

        registry
            .compare_and_set_status(id, EntityStatus::New, EntityStatus::Contacted, now)
            .await
            .unwrap();

        // Second writer still believes the entity is new.
        let err = registry
            .compare_and_set_status(id, EntityStatus::New, EntityStatus::Contacted, now)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Conflict { .. }));
    }

    #[tokio::test]
    async fn cas_rejects_off_table_transition() {
        let registry = InMemoryRegistry::new();
        let entity = sample_entity();
        let id = entity.id;
        registry.upsert(entity).await.unwrap();

        let err = registry
            .compare_and_set_status(
                id,
                EntityStatus::New,
                EntityStatus::Negotiating,
                TimestampUtc::now(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::InvalidTransition { .. }));
        assert_eq!(
            registry.get(id).await.unwrap().status,
            EntityStatus::New,
            "state unchanged on rejection"
        );
    }

    #[tokio::test]
    async fn lock_is_exclusive_until_dropped() {
        let registry = InMemoryRegistry::new();
        let entity = sample_entity();
        let id = entity.id;
        registry.upsert(entity).await.unwrap();

        let lease = registry.try_lock(id).expect("first acquisition");
        assert!(registry.is_locked(id));
        assert!(registry.try_lock(id).is_none());

        drop(lease);
        assert!(!registry.is_locked(id));
        assert!(registry.try_lock(id).is_some());
    }

    #[tokio::test]
    async fn query_is_ordered_and_filtered() {
        let registry = InMemoryRegistry::new();
        let mut ids = Vec::new();
        for _ in 0..5 {
            let entity = sample_entity();
            ids.push(entity.id);
            registry.upsert(entity).await.unwrap();
        }
        ids.sort();

        let results: Vec<Entity> = registry
            .query(Box::new(|e| e.status == EntityStatus::New))
            .collect()
            .await;
        let result_ids: Vec<EntityId> = results.iter().map(|e| e.id).collect();
        assert_eq!(result_ids, ids, "results sorted by entity id");

        let none: Vec<Entity> = registry
            .query(Box::new(|e| e.status == EntityStatus::Closed))
            .collect()
            .await;
        assert!(none.is_empty());
    }
}
