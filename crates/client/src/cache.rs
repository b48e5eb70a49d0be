//! Ephemeral entity cache, keyed by entity id or by list filter tuple.
//!
//! Writes are crate-private: only dispatcher reconciliation and explicit
//! invalidation change what is cached.

use std::collections::{BTreeMap, HashMap};

use reqflow_core::domain::batch::Batch;
use reqflow_core::domain::cheque::Cheque;
use reqflow_core::domain::requisition::Requisition;
use reqflow_core::domain::EntityRef;
use tokio::sync::RwLock;

#[derive(Clone, Debug, PartialEq)]
pub enum CachedEntity {
    Requisition(Requisition),
    Batch(Batch),
    Cheque(Cheque),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ListResource {
    Requisitions,
    Batches,
    ChequeDrafts,
    PendingSignatures,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListKey {
    pub resource: ListResource,
    pub filters: BTreeMap<String, String>,
}

impl ListKey {
    pub fn new(resource: ListResource) -> Self {
        Self { resource, filters: BTreeMap::new() }
    }

    pub fn with_filter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.filters.insert(key.into(), value.into());
        self
    }
}

pub trait Cacheable: Clone + Send + Sync + 'static {
    fn cache_ref(&self) -> EntityRef;
    fn into_cached(self) -> CachedEntity;
    fn from_cached(cached: &CachedEntity) -> Option<Self>;
    /// List views that may contain an entity of this kind.
    fn related_lists() -> &'static [ListResource];
    /// Other entities whose server state moves when this one transitions.
    fn dependents(&self) -> Vec<EntityRef> {
        Vec::new()
    }
}

impl Cacheable for Requisition {
    fn cache_ref(&self) -> EntityRef {
        EntityRef::Requisition(self.id.clone())
    }

    fn into_cached(self) -> CachedEntity {
        CachedEntity::Requisition(self)
    }

    fn from_cached(cached: &CachedEntity) -> Option<Self> {
        match cached {
            CachedEntity::Requisition(requisition) => Some(requisition.clone()),
            CachedEntity::Batch(_) | CachedEntity::Cheque(_) => None,
        }
    }

    fn related_lists() -> &'static [ListResource] {
        &[ListResource::Requisitions]
    }
}

impl Cacheable for Batch {
    fn cache_ref(&self) -> EntityRef {
        EntityRef::Batch(self.id.clone())
    }

    fn into_cached(self) -> CachedEntity {
        CachedEntity::Batch(self)
    }

    fn from_cached(cached: &CachedEntity) -> Option<Self> {
        match cached {
            CachedEntity::Batch(batch) => Some(batch.clone()),
            CachedEntity::Requisition(_) | CachedEntity::Cheque(_) => None,
        }
    }

    fn related_lists() -> &'static [ListResource] {
        &[ListResource::Batches, ListResource::PendingSignatures, ListResource::Requisitions]
    }

    fn dependents(&self) -> Vec<EntityRef> {
        self.batch_requisitions
            .iter()
            .map(|member| EntityRef::Requisition(member.requisition_id.clone()))
            .collect()
    }
}

impl Cacheable for Cheque {
    fn cache_ref(&self) -> EntityRef {
        EntityRef::Cheque(self.id.clone())
    }

    fn into_cached(self) -> CachedEntity {
        CachedEntity::Cheque(self)
    }

    fn from_cached(cached: &CachedEntity) -> Option<Self> {
        match cached {
            CachedEntity::Cheque(cheque) => Some(cheque.clone()),
            CachedEntity::Requisition(_) | CachedEntity::Batch(_) => None,
        }
    }

    fn related_lists() -> &'static [ListResource] {
        &[ListResource::ChequeDrafts]
    }

    fn dependents(&self) -> Vec<EntityRef> {
        self.batch_id.iter().map(|id| EntityRef::Batch(id.clone())).collect()
    }
}

#[derive(Debug, Default)]
pub struct EntityCache {
    entities: RwLock<HashMap<EntityRef, CachedEntity>>,
    lists: RwLock<HashMap<ListKey, Vec<EntityRef>>>,
}

impl EntityCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get<T: Cacheable>(&self, entity: &EntityRef) -> Option<T> {
        self.entities.read().await.get(entity).and_then(T::from_cached)
    }

    pub async fn contains(&self, entity: &EntityRef) -> bool {
        self.entities.read().await.contains_key(entity)
    }

    /// A cached list, only while every member is still cached.
    pub async fn list<T: Cacheable>(&self, key: &ListKey) -> Option<Vec<T>> {
        let refs = self.lists.read().await.get(key).cloned()?;
        let entities = self.entities.read().await;
        refs.iter().map(|entity| entities.get(entity).and_then(T::from_cached)).collect()
    }

    pub(crate) async fn store<T: Cacheable>(&self, value: T) {
        let key = value.cache_ref();
        self.entities.write().await.insert(key, value.into_cached());
    }

    pub(crate) async fn store_list<T: Cacheable>(&self, key: ListKey, items: Vec<T>) {
        let refs = items.iter().map(Cacheable::cache_ref).collect();
        {
            let mut entities = self.entities.write().await;
            for item in items {
                entities.insert(item.cache_ref(), item.into_cached());
            }
        }
        self.lists.write().await.insert(key, refs);
    }

    pub async fn invalidate(&self, entity: &EntityRef) {
        self.entities.write().await.remove(entity);
    }

    pub async fn invalidate_lists(&self, resource: ListResource) {
        self.lists.write().await.retain(|key, _| key.resource != resource);
    }

    pub async fn clear(&self) {
        self.entities.write().await.clear();
        self.lists.write().await.clear();
    }

    pub async fn len(&self) -> usize {
        self.entities.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entities.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use reqflow_core::domain::cheque::{Cheque, ChequeId, ChequeStatus};
    use reqflow_core::domain::payee::Payee;
    use reqflow_core::domain::EntityRef;
    use reqflow_core::money::Money;

    use super::{EntityCache, ListKey, ListResource};

    fn cheque(id: &str) -> Cheque {
        Cheque {
            id: ChequeId(id.to_owned()),
            number: format!("000{id}"),
            status: ChequeStatus::Draft,
            payee: Payee::Vendor { payee_id: "v-1".to_owned(), vendor_name: "Acme".to_owned() },
            total_amount: Money::parse("12.00").expect("amount"),
            requisition_ids: Vec::new(),
            batch_id: None,
            void_reason: None,
        }
    }

    #[tokio::test]
    async fn lists_disappear_when_a_member_is_invalidated() {
        let cache = EntityCache::new();
        let key = ListKey::new(ListResource::ChequeDrafts).with_filter("batch", "b-1");
        cache.store_list(key.clone(), vec![cheque("1"), cheque("2")]).await;

        let cached: Option<Vec<Cheque>> = cache.list(&key).await;
        assert_eq!(cached.map(|items| items.len()), Some(2));

        cache.invalidate(&EntityRef::Cheque(ChequeId("2".to_owned()))).await;
        assert!(cache.list::<Cheque>(&key).await.is_none());
        assert!(cache.get::<Cheque>(&EntityRef::Cheque(ChequeId("1".to_owned()))).await.is_some());
    }

    #[tokio::test]
    async fn invalidating_a_resource_keeps_other_lists() {
        let cache = EntityCache::new();
        let drafts = ListKey::new(ListResource::ChequeDrafts);
        let batches = ListKey::new(ListResource::Batches);
        cache.store_list(drafts.clone(), vec![cheque("1")]).await;
        cache.store_list::<Cheque>(batches.clone(), Vec::new()).await;

        cache.invalidate_lists(ListResource::ChequeDrafts).await;
        assert!(cache.list::<Cheque>(&drafts).await.is_none());
        assert_eq!(cache.list::<Cheque>(&batches).await, Some(Vec::new()));

        cache.clear().await;
        assert!(cache.is_empty().await);
    }
}
