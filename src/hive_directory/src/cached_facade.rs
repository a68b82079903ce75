use log::{debug, warn};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::cache::{primary_cache_key, resource_cache_key, secondary_cache_key, CacheBackend};
use crate::facade::{DeletedResourceIds, HiveFacade};
use crate::semaphore::{any_read_only, node_ids_of};
use crate::{
    AnyKey, CacheError, CacheResult, DirError, DirResult, Directory, DirectoryKey, KeySemaphore,
    Node, NodeId, Resource, SecondaryIndex, SecondaryKeyBatch,
};

const DEFAULT_CACHE_OP_TIMEOUT_MS: u64 = 200;

/// Read-through overlay over a [`HiveFacade`].
///
/// The facade stays the source of truth: a cache that errors, times out or returns
/// garbage only costs a round trip to the directory. Primary key mutations keep the
/// `pri-` entry current and evict the `res-` and `sec-` entries derived from it;
/// resource and secondary mutations only delegate.
///
/// Directory calls run inline on the calling task. They are short SQLite queries, but
/// they do block the worker thread, so serve the overlay from a multi-thread runtime.
pub struct CachedHive<D: Directory> {
    facade: Arc<HiveFacade<D>>,
    cache: Arc<dyn CacheBackend>,
    op_timeout: Duration,
}

impl<D: Directory> CachedHive<D> {
    pub fn new(facade: Arc<HiveFacade<D>>, cache: Arc<dyn CacheBackend>) -> Self {
        Self {
            facade,
            cache,
            op_timeout: Duration::from_millis(DEFAULT_CACHE_OP_TIMEOUT_MS),
        }
    }

    /// Upper bound for a single cache operation; a slower cache counts as failed.
    pub fn with_op_timeout(mut self, op_timeout: Duration) -> Self {
        self.op_timeout = op_timeout;
        self
    }

    pub fn facade(&self) -> &Arc<HiveFacade<D>> {
        &self.facade
    }

    async fn bounded<T>(&self, op: impl Future<Output = CacheResult<T>>) -> CacheResult<T> {
        match tokio::time::timeout(self.op_timeout, op).await {
            Ok(result) => result,
            Err(_) => Err(CacheError::Timeout(self.op_timeout.as_millis() as u64)),
        }
    }

    async fn cache_get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        match self.bounded(self.cache.get(key)).await {
            Ok(Some(raw)) => match serde_json::from_str::<T>(&raw) {
                Ok(value) => Some(value),
                Err(e) => {
                    warn!("CachedHive: decode {} failed! {}", key, CacheError::Codec(e.to_string()));
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                warn!("CachedHive: get {} failed! {}", key, e);
                None
            }
        }
    }

    async fn cache_set<T: Serialize>(&self, key: &str, value: &T) {
        let raw = match serde_json::to_string(value) {
            Ok(raw) => raw,
            Err(e) => {
                warn!("CachedHive: encode {} failed! {}", key, e);
                return;
            }
        };
        if let Err(e) = self.bounded(self.cache.set(key, raw)).await {
            warn!("CachedHive: set {} failed! {}", key, e);
        }
    }

    async fn cache_delete(&self, key: &str) {
        if let Err(e) = self.bounded(self.cache.delete(key)).await {
            warn!("CachedHive: delete {} failed! {}", key, e);
        }
    }

    fn primary_key_of(&self, key: &D::Key) -> String {
        primary_cache_key(&self.facade.dimension().name, key)
    }

    /// Rewrites the `pri-` entry from the facade after a primary key mutation.
    async fn refresh_primary(&self, key: &D::Key) {
        let cache_key = self.primary_key_of(key);
        match self.facade.get_key_semaphores_of_primary_index_key(key) {
            Ok(semaphores) if !semaphores.is_empty() => {
                self.cache_set(&cache_key, &semaphores).await
            }
            Ok(_) => self.cache_delete(&cache_key).await,
            Err(e) => {
                warn!("CachedHive: refresh {} failed! {}", cache_key, e);
                self.cache_delete(&cache_key).await
            }
        }
    }

    /// Keys of the `res-` and `sec-` entries whose semaphores come from `key`'s rows.
    fn dependent_cache_keys(&self, key: &D::Key) -> DirResult<Vec<String>> {
        let mut cache_keys = Vec::new();
        for resource in self.facade.dimension().resources.iter() {
            let ids: Vec<AnyKey> = self
                .facade
                .get_resource_ids_of_primary_index_key(resource, key)?;
            for id in ids.iter() {
                cache_keys.push(resource_cache_key(&resource.name, id));
            }
            for index in resource.secondary_indexes.iter() {
                let secondary_keys: Vec<AnyKey> = self
                    .facade
                    .get_secondary_index_keys_of_primary_index_key(index, key)?;
                for secondary_key in secondary_keys.iter() {
                    cache_keys.push(secondary_cache_key(
                        &index.resource_name,
                        &index.name,
                        secondary_key,
                    ));
                }
            }
        }
        cache_keys.sort();
        cache_keys.dedup();
        Ok(cache_keys)
    }

    fn dependents_or_none(&self, key: &D::Key) -> Vec<String> {
        match self.dependent_cache_keys(key) {
            Ok(cache_keys) => cache_keys,
            Err(e) => {
                warn!("CachedHive: list entries of primary index key {} failed! {}", key, e);
                Vec::new()
            }
        }
    }

    async fn evict(&self, cache_keys: &[String]) {
        for cache_key in cache_keys.iter() {
            self.cache_delete(cache_key).await;
        }
    }

    /// Rewrites `pri-` and evicts the derived entries after a key's rows changed.
    async fn refresh_primary_and_dependents(&self, key: &D::Key) {
        self.refresh_primary(key).await;
        let dependents = self.dependents_or_none(key);
        self.evict(&dependents).await;
    }

    /// Cached semaphores, or the facade's answer stored on a non-empty miss.
    async fn read_through(
        &self,
        cache_key: String,
        load: impl FnOnce() -> DirResult<Vec<KeySemaphore<D::Key>>>,
    ) -> DirResult<Vec<KeySemaphore<D::Key>>> {
        if let Some(semaphores) = self.cache_get::<Vec<KeySemaphore<D::Key>>>(&cache_key).await {
            debug!("CachedHive: hit {}", cache_key);
            return Ok(semaphores);
        }
        let semaphores = load()?;
        if !semaphores.is_empty() {
            self.cache_set(&cache_key, &semaphores).await;
        }
        Ok(semaphores)
    }

    /// Hit on a non-empty entry short-circuits `true`; a miss never populates.
    async fn exists_through(
        &self,
        cache_key: String,
        load: impl FnOnce() -> DirResult<bool>,
    ) -> DirResult<bool> {
        if let Some(semaphores) = self.cache_get::<Vec<KeySemaphore<D::Key>>>(&cache_key).await {
            if !semaphores.is_empty() {
                return Ok(true);
            }
        }
        load()
    }

    // ---- primary index ----

    pub async fn does_primary_index_key_exist(&self, key: &D::Key) -> DirResult<bool> {
        self.exists_through(self.primary_key_of(key), || {
            self.facade.does_primary_index_key_exist(key)
        })
        .await
    }

    pub async fn get_key_semaphores_of_primary_index_key(
        &self,
        key: &D::Key,
    ) -> DirResult<Vec<KeySemaphore<D::Key>>> {
        self.read_through(self.primary_key_of(key), || {
            self.facade.get_key_semaphores_of_primary_index_key(key)
        })
        .await
    }

    pub async fn get_node_ids_of_primary_index_key(&self, key: &D::Key) -> DirResult<Vec<NodeId>> {
        let semaphores = self.get_key_semaphores_of_primary_index_key(key).await?;
        Ok(node_ids_of(&semaphores))
    }

    pub async fn get_read_only_of_primary_index_key(&self, key: &D::Key) -> DirResult<bool> {
        let semaphores = self.get_key_semaphores_of_primary_index_key(key).await?;
        if semaphores.is_empty() {
            return Err(DirError::NotFound(format!("primary index key {}", key)));
        }
        Ok(any_read_only(&semaphores))
    }

    pub async fn get_resource_ids_of_primary_index_key<R: DirectoryKey>(
        &self,
        resource: &Resource,
        key: &D::Key,
    ) -> DirResult<Vec<R>> {
        self.facade.get_resource_ids_of_primary_index_key(resource, key)
    }

    pub async fn insert_primary_index_key(&self, key: &D::Key) -> DirResult<Node> {
        let node = self.facade.insert_primary_index_key(key)?;
        self.refresh_primary(key).await;
        Ok(node)
    }

    pub async fn insert_primary_index_key_on_node(
        &self,
        key: &D::Key,
        node_id: NodeId,
    ) -> DirResult<()> {
        self.facade.insert_primary_index_key_on_node(key, node_id)?;
        self.refresh_primary_and_dependents(key).await;
        Ok(())
    }

    pub async fn update_primary_index_key_read_only(
        &self,
        key: &D::Key,
        read_only: bool,
    ) -> DirResult<()> {
        self.facade.update_primary_index_key_read_only(key, read_only)?;
        self.refresh_primary_and_dependents(key).await;
        Ok(())
    }

    pub async fn update_node_of_primary_index_key(
        &self,
        key: &D::Key,
        from_node_id: NodeId,
        to_node_id: NodeId,
    ) -> DirResult<()> {
        self.facade
            .update_node_of_primary_index_key(key, from_node_id, to_node_id)?;
        self.refresh_primary_and_dependents(key).await;
        Ok(())
    }

    pub async fn delete_node_of_primary_index_key(
        &self,
        key: &D::Key,
        node_id: NodeId,
    ) -> DirResult<()> {
        self.facade.delete_node_of_primary_index_key(key, node_id)?;
        self.refresh_primary_and_dependents(key).await;
        Ok(())
    }

    /// Also evicts the `res-` and `sec-` entries of everything the cascade removed,
    /// the partitioning resource's entry for `key` included.
    pub async fn delete_primary_index_key(&self, key: &D::Key) -> DirResult<DeletedResourceIds> {
        // listed up front, the rows are gone afterwards
        let mut dependents = self.dependents_or_none(key);
        let deleted = self.facade.delete_primary_index_key(key)?;

        dependents.push(self.primary_key_of(key));
        if let Some(partitioning) = self.facade.dimension().partitioning_resource() {
            dependents.push(resource_cache_key(&partitioning.name, key));
        }
        for (resource_name, id) in deleted.iter() {
            dependents.push(resource_cache_key(resource_name, id));
        }
        dependents.sort();
        dependents.dedup();
        self.evict(&dependents).await;
        Ok(deleted)
    }

    // ---- resource ids ----

    pub async fn does_resource_id_exist<R: DirectoryKey>(
        &self,
        resource: &Resource,
        id: &R,
    ) -> DirResult<bool> {
        self.exists_through(resource_cache_key(&resource.name, id), || {
            self.facade.does_resource_id_exist(resource, id)
        })
        .await
    }

    pub async fn get_key_semaphores_of_resource_id<R: DirectoryKey>(
        &self,
        resource: &Resource,
        id: &R,
    ) -> DirResult<Vec<KeySemaphore<D::Key>>> {
        self.read_through(resource_cache_key(&resource.name, id), || {
            self.facade.get_key_semaphores_of_resource_id(resource, id)
        })
        .await
    }

    pub async fn get_node_ids_of_resource_id<R: DirectoryKey>(
        &self,
        resource: &Resource,
        id: &R,
    ) -> DirResult<Vec<NodeId>> {
        let semaphores = self.get_key_semaphores_of_resource_id(resource, id).await?;
        Ok(node_ids_of(&semaphores))
    }

    pub async fn get_primary_index_key_of_resource_id<R: DirectoryKey>(
        &self,
        resource: &Resource,
        id: &R,
    ) -> DirResult<D::Key> {
        self.facade.get_primary_index_key_of_resource_id(resource, id)
    }

    pub async fn insert_resource_id<R: DirectoryKey>(
        &self,
        resource: &Resource,
        id: &R,
        primary_key: &D::Key,
    ) -> DirResult<()> {
        self.facade.insert_resource_id(resource, id, primary_key)
    }

    pub async fn update_primary_index_key_of_resource_id<R: DirectoryKey>(
        &self,
        resource: &Resource,
        id: &R,
        primary_key: &D::Key,
    ) -> DirResult<()> {
        self.facade
            .update_primary_index_key_of_resource_id(resource, id, primary_key)
    }

    pub async fn delete_resource_id<R: DirectoryKey>(
        &self,
        resource: &Resource,
        id: &R,
    ) -> DirResult<()> {
        self.facade.delete_resource_id(resource, id)
    }

    // ---- secondary indexes ----

    /// Always asks the facade: cached semaphores do not identify the owner.
    pub async fn does_secondary_index_key_exist<S: DirectoryKey, O: DirectoryKey>(
        &self,
        index: &SecondaryIndex,
        key: &S,
        owner_id: &O,
    ) -> DirResult<bool> {
        self.facade.does_secondary_index_key_exist(index, key, owner_id)
    }

    pub async fn get_key_semaphores_of_secondary_index_key<S: DirectoryKey>(
        &self,
        index: &SecondaryIndex,
        key: &S,
    ) -> DirResult<Vec<KeySemaphore<D::Key>>> {
        let cache_key = secondary_cache_key(&index.resource_name, &index.name, key);
        self.read_through(cache_key, || {
            self.facade.get_key_semaphores_of_secondary_index_key(index, key)
        })
        .await
    }

    pub async fn get_node_ids_of_secondary_index_key<S: DirectoryKey>(
        &self,
        index: &SecondaryIndex,
        key: &S,
    ) -> DirResult<Vec<NodeId>> {
        let semaphores = self
            .get_key_semaphores_of_secondary_index_key(index, key)
            .await?;
        Ok(node_ids_of(&semaphores))
    }

    pub async fn get_primary_index_keys_of_secondary_index_key<S: DirectoryKey>(
        &self,
        index: &SecondaryIndex,
        key: &S,
    ) -> DirResult<Vec<D::Key>> {
        self.facade
            .get_primary_index_keys_of_secondary_index_key(index, key)
    }

    pub async fn get_resource_ids_of_secondary_index_key<S: DirectoryKey, R: DirectoryKey>(
        &self,
        index: &SecondaryIndex,
        key: &S,
    ) -> DirResult<Vec<R>> {
        self.facade.get_resource_ids_of_secondary_index_key(index, key)
    }

    pub async fn get_secondary_index_keys_of_resource_id<S: DirectoryKey, R: DirectoryKey>(
        &self,
        index: &SecondaryIndex,
        id: &R,
    ) -> DirResult<Vec<S>> {
        self.facade.get_secondary_index_keys_of_resource_id(index, id)
    }

    pub async fn get_secondary_index_keys_of_primary_index_key<S: DirectoryKey>(
        &self,
        index: &SecondaryIndex,
        key: &D::Key,
    ) -> DirResult<Vec<S>> {
        self.facade
            .get_secondary_index_keys_of_primary_index_key(index, key)
    }

    pub async fn insert_secondary_index_key<S: DirectoryKey, O: DirectoryKey>(
        &self,
        index: &SecondaryIndex,
        key: &S,
        owner_id: &O,
    ) -> DirResult<()> {
        self.facade.insert_secondary_index_key(index, key, owner_id)
    }

    pub async fn delete_secondary_index_key<S: DirectoryKey, O: DirectoryKey>(
        &self,
        index: &SecondaryIndex,
        key: &S,
        owner_id: &O,
    ) -> DirResult<()> {
        self.facade.delete_secondary_index_key(index, key, owner_id)
    }

    pub async fn insert_secondary_index_keys<O: DirectoryKey>(
        &self,
        batch: &SecondaryKeyBatch,
        owner_id: &O,
    ) -> DirResult<()> {
        self.facade.insert_secondary_index_keys(batch, owner_id)
    }

    pub async fn delete_secondary_index_keys<O: DirectoryKey>(
        &self,
        batch: &SecondaryKeyBatch,
        owner_id: &O,
    ) -> DirResult<()> {
        self.facade.delete_secondary_index_keys(batch, owner_id)
    }
}
