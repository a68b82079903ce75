use async_trait::async_trait;
use log::debug;
use std::collections::{BTreeMap, HashMap};
use std::fmt::Display;
use tokio::sync::Mutex;

use crate::CacheResult;

/// Default maximum number of cached entries.
const DEFAULT_MAX_ENTRIES: usize = 10000;

/// String key/value store behind the caching overlay. Any error is treated as a miss.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get(&self, key: &str) -> CacheResult<Option<String>>;
    async fn set(&self, key: &str, value: String) -> CacheResult<()>;
    async fn delete(&self, key: &str) -> CacheResult<()>;
}

pub fn primary_cache_key(dimension: &str, key: &impl Display) -> String {
    format!("pri-{}-{}", dimension.to_lowercase(), key)
}

pub fn resource_cache_key(resource: &str, id: &impl Display) -> String {
    format!("res-{}-{}", resource.to_lowercase(), id)
}

pub fn secondary_cache_key(resource: &str, index: &str, key: &impl Display) -> String {
    format!(
        "sec-{}-{}-{}",
        resource.to_lowercase(),
        index.to_lowercase(),
        key
    )
}

/// Unique identifier for each stored value, used for LRU tracking (lower = older).
type EntryId = u64;

struct MemoryCacheInner {
    values: HashMap<String, (String, EntryId)>,
    lru: BTreeMap<EntryId, String>,
    next_entry_id: EntryId,
    max_entries: usize,
}

impl MemoryCacheInner {
    fn next_id(&mut self) -> EntryId {
        let id = self.next_entry_id;
        self.next_entry_id += 1;
        id
    }

    fn evict_lru(&mut self) {
        let oldest = match self.lru.keys().next().copied() {
            Some(id) => id,
            None => return,
        };
        if let Some(key) = self.lru.remove(&oldest) {
            self.values.remove(&key);
            debug!("MemoryCache: evicted {}", key);
        }
    }
}

/// Bounded in-process LRU cache.
pub struct MemoryCache {
    inner: Mutex<MemoryCacheInner>,
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ENTRIES)
    }
}

impl MemoryCache {
    pub fn new(max_entries: usize) -> Self {
        Self {
            inner: Mutex::new(MemoryCacheInner {
                values: HashMap::new(),
                lru: BTreeMap::new(),
                next_entry_id: 0,
                max_entries,
            }),
        }
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.values.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl CacheBackend for MemoryCache {
    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        let mut inner = self.inner.lock().await;
        let old_id = match inner.values.get(key) {
            Some((_, id)) => *id,
            None => return Ok(None),
        };

        // refresh recency
        let new_id = inner.next_id();
        inner.lru.remove(&old_id);
        inner.lru.insert(new_id, key.to_string());
        let value = inner.values.get_mut(key).map(|(value, id)| {
            *id = new_id;
            value.clone()
        });
        Ok(value)
    }

    async fn set(&self, key: &str, value: String) -> CacheResult<()> {
        let mut inner = self.inner.lock().await;
        if inner.max_entries == 0 {
            return Ok(());
        }

        let new_id = inner.next_id();
        if let Some((_, old_id)) = inner.values.remove(key) {
            inner.lru.remove(&old_id);
        }
        while inner.values.len() >= inner.max_entries {
            inner.evict_lru();
        }
        inner.values.insert(key.to_string(), (value, new_id));
        inner.lru.insert(new_id, key.to_string());
        Ok(())
    }

    async fn delete(&self, key: &str) -> CacheResult<()> {
        let mut inner = self.inner.lock().await;
        if let Some((_, id)) = inner.values.remove(key) {
            inner.lru.remove(&id);
        }
        Ok(())
    }
}
