//! Small bounded caches for rarely-changing lookups.
//!
//! A [`BoundedCache`] keeps at most `capacity` entries and evicts the least
//! recently used one when full. Entries are never invalidated: callers accept
//! possibly stale values in exchange for fewer calls. Caches are owned by
//! the component that declares them (typically a [`CachedLoader`]) and live
//! as long as it does.

use std::collections::{HashMap, VecDeque};
use std::hash::Hash;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use pagewise::{JsonMap, LoadFailure, OnDemandLoader, Value};
use tracing::debug;

use crate::loader::{LoadRequest, RestLoader};

// ---------------------------------------------------------------------------
// BoundedCache
// ---------------------------------------------------------------------------

/// Thread-safe LRU cache with a fixed maximum size.
pub struct BoundedCache<K, V> {
    state: Mutex<CacheState<K, V>>,
    capacity: usize,
}

struct CacheState<K, V> {
    entries: HashMap<K, V>,
    /// Least recently used first.
    order: VecDeque<K>,
}

impl<K, V> BoundedCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Create a cache holding at most `capacity` entries (minimum 1).
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(CacheState {
                entries: HashMap::new(),
                order: VecDeque::new(),
            }),
            capacity: capacity.max(1),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Look up `key`, marking it as most recently used.
    pub fn get(&self, key: &K) -> Option<V> {
        let mut state = self.lock();
        let value = state.entries.get(key).cloned()?;
        touch(&mut state.order, key);
        Some(value)
    }

    /// Insert or replace `key`, evicting the least recently used entry if the
    /// cache is full.
    pub fn insert(&self, key: K, value: V) {
        let mut state = self.lock();
        if state.entries.insert(key.clone(), value).is_some() {
            touch(&mut state.order, &key);
            return;
        }
        state.order.push_back(key);
        while state.entries.len() > self.capacity {
            let Some(oldest) = state.order.pop_front() else {
                break;
            };
            state.entries.remove(&oldest);
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CacheState<K, V>> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }
}

fn touch<K: Eq + Clone>(order: &mut VecDeque<K>, key: &K) {
    if let Some(pos) = order.iter().position(|k| k == key) {
        if let Some(k) = order.remove(pos) {
            order.push_back(k);
        }
    }
}

// ---------------------------------------------------------------------------
// CachedLoader
// ---------------------------------------------------------------------------

/// A [`RestLoader`] whose results are shared across records through a
/// [`BoundedCache`] keyed by the prepared request (path plus parameters).
///
/// Use it for lookups keyed by an entity id that many records repeat, such
/// as the application a version belongs to.
#[derive(Clone)]
pub struct CachedLoader {
    inner: RestLoader,
    cache: Arc<BoundedCache<LoadRequest, Value>>,
}

impl CachedLoader {
    pub fn new(inner: RestLoader, capacity: usize) -> Self {
        Self {
            inner,
            cache: Arc::new(BoundedCache::new(capacity)),
        }
    }

    /// Share an existing cache, e.g. between loaders of several queries.
    pub fn with_cache(inner: RestLoader, cache: Arc<BoundedCache<LoadRequest, Value>>) -> Self {
        Self { inner, cache }
    }

    pub fn cache(&self) -> &Arc<BoundedCache<LoadRequest, Value>> {
        &self.cache
    }
}

#[async_trait]
impl OnDemandLoader for CachedLoader {
    async fn load(&self, owner: &JsonMap) -> Result<Value, LoadFailure> {
        let request = self.inner.request_for(owner)?;
        if let Some(hit) = self.cache.get(&request) {
            debug!(path = %request.path, "on-demand cache hit");
            return Ok(hit);
        }
        let value = self.inner.fetch(&request).await?;
        self.cache.insert(request, value.clone());
        Ok(value)
    }

    fn describe(&self) -> String {
        format!("cached {}", self.inner.describe())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
