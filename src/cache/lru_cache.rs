use dashmap::DashMap;
use std::{
    borrow::Borrow,
    hash::Hash,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};
use tracing::debug;

/// Entrada del cache con TTL y último acceso
#[derive(Debug)]
struct CacheEntry<V> {
    value: V,
    created_at: Instant,
    /// Milliseconds since the cache epoch; touched on every hit.
    last_access: AtomicU64,
}

impl<V> CacheEntry<V> {
    fn is_expired(&self, ttl: Option<Duration>, now: Instant) -> bool {
        ttl.map_or(false, |ttl| now.duration_since(self.created_at) > ttl)
    }
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    expired_removals: AtomicU64,
}

/// Bounded LRU cache with an optional TTL.
///
/// Clones share the same storage.
#[derive(Debug)]
pub struct LRUCache<K: Clone + Eq + Hash, V> {
    data: Arc<DashMap<K, CacheEntry<V>>>,
    counters: Arc<Counters>,
    capacity: usize,
    ttl: Option<Duration>,
    epoch: Instant,
}

impl<K, V> LRUCache<K, V>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// A capacity of zero is treated as one.
    pub fn new(capacity: usize, ttl: Option<Duration>) -> Self {
        Self {
            data: Arc::new(DashMap::new()),
            counters: Arc::new(Counters::default()),
            capacity: capacity.max(1),
            ttl,
            epoch: Instant::now(),
        }
    }

    /// Inserts or replaces `key`, evicting the least recently used entries
    /// past capacity. Returns the previous value.
    pub fn insert(&self, key: K, value: V) -> Option<V> {
        let now = Instant::now();
        let entry = CacheEntry {
            value,
            created_at: now,
            last_access: AtomicU64::new(self.millis_since_epoch(now)),
        };
        let previous = self.data.insert(key.clone(), entry).map(|old| old.value);

        while self.data.len() > self.capacity {
            if !self.evict_one(&key) {
                break;
            }
        }
        previous
    }

    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let now = Instant::now();
        let expired = match self.data.get(key) {
            Some(entry) if !entry.is_expired(self.ttl, now) => {
                entry
                    .last_access
                    .store(self.millis_since_epoch(now), Ordering::Relaxed);
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                return Some(entry.value.clone());
            }
            Some(_) => true,
            None => false,
        };

        if expired && self.data.remove(key).is_some() {
            self.counters.expired_removals.fetch_add(1, Ordering::Relaxed);
        }
        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    pub fn remove<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.data.remove(key).map(|(_, entry)| entry.value)
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn ttl(&self) -> Option<Duration> {
        self.ttl
    }

    pub fn clear(&self) {
        self.data.clear();
    }

    /// Limpia entradas expiradas y retorna el número de elementos removidos
    pub fn cleanup_expired(&self) -> usize {
        let now = Instant::now();
        let keys_to_remove: Vec<K> = self
            .data
            .iter()
            .filter(|entry| entry.value().is_expired(self.ttl, now))
            .map(|entry| entry.key().clone())
            .collect();

        let mut removed = 0;
        for key in keys_to_remove {
            if self.data.remove(&key).is_some() {
                removed += 1;
            }
        }

        if removed > 0 {
            self.counters
                .expired_removals
                .fetch_add(removed as u64, Ordering::Relaxed);
            debug!("Limpiadas {} entradas expiradas del cache", removed);
        }

        removed
    }

    pub fn metrics(&self) -> CacheMetrics {
        CacheMetrics {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            evictions: self.counters.evictions.load(Ordering::Relaxed),
            expired_removals: self.counters.expired_removals.load(Ordering::Relaxed),
        }
    }

    // Never evicts `keep`, the entry that was just inserted.
    fn evict_one(&self, keep: &K) -> bool {
        let oldest = self
            .data
            .iter()
            .filter(|entry| entry.key() != keep)
            .min_by_key(|entry| entry.value().last_access.load(Ordering::Relaxed))
            .map(|entry| entry.key().clone());

        match oldest {
            Some(key) => {
                if self.data.remove(&key).is_some() {
                    self.counters.evictions.fetch_add(1, Ordering::Relaxed);
                }
                true
            }
            None => false,
        }
    }

    fn millis_since_epoch(&self, now: Instant) -> u64 {
        now.duration_since(self.epoch).as_millis() as u64
    }
}

impl<K, V> Clone for LRUCache<K, V>
where
    K: Clone + Eq + Hash,
{
    fn clone(&self) -> Self {
        Self {
            data: Arc::clone(&self.data),
            counters: Arc::clone(&self.counters),
            capacity: self.capacity,
            ttl: self.ttl,
            epoch: self.epoch,
        }
    }
}

/// Métricas básicas del cache
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheMetrics {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expired_removals: u64,
}

impl CacheMetrics {
    pub fn hit_rate(&self) -> f64 {
        if self.hits + self.misses == 0 {
            0.0
        } else {
            self.hits as f64 / (self.hits + self.misses) as f64
        }
    }

    pub fn miss_rate(&self) -> f64 {
        1.0 - self.hit_rate()
    }
}
