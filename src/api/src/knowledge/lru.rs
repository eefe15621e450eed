//! Bounded LRU chunk cache with request coalescing.
//!
//! Bookkeeping (lookup, insert, evict) happens under a short-lived
//! `parking_lot` lock; chunk I/O never runs while it is held. Concurrent
//! misses for the same chunk share one in-flight load:
//!
//! 1. check the cache (hit updates recency)
//! 2. join or create the in-flight cell for the id
//! 3. inside the cell, re-check the cache, then load without any lock
//! 4. install the loaded chunk, evicting the least-recently-used entry
//!
//! Dropping a caller's future cancels its load before anything is installed;
//! another waiter on the same cell then takes over.

use lru::LruCache;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::debug;

use super::chunk::Chunk;
use crate::error::KnowledgeResult;

type InFlight = Arc<OnceCell<KnowledgeResult<Arc<Chunk>>>>;

/// Whether a chunk came from memory or had to be loaded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheOutcome {
    Hit,
    Loaded,
}

/// Cache counters
#[derive(Debug, Default)]
struct CacheCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    loads: AtomicU64,
    evictions: AtomicU64,
}

/// Point-in-time view of the cache counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub loads: u64,
    pub evictions: u64,
    pub resident: usize,
    pub capacity: usize,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// LRU cache of parsed chunks keyed by chunk id
pub struct ChunkCache {
    entries: Mutex<LruCache<u32, Arc<Chunk>>>,
    in_flight: Mutex<HashMap<u32, InFlight>>,
    capacity: NonZeroUsize,
    counters: CacheCounters,
}

impl ChunkCache {
    /// Create a cache holding at most `capacity` chunks (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            in_flight: Mutex::new(HashMap::new()),
            capacity,
            counters: CacheCounters::default(),
        }
    }

    /// Cached chunk, marking it most recently used.
    pub fn get(&self, id: u32) -> Option<Arc<Chunk>> {
        self.entries.lock().get(&id).cloned()
    }

    /// Whether a chunk is resident. Does not touch recency.
    pub fn contains(&self, id: u32) -> bool {
        self.entries.lock().contains(&id)
    }

    /// Install a chunk, evicting the least-recently-used entry if full.
    pub fn insert(&self, chunk: Arc<Chunk>) {
        let id = chunk.id();
        let evicted = self.entries.lock().push(id, chunk);
        if let Some((evicted_id, _)) = evicted {
            // push returns the old value when replacing the same key
            if evicted_id != id {
                self.counters.evictions.fetch_add(1, Ordering::Relaxed);
                debug!("Evicted chunk {} to make room for chunk {}", evicted_id, id);
            }
        }
    }

    /// Drop a chunk from the cache, returning whether it was resident.
    pub fn evict(&self, id: u32) -> bool {
        self.entries.lock().pop(&id).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity.get()
    }

    /// Resident chunk ids, most recently used first.
    pub fn resident_ids(&self) -> Vec<u32> {
        self.entries.lock().iter().map(|(id, _)| *id).collect()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            loads: self.counters.loads.load(Ordering::Relaxed),
            evictions: self.counters.evictions.load(Ordering::Relaxed),
            resident: self.len(),
            capacity: self.capacity(),
        }
    }

    /// Return the cached chunk or run `loader` exactly once across all
    /// concurrent callers for the same id.
    ///
    /// Only the caller whose loader ran sees `Loaded`; callers that joined
    /// its in-flight load see `Hit`.
    pub async fn get_or_load<F, Fut>(
        &self,
        id: u32,
        loader: F,
    ) -> KnowledgeResult<(Arc<Chunk>, CacheOutcome)>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = KnowledgeResult<Chunk>>,
    {
        if let Some(chunk) = self.get(id) {
            self.counters.hits.fetch_add(1, Ordering::Relaxed);
            return Ok((chunk, CacheOutcome::Hit));
        }
        self.counters.misses.fetch_add(1, Ordering::Relaxed);

        let cell = {
            let mut in_flight = self.in_flight.lock();
            in_flight.entry(id).or_default().clone()
        };

        // Set only by the caller whose loader actually ran
        let mut loaded_here = false;
        let ran = &mut loaded_here;
        let result = cell
            .get_or_init(|| async move {
                // Another caller may have installed it between our check and now
                if let Some(chunk) = self.get(id) {
                    return Ok(chunk);
                }
                self.counters.loads.fetch_add(1, Ordering::Relaxed);
                *ran = true;
                let chunk = Arc::new(loader().await?);
                self.insert(chunk.clone());
                Ok(chunk)
            })
            .await
            .clone();

        {
            let mut in_flight = self.in_flight.lock();
            if in_flight.get(&id).is_some_and(|current| Arc::ptr_eq(current, &cell)) {
                in_flight.remove(&id);
            }
        }

        let outcome = if loaded_here {
            CacheOutcome::Loaded
        } else {
            CacheOutcome::Hit
        };
        result.map(|chunk| (chunk, outcome))
    }
}
