//! Partitioned knowledge store: index resolution plus cached chunk loads.

use futures::future::join_all;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::chunk::Chunk;
use super::index::PartitionIndex;
use super::lru::{CacheOutcome, CacheStats, ChunkCache};
use super::record::HorseProfile;
use super::source::ChunkSource;
use crate::error::{with_deadline, KnowledgeError, KnowledgeResult};

/// A found horse and how it was obtained
#[derive(Debug, Clone)]
pub struct Lookup {
    pub profile: Arc<HorseProfile>,
    pub chunk_id: u32,
    pub outcome: CacheOutcome,
}

/// Resolves horses to chunks and serves them through the LRU cache.
pub struct KnowledgeStore {
    index: Arc<PartitionIndex>,
    source: Arc<dyn ChunkSource>,
    cache: ChunkCache,
}

impl KnowledgeStore {
    pub fn new(index: PartitionIndex, source: Arc<dyn ChunkSource>, cache_capacity: usize) -> Self {
        info!(
            "Knowledge store ready: version {}, {} {} chunks, {} horses, cache capacity {}",
            index.version,
            index.total_chunks,
            index.method.name(),
            index.total_horses,
            cache_capacity
        );
        Self {
            index: Arc::new(index),
            source,
            cache: ChunkCache::new(cache_capacity),
        }
    }

    pub fn index(&self) -> &PartitionIndex {
        &self.index
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn cache(&self) -> &ChunkCache {
        &self.cache
    }

    /// Chunk id for a key, if any chunk can hold it.
    pub fn resolve(&self, key: &str) -> Option<u32> {
        self.index.resolve(key)
    }

    /// Load a chunk through the cache.
    ///
    /// A chunk that fails to parse is evicted (if resident) and fetched once
    /// more, bypassing any local copy; a second failure is reported as
    /// corrupt for that chunk only.
    pub async fn load_chunk(&self, chunk_id: u32) -> KnowledgeResult<(Arc<Chunk>, CacheOutcome)> {
        let meta = self
            .index
            .chunk(chunk_id)
            .ok_or_else(|| KnowledgeError::InvalidInput(format!("unknown chunk id {}", chunk_id)))?;
        let filename = meta.filename.as_str();
        let source = &self.source;

        self.cache
            .get_or_load(chunk_id, || async move {
                let bytes = source.fetch(filename, false).await?;
                match Chunk::parse(chunk_id, &bytes) {
                    Ok(chunk) => Ok(chunk),
                    Err(first) => {
                        warn!("{}; re-fetching {}", first, filename);
                        if self.cache.evict(chunk_id) {
                            debug!("Evicted unusable chunk {}", chunk_id);
                        }
                        let bytes = source.fetch(filename, true).await?;
                        Chunk::parse(chunk_id, &bytes)
                    }
                }
            })
            .await
    }

    /// Find one horse.
    pub async fn get_entity(&self, key: &str) -> KnowledgeResult<Lookup> {
        let chunk_id = self
            .resolve(key)
            .ok_or_else(|| KnowledgeError::not_found(key))?;
        let (chunk, outcome) = self.load_chunk(chunk_id).await?;
        let profile = chunk.get(key).ok_or_else(|| KnowledgeError::not_found(key))?;

        Ok(Lookup {
            profile,
            chunk_id,
            outcome,
        })
    }

    /// Find many horses, loading each distinct chunk once and concurrently.
    ///
    /// Each chunk load has its own `timeout`; a slow chunk fails only the
    /// keys it holds. Keys no chunk can hold are NotFound without any I/O.
    pub async fn batch_get(
        &self,
        keys: &[String],
        timeout: Duration,
    ) -> HashMap<String, KnowledgeResult<Lookup>> {
        let mut results = HashMap::with_capacity(keys.len());
        let mut by_chunk: BTreeMap<u32, Vec<&String>> = BTreeMap::new();

        for key in keys {
            match self.resolve(key) {
                Some(chunk_id) => by_chunk.entry(chunk_id).or_default().push(key),
                None => {
                    results.insert(key.clone(), Err(KnowledgeError::not_found(key.as_str())));
                }
            }
        }

        let loads = by_chunk.keys().map(|&chunk_id| async move {
            let context = format!("loading chunk {}", chunk_id);
            let loaded = with_deadline(&context, timeout, self.load_chunk(chunk_id)).await;
            (chunk_id, loaded)
        });

        for (chunk_id, loaded) in join_all(loads).await {
            for key in &by_chunk[&chunk_id] {
                let result = match &loaded {
                    Ok((chunk, outcome)) => chunk
                        .get(key)
                        .map(|profile| Lookup {
                            profile,
                            chunk_id,
                            outcome: *outcome,
                        })
                        .ok_or_else(|| KnowledgeError::not_found(key.as_str())),
                    Err(e) => Err(e.clone()),
                };
                results.insert((*key).clone(), result);
            }
        }

        results
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::knowledge::builder::SnapshotBuilder;
    use crate::knowledge::index::PartitionMethod;
    use crate::knowledge::record::fixtures::{profile_a, profile_with_positions};
    use crate::knowledge::record::Snapshot;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    /// In-memory source that counts fetches and can serve corrupt content.
    pub struct MemorySource {
        files: Mutex<HashMap<String, Vec<u8>>>,
        refreshed: Mutex<HashMap<String, Vec<u8>>>,
        pub fetches: AtomicU32,
        delay: Mutex<Duration>,
    }

    impl MemorySource {
        pub fn new(files: HashMap<String, Vec<u8>>) -> Self {
            Self {
                files: Mutex::new(files),
                refreshed: Mutex::new(HashMap::new()),
                fetches: AtomicU32::new(0),
                delay: Mutex::new(Duration::ZERO),
            }
        }

        pub fn with_delay(self, delay: Duration) -> Self {
            self.set_delay(delay);
            self
        }

        pub fn set_delay(&self, delay: Duration) {
            *self.delay.lock() = delay;
        }

        /// Content served when `refresh` is requested.
        pub fn set_refreshed(&self, name: &str, bytes: Vec<u8>) {
            self.refreshed.lock().insert(name.to_string(), bytes);
        }

        pub fn corrupt(&self, name: &str) {
            self.files.lock().insert(name.to_string(), b"{\"metadata\":".to_vec());
        }
    }

    #[async_trait]
    impl ChunkSource for MemorySource {
        async fn fetch(&self, name: &str, refresh: bool) -> KnowledgeResult<Vec<u8>> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            let delay = *self.delay.lock();
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            if refresh {
                if let Some(bytes) = self.refreshed.lock().get(name) {
                    return Ok(bytes.clone());
                }
            }
            self.files
                .lock()
                .get(name)
                .cloned()
                .ok_or_else(|| KnowledgeError::unavailable(name, "missing"))
        }

        fn describe(&self) -> String {
            "memory".to_string()
        }
    }

    pub fn sample_snapshot(extra: usize) -> Snapshot {
        let mut profiles = BTreeMap::new();
        profiles.insert("A".to_string(), profile_a());
        profiles.insert("B".to_string(), HorseProfile::default());
        for i in 0..extra {
            profiles.insert(
                format!("H{:03}", i),
                profile_with_positions(&[(i % 9 + 1) as u8, 4, 2]),
            );
        }
        Snapshot::from_profiles("test", profiles)
    }

    pub fn memory_store(
        snapshot: &Snapshot,
        chunks: u32,
        method: PartitionMethod,
        capacity: usize,
    ) -> (KnowledgeStore, Arc<MemorySource>) {
        let partitioned = SnapshotBuilder::partition(snapshot, chunks, method).unwrap();
        let source = Arc::new(MemorySource::new(partitioned.files().unwrap()));
        let store = KnowledgeStore::new(partitioned.index, source.clone(), capacity);
        (store, source)
    }

    #[tokio::test]
    async fn test_get_entity_found_and_not_found() {
        let snapshot = sample_snapshot(20);
        let (store, _) = memory_store(&snapshot, 4, PartitionMethod::Range, 2);

        let lookup = store.get_entity("A").await.unwrap();
        assert_eq!(lookup.profile.races.len(), 5);
        assert_eq!(lookup.profile.stats.wins, 2);

        assert!(store.get_entity("B").await.unwrap_err().is_not_found());
        assert!(store.get_entity("Z").await.unwrap_err().is_not_found());
        assert!(store.get_entity("").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_hash_store_not_found_inside_resolved_chunk() {
        let snapshot = sample_snapshot(20);
        let (store, _) = memory_store(&snapshot, 4, PartitionMethod::Hash, 4);

        assert!(store.resolve("Z").is_some());
        assert!(store.get_entity("Z").await.unwrap_err().is_not_found());
        assert!(store.get_entity("H007").await.is_ok());
    }

    #[tokio::test]
    async fn test_second_lookup_is_cache_hit() {
        let snapshot = sample_snapshot(5);
        let (store, source) = memory_store(&snapshot, 2, PartitionMethod::Range, 2);

        assert_eq!(store.get_entity("A").await.unwrap().outcome, CacheOutcome::Loaded);
        assert_eq!(store.get_entity("A").await.unwrap().outcome, CacheOutcome::Hit);
        assert_eq!(source.fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_lookups_fetch_once() {
        let snapshot = sample_snapshot(10);
        let partitioned = SnapshotBuilder::partition(&snapshot, 3, PartitionMethod::Range).unwrap();
        let source = Arc::new(
            MemorySource::new(partitioned.files().unwrap()).with_delay(Duration::from_millis(40)),
        );
        let store = Arc::new(KnowledgeStore::new(partitioned.index, source.clone(), 3));

        let handles: Vec<_> = (0..12)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move { store.get_entity("A").await.map(|l| l.chunk_id) })
            })
            .collect();

        let mut chunk_ids = Vec::new();
        for handle in handles {
            chunk_ids.push(handle.await.unwrap().unwrap());
        }
        chunk_ids.dedup();
        assert_eq!(chunk_ids.len(), 1);
        assert_eq!(source.fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_batch_get_loads_each_chunk_once() {
        let snapshot = sample_snapshot(30);
        let (store, source) = memory_store(&snapshot, 3, PartitionMethod::Range, 3);

        let keys: Vec<String> = ["A", "H000", "H001", "H002", "H028", "Z"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let distinct_chunks: std::collections::HashSet<u32> =
            keys.iter().filter_map(|k| store.resolve(k)).collect();

        let results = store.batch_get(&keys, Duration::from_secs(5)).await;
        assert_eq!(results.len(), keys.len());
        assert!(results["Z"].as_ref().unwrap_err().is_not_found());
        assert!(results["H028"].is_ok());
        assert_eq!(source.fetches.load(Ordering::SeqCst) as usize, distinct_chunks.len());
    }

    #[tokio::test]
    async fn test_corrupt_chunk_is_refetched_once() {
        let snapshot = sample_snapshot(4);
        let (store, source) = memory_store(&snapshot, 1, PartitionMethod::Range, 2);
        let filename = store.index().chunks[0].filename.clone();
        let good = source.fetch(&filename, false).await.unwrap();
        source.fetches.store(0, Ordering::SeqCst);

        source.corrupt(&filename);
        source.set_refreshed(&filename, good);

        assert!(store.get_entity("A").await.is_ok());
        assert_eq!(source.fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_persistently_corrupt_chunk_surfaces_corrupt() {
        let snapshot = sample_snapshot(4);
        let (store, source) = memory_store(&snapshot, 2, PartitionMethod::Range, 2);
        let chunk_of_a = store.resolve("A").unwrap();
        let filename = store.index().chunk(chunk_of_a).unwrap().filename.clone();
        source.corrupt(&filename);

        let err = store.get_entity("A").await.unwrap_err();
        assert!(
            matches!(err, KnowledgeError::Corrupt { ref scope, .. } if scope == &format!("chunk {}", chunk_of_a))
        );
        assert!(!store.cache().contains(chunk_of_a));

        // Other chunks are unaffected
        let other = store
            .index()
            .chunks
            .iter()
            .find(|c| c.chunk_id != chunk_of_a)
            .unwrap();
        let other_key = other.first_key.clone().unwrap();
        assert!(store.get_entity(&other_key).await.is_ok());
    }
}
