//! Start-up selection between the partitioned store and the streaming fallback.

use anyhow::Context;
use futures::stream::{self, StreamExt};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use super::index::PartitionIndex;
use super::lru::{CacheOutcome, CacheStats};
use super::record::HorseProfile;
use super::source::{ChunkSource, LocalSource, RemoteSource, TieredSource};
use super::store::KnowledgeStore;
use super::stream::StreamingFallbackReader;
use crate::config::KnowledgeConfig;
use crate::error::{with_deadline, KnowledgeError, KnowledgeResult};
use crate::retry::RetryConfig;

/// How a profile was obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provenance {
    /// Chunk already resident, or fallback memo hit
    CacheHit,
    /// Chunk loaded for this request
    ChunkLoad(u32),
    /// Full scan of the monolithic snapshot
    FallbackScan,
}

/// A found profile
#[derive(Debug, Clone)]
pub struct Found {
    pub profile: Arc<HorseProfile>,
    pub provenance: Provenance,
    /// Time spent in the streaming fallback, zero otherwise
    pub fallback_elapsed: Duration,
}

/// The knowledge backend chosen for this process
pub enum KnowledgeBase {
    Partitioned(KnowledgeStore),
    Streaming(StreamingFallbackReader),
}

impl KnowledgeBase {
    /// Open the configured knowledge source.
    ///
    /// A present but unreadable index is fatal. With no index anywhere the
    /// monolithic snapshot is served through the streaming fallback.
    pub async fn open(config: &KnowledgeConfig, retry: &RetryConfig) -> anyhow::Result<Self> {
        let remote = match &config.remote_base_url {
            Some(url) => Some(
                RemoteSource::new(url, config.fetch_timeout(), retry.clone())
                    .with_context(|| format!("Failed to configure remote source {}", url))?,
            ),
            None => None,
        };
        let source = Arc::new(TieredSource::new(LocalSource::new(config.data_path()), remote));

        match source.fetch(&config.index_file, false).await {
            Ok(bytes) => {
                let index = PartitionIndex::from_slice(&bytes)
                    .with_context(|| format!("Failed to load partition index {}", config.index_file))?;
                Ok(Self::Partitioned(KnowledgeStore::new(
                    index,
                    source,
                    config.cache_capacity,
                )))
            }
            Err(KnowledgeError::Unavailable { .. }) => {
                let snapshot_reachable =
                    source.local().exists(&config.snapshot_file) || source.has_remote();
                if !snapshot_reachable {
                    anyhow::bail!(
                        "No partition index or snapshot found in {}",
                        source.describe()
                    );
                }
                warn!(
                    "No partition index at {}; serving {} through the streaming fallback",
                    source.describe(),
                    config.snapshot_file
                );
                Ok(Self::Streaming(StreamingFallbackReader::new(
                    source,
                    config.snapshot_file.clone(),
                    config.stream_block_size,
                    config.fallback_cache_capacity,
                )))
            }
            Err(e) => Err(e).context("Failed to load partition index"),
        }
    }

    pub fn mode(&self) -> &'static str {
        match self {
            KnowledgeBase::Partitioned(_) => "partitioned",
            KnowledgeBase::Streaming(_) => "streaming",
        }
    }

    pub fn index(&self) -> Option<&PartitionIndex> {
        match self {
            KnowledgeBase::Partitioned(store) => Some(store.index()),
            KnowledgeBase::Streaming(_) => None,
        }
    }

    pub fn cache_stats(&self) -> Option<CacheStats> {
        match self {
            KnowledgeBase::Partitioned(store) => Some(store.cache_stats()),
            KnowledgeBase::Streaming(_) => None,
        }
    }

    pub async fn get_entity(&self, key: &str) -> KnowledgeResult<Found> {
        match self {
            KnowledgeBase::Partitioned(store) => store.get_entity(key).await.map(|lookup| Found {
                provenance: match lookup.outcome {
                    CacheOutcome::Hit => Provenance::CacheHit,
                    CacheOutcome::Loaded => Provenance::ChunkLoad(lookup.chunk_id),
                },
                profile: lookup.profile,
                fallback_elapsed: Duration::ZERO,
            }),
            KnowledgeBase::Streaming(reader) => {
                let started = Instant::now();
                let lookup = reader.get_entity(key).await?;
                Ok(Found {
                    profile: lookup.profile,
                    provenance: if lookup.memoized {
                        Provenance::CacheHit
                    } else {
                        Provenance::FallbackScan
                    },
                    fallback_elapsed: started.elapsed(),
                })
            }
        }
    }

    /// Look up many keys, each failure confined to the keys it affects.
    ///
    /// Partitioned: one grouped load per distinct chunk, each under its own
    /// deadline. Streaming: up to `worker_limit` scans at a time, each key
    /// under its own deadline.
    pub async fn lookup_many(
        &self,
        keys: &[String],
        worker_limit: usize,
        timeout: Duration,
    ) -> HashMap<String, KnowledgeResult<Found>> {
        match self {
            KnowledgeBase::Partitioned(store) => store
                .batch_get(keys, timeout)
                .await
                .into_iter()
                .map(|(key, result)| {
                    let found = result.map(|lookup| Found {
                        provenance: match lookup.outcome {
                            CacheOutcome::Hit => Provenance::CacheHit,
                            CacheOutcome::Loaded => Provenance::ChunkLoad(lookup.chunk_id),
                        },
                        profile: lookup.profile,
                        fallback_elapsed: Duration::ZERO,
                    });
                    (key, found)
                })
                .collect(),
            KnowledgeBase::Streaming(_) => {
                let unique: HashSet<&String> = keys.iter().collect();
                stream::iter(unique)
                    .map(|key| async move {
                        let context = format!("scanning snapshot for {}", key);
                        let result = with_deadline(&context, timeout, self.get_entity(key)).await;
                        (key.clone(), result)
                    })
                    .buffer_unordered(worker_limit.max(1))
                    .collect()
                    .await
            }
        }
    }

    pub fn shutdown(&self) {
        match self {
            KnowledgeBase::Partitioned(store) => {
                let stats = store.cache_stats();
                info!(
                    "Chunk cache: {} hits, {} misses ({:.1}% hit rate), {} loads, {} evictions, {}/{} resident",
                    stats.hits,
                    stats.misses,
                    stats.hit_rate() * 100.0,
                    stats.loads,
                    stats.evictions,
                    stats.resident,
                    stats.capacity
                );
            }
            KnowledgeBase::Streaming(reader) => {
                info!("Streaming fallback performed {} scans", reader.scans());
            }
        }
    }
}
