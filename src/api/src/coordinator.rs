//! Batch scoring coordinator: validation, fan-out, ranking and metadata.

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::config::{AppConfig, ScoringConfig};
use crate::error::{KnowledgeError, KnowledgeResult};
use crate::knowledge::base::{Found, KnowledgeBase, Provenance};
use crate::knowledge::record::TrackCondition;
use crate::retry::RetryConfig;
use crate::scoring::{ScoreEngine, ScoreVector};
use crate::types::{BatchMetadata, FailedHorse, ScoreResponse, ScoredHorse};

/// Longest accepted horse name, in characters
pub const MAX_KEY_CHARS: usize = 64;

/// Reject keys that cannot name a horse.
pub fn validate_key(key: &str) -> KnowledgeResult<()> {
    if key.trim().is_empty() {
        return Err(KnowledgeError::InvalidInput("empty horse name".to_string()));
    }
    if key.chars().count() > MAX_KEY_CHARS {
        return Err(KnowledgeError::InvalidInput(format!(
            "horse name longer than {} characters",
            MAX_KEY_CHARS
        )));
    }
    if key.chars().any(char::is_control) {
        return Err(KnowledgeError::InvalidInput(
            "horse name contains control characters".to_string(),
        ));
    }
    Ok(())
}

/// Owns the knowledge backend and the engine for the life of the process.
pub struct ScoringService {
    base: KnowledgeBase,
    engine: ScoreEngine,
    config: ScoringConfig,
}

impl ScoringService {
    /// Open the knowledge backend. Fails if a present index cannot be loaded.
    pub async fn start(config: &AppConfig) -> anyhow::Result<Self> {
        let retry = RetryConfig::from(&config.retry);
        let base = KnowledgeBase::open(&config.knowledge, &retry).await?;
        info!(
            "Scoring service started in {} mode (baseline {})",
            base.mode(),
            config.scoring.baseline_horse
        );
        Ok(Self::new(base, config.scoring.clone()))
    }

    pub fn new(base: KnowledgeBase, config: ScoringConfig) -> Self {
        Self {
            engine: ScoreEngine::new(config.baseline_horse.clone()),
            base,
            config,
        }
    }

    /// Log final cache statistics and release the backend.
    pub fn shutdown(self) {
        self.base.shutdown();
        info!("Scoring service stopped");
    }

    pub async fn score_one(
        &self,
        name: &str,
        condition: Option<TrackCondition>,
    ) -> KnowledgeResult<ScoreResponse> {
        self.score_batch(&[name.to_string()], condition).await
    }

    /// Score up to `max_batch_size` horses.
    ///
    /// Only an empty or oversized batch fails the call; every per-horse
    /// failure is listed in `not_found` with its reason.
    pub async fn score_batch(
        &self,
        names: &[String],
        condition: Option<TrackCondition>,
    ) -> KnowledgeResult<ScoreResponse> {
        if names.is_empty() {
            return Err(KnowledgeError::InvalidInput("no horses requested".to_string()));
        }
        if names.len() > self.config.max_batch_size {
            return Err(KnowledgeError::InvalidInput(format!(
                "batch of {} exceeds the limit of {}",
                names.len(),
                self.config.max_batch_size
            )));
        }

        let started = Instant::now();

        let lookup_keys: Vec<String> = names
            .iter()
            .filter(|name| validate_key(name).is_ok() && !self.engine.is_baseline(name))
            .collect::<HashSet<_>>()
            .into_iter()
            .cloned()
            .collect();
        let found = if lookup_keys.is_empty() {
            HashMap::new()
        } else {
            self.base
                .lookup_many(
                    &lookup_keys,
                    self.config.worker_limit,
                    self.config.request_timeout(),
                )
                .await
        };

        let mut metadata = lookup_metadata(&found);
        metadata.requested = names.len();
        metadata.condition = condition;

        let mut scored = Vec::new();
        let mut not_found = Vec::new();

        for name in names {
            let outcome = if let Err(e) = validate_key(name) {
                Err(e)
            } else if self.engine.is_baseline(name) {
                metadata.baseline_hits += 1;
                Ok((ScoreVector::reference(condition), 0))
            } else {
                match found.get(name.as_str()) {
                    Some(Ok(hit)) => self
                        .score_found(name, hit, condition)
                        .map(|vector| (vector, hit.profile.races.len())),
                    Some(Err(e)) => Err(e.clone()),
                    None => Err(KnowledgeError::not_found(name.as_str())),
                }
            };

            match outcome {
                Ok((vector, races)) => scored.push(scored_horse(name, vector, races)),
                Err(e) => {
                    debug!("Could not score {}: {}", name, e);
                    not_found.push(FailedHorse {
                        name: name.clone(),
                        reason: e.reason(),
                        message: e.to_string(),
                    });
                }
            }
        }

        rank(&mut scored);

        let elapsed = started.elapsed();
        metadata.scored = scored.len();
        metadata.not_found = not_found.len();
        metadata.total_ms = millis(elapsed);
        metadata.avg_ms_per_entity = metadata.total_ms / names.len() as f64;

        info!(
            "Scored {}/{} horses in {:.1}ms ({} cache hits, {} chunk loads, {} fallback scans)",
            metadata.scored,
            metadata.requested,
            metadata.total_ms,
            metadata.cache_hits,
            metadata.chunk_loads,
            metadata.fallback_lookups
        );

        Ok(ScoreResponse {
            scored,
            not_found,
            metadata,
        })
    }

    fn score_found(
        &self,
        name: &str,
        hit: &Found,
        condition: Option<TrackCondition>,
    ) -> KnowledgeResult<ScoreVector> {
        match condition {
            Some(condition) => self.engine.score_under(name, &hit.profile, condition),
            None => self.engine.score(name, &hit.profile),
        }
    }
}

/// Counters derived from one lookup per distinct key.
fn lookup_metadata(found: &HashMap<String, KnowledgeResult<Found>>) -> BatchMetadata {
    let mut metadata = BatchMetadata::default();
    let mut loaded_chunks = HashSet::new();
    let mut fallback = Duration::ZERO;

    for hit in found.values().flatten() {
        match hit.provenance {
            Provenance::CacheHit => metadata.cache_hits += 1,
            Provenance::ChunkLoad(chunk_id) => {
                loaded_chunks.insert(chunk_id);
            }
            Provenance::FallbackScan => metadata.fallback_lookups += 1,
        }
        fallback += hit.fallback_elapsed;
    }

    metadata.chunk_loads = loaded_chunks.len();
    metadata.fallback_ms = millis(fallback);
    metadata
}

fn scored_horse(name: &str, vector: ScoreVector, races: usize) -> ScoredHorse {
    ScoredHorse {
        rank: 0,
        name: name.to_string(),
        aggregate: vector.aggregate,
        grade: vector.grade,
        defaulted: vector.defaulted_count(),
        reference: vector.reference,
        metrics: vector.metrics,
        races,
    }
}

/// Aggregate descending, ties by name; ranks are 1-based.
fn rank(scored: &mut [ScoredHorse]) {
    scored.sort_by(|a, b| {
        b.aggregate
            .total_cmp(&a.aggregate)
            .then_with(|| a.name.cmp(&b.name))
    });
    for (i, horse) in scored.iter_mut().enumerate() {
        horse.rank = i + 1;
    }
}

fn millis(duration: Duration) -> f64 {
    duration.as_secs_f64() * 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FailureReason;
    use crate::knowledge::builder::SnapshotBuilder;
    use crate::knowledge::index::PartitionMethod;
    use crate::knowledge::store::tests::{memory_store, sample_snapshot, MemorySource};
    use crate::knowledge::store::KnowledgeStore;
    use crate::scoring::tables::REFERENCE_SCORE;
    use std::sync::Arc;

    const BASELINE: &str = "ディープインパクト";

    fn service(extra: usize) -> ScoringService {
        let (store, _) = memory_store(&sample_snapshot(extra), 3, PartitionMethod::Range, 2);
        ScoringService::new(KnowledgeBase::Partitioned(store), ScoringConfig::default())
    }

    fn names(keys: &[&str]) -> Vec<String> {
        keys.iter().map(|k| k.to_string()).collect()
    }

    fn assert_partitioned(response: &ScoreResponse, requested: usize) {
        assert_eq!(response.scored.len() + response.not_found.len(), requested);
        assert_eq!(response.metadata.requested, requested);
        let scored: HashSet<&str> = response.scored.iter().map(|s| s.name.as_str()).collect();
        assert!(response.not_found.iter().all(|f| !scored.contains(f.name.as_str())));
    }

    #[tokio::test]
    async fn test_scenario_a_b_z() {
        let service = service(6);

        let a = service.score_one("A", None).await.unwrap();
        assert_eq!(a.scored.len(), 1);
        assert_eq!(a.scored[0].races, 5);
        assert!(a.not_found.is_empty());

        let b = service.score_one("B", None).await.unwrap();
        assert!(b.scored.is_empty());
        assert_eq!(b.not_found[0].reason, FailureReason::NotFound);

        let batch = service.score_batch(&names(&["A", "Z"]), None).await.unwrap();
        assert_partitioned(&batch, 2);
        assert_eq!(batch.scored[0].name, "A");
        assert_eq!(batch.scored[0].rank, 1);
        assert_eq!(batch.not_found.len(), 1);
        assert_eq!(batch.not_found[0].name, "Z");
    }

    #[tokio::test]
    async fn test_mixed_batch_partitions_every_key() {
        let service = service(10);
        let too_long = "馬".repeat(MAX_KEY_CHARS + 1);
        let keys = names(&["A", "", "Z", "H001", &too_long, BASELINE, "A", "bad\nname"]);

        let response = service.score_batch(&keys, None).await.unwrap();
        assert_partitioned(&response, keys.len());
        assert_eq!(response.scored.len(), 4);

        let invalid: Vec<_> = response
            .not_found
            .iter()
            .filter(|f| f.reason == FailureReason::InvalidInput)
            .collect();
        assert_eq!(invalid.len(), 3);
        assert_eq!(response.metadata.baseline_hits, 1);
    }

    #[tokio::test]
    async fn test_ranking_is_descending_and_baseline_first() {
        let service = service(10);
        let keys = names(&["H003", "A", BASELINE, "H007", "H001"]);
        let response = service.score_batch(&keys, None).await.unwrap();

        assert_eq!(response.scored[0].name, BASELINE);
        assert_eq!(response.scored[0].aggregate, REFERENCE_SCORE);
        for (i, pair) in response.scored.windows(2).enumerate() {
            assert!(pair[0].aggregate >= pair[1].aggregate);
            assert_eq!(pair[0].rank, i + 1);
        }
    }

    #[tokio::test]
    async fn test_oversized_batch_is_rejected() {
        let service = service(3);
        let keys: Vec<String> = (0..21).map(|i| format!("H{:03}", i)).collect();
        let err = service.score_batch(&keys, None).await.unwrap_err();
        assert_eq!(err.reason(), FailureReason::InvalidInput);
        assert!(service.score_batch(&[], None).await.is_err());
    }

    #[tokio::test]
    async fn test_metadata_reports_cache_effectiveness() {
        let service = service(10);
        let keys = names(&["A", "H000", "H001", "H009"]);

        let cold = service.score_batch(&keys, None).await.unwrap();
        assert!(cold.metadata.chunk_loads >= 1);
        assert_eq!(cold.metadata.fallback_lookups, 0);
        assert_eq!(cold.metadata.fallback_ms, 0.0);

        let warm = service.score_batch(&names(&["A"]), None).await.unwrap();
        assert_eq!(warm.metadata.cache_hits, 1);
        assert_eq!(warm.metadata.chunk_loads, 0);
    }

    #[tokio::test]
    async fn test_condition_is_applied_and_reported() {
        let service = service(2);
        let standard = service.score_one("A", None).await.unwrap();
        let heavy = service
            .score_one("A", Some(TrackCondition::Heavy))
            .await
            .unwrap();
        assert_eq!(heavy.metadata.condition, Some(TrackCondition::Heavy));
        assert_ne!(standard.scored[0].aggregate, heavy.scored[0].aggregate);
    }

    #[tokio::test]
    async fn test_slow_chunk_fails_only_its_own_keys() {
        let snapshot = sample_snapshot(10);
        let partitioned = SnapshotBuilder::partition(&snapshot, 3, PartitionMethod::Range).unwrap();
        let source = Arc::new(MemorySource::new(partitioned.files().unwrap()));
        let store = KnowledgeStore::new(partitioned.index, source.clone(), 3);
        let config = ScoringConfig {
            request_timeout_ms: 50,
            ..Default::default()
        };
        let service = ScoringService::new(KnowledgeBase::Partitioned(store), config);

        // Warm the chunk holding A, then make every further fetch slow
        service.score_one("A", None).await.unwrap();
        source.set_delay(Duration::from_millis(300));

        let keys = names(&["A", "H009", "0gap", BASELINE]);
        let response = service.score_batch(&keys, None).await.unwrap();
        assert_partitioned(&response, keys.len());

        let scored: HashSet<&str> = response.scored.iter().map(|s| s.name.as_str()).collect();
        assert!(scored.contains("A"));
        assert!(scored.contains(BASELINE));

        let reason = |name: &str| {
            response
                .not_found
                .iter()
                .find(|f| f.name == name)
                .map(|f| f.reason)
        };
        assert_eq!(reason("H009"), Some(FailureReason::Transient));
        assert_eq!(reason("0gap"), Some(FailureReason::NotFound));
        assert_eq!(response.metadata.cache_hits, 1);
    }
}
