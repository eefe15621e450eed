//! Partition index: maps horse names to chunk ids for one snapshot version.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use xxhash_rust::xxh3::xxh3_64;

use crate::error::{KnowledgeError, KnowledgeResult};

/// How horses are assigned to chunks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PartitionMethod {
    /// Contiguous, bytewise-sorted key ranges
    Range,
    /// `xxh3(key) mod total_chunks`
    Hash,
}

impl PartitionMethod {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "range" => Some(PartitionMethod::Range),
            "hash" => Some(PartitionMethod::Hash),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            PartitionMethod::Range => "range",
            PartitionMethod::Hash => "hash",
        }
    }
}

/// Per-chunk metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkMeta {
    pub chunk_id: u32,
    pub filename: String,
    pub horse_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_key: Option<String>,
}

impl ChunkMeta {
    pub fn filename_for(chunk_id: u32) -> String {
        format!("chunk_{:03}.json", chunk_id)
    }
}

/// Hash bucket for a key. Stable across processes and platforms.
pub fn hash_bucket(key: &str, total_chunks: u32) -> u32 {
    (xxh3_64(key.as_bytes()) % total_chunks as u64) as u32
}

/// Partition index document, loaded read-only at start-up
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartitionIndex {
    pub version: String,
    pub built_at: DateTime<Utc>,
    pub method: PartitionMethod,
    pub total_chunks: u32,
    pub total_horses: usize,
    /// Sorted by `first_key` for range partitioning, by id for hash
    pub chunks: Vec<ChunkMeta>,
}

impl PartitionIndex {
    /// Parse and validate an index document.
    pub fn from_slice(bytes: &[u8]) -> KnowledgeResult<Self> {
        let index: PartitionIndex = serde_json::from_slice(bytes)
            .map_err(|e| KnowledgeError::corrupt("partition index", e))?;
        index.validate()?;
        Ok(index)
    }

    /// Check structural invariants so that `resolve` is total and unambiguous.
    pub fn validate(&self) -> KnowledgeResult<()> {
        let invalid = |reason: String| Err(KnowledgeError::corrupt("partition index", reason));

        if self.total_chunks == 0 {
            return invalid("index declares zero chunks".to_string());
        }
        if self.chunks.len() != self.total_chunks as usize {
            return invalid(format!(
                "index declares {} chunks but lists {}",
                self.total_chunks,
                self.chunks.len()
            ));
        }

        // Ids are dense and listed in order, so `chunk` can index directly
        for (position, chunk) in self.chunks.iter().enumerate() {
            if chunk.chunk_id as usize != position {
                return invalid(format!(
                    "chunk id {} listed at position {}",
                    chunk.chunk_id, position
                ));
            }
        }

        if self.method == PartitionMethod::Range {
            let mut previous_last: Option<&str> = None;
            for chunk in &self.chunks {
                let (Some(first), Some(last)) = (&chunk.first_key, &chunk.last_key) else {
                    return invalid(format!("range chunk {} lacks boundaries", chunk.chunk_id));
                };
                if first > last {
                    return invalid(format!("chunk {} has inverted boundaries", chunk.chunk_id));
                }
                if let Some(prev) = previous_last {
                    if first.as_str() <= prev {
                        return invalid(format!(
                            "chunk {} overlaps or is out of order",
                            chunk.chunk_id
                        ));
                    }
                }
                previous_last = Some(last);
            }
        }

        Ok(())
    }

    /// Resolve a key to its chunk id.
    ///
    /// Range: binary search over sorted boundaries; keys between two chunks
    /// resolve to `None`. Hash: always `Some`.
    pub fn resolve(&self, key: &str) -> Option<u32> {
        match self.method {
            PartitionMethod::Hash => Some(hash_bucket(key, self.total_chunks)),
            PartitionMethod::Range => {
                let idx = self
                    .chunks
                    .partition_point(|c| c.first_key.as_deref().is_some_and(|first| first <= key));
                let candidate = self.chunks.get(idx.checked_sub(1)?)?;
                let within = candidate.last_key.as_deref().is_some_and(|last| key <= last);
                within.then_some(candidate.chunk_id)
            }
        }
    }

    pub fn chunk(&self, chunk_id: u32) -> Option<&ChunkMeta> {
        self.chunks
            .get(chunk_id as usize)
            .filter(|c| c.chunk_id == chunk_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn range_index() -> PartitionIndex {
        let chunk = |id: u32, first: &str, last: &str| ChunkMeta {
            chunk_id: id,
            filename: ChunkMeta::filename_for(id),
            horse_count: 2,
            first_key: Some(first.to_string()),
            last_key: Some(last.to_string()),
        };
        PartitionIndex {
            version: "test".to_string(),
            built_at: Utc::now(),
            method: PartitionMethod::Range,
            total_chunks: 3,
            total_horses: 6,
            chunks: vec![chunk(0, "A", "C"), chunk(1, "E", "H"), chunk(2, "K", "M")],
        }
    }

    #[test]
    fn test_range_resolve_boundaries() {
        let index = range_index();
        assert_eq!(index.resolve("A"), Some(0));
        assert_eq!(index.resolve("B"), Some(0));
        assert_eq!(index.resolve("C"), Some(0));
        assert_eq!(index.resolve("E"), Some(1));
        assert_eq!(index.resolve("Gz"), Some(1));
        assert_eq!(index.resolve("M"), Some(2));
    }

    #[test]
    fn test_range_resolve_outside_any_chunk() {
        let index = range_index();
        assert_eq!(index.resolve("0"), None); // before the first chunk
        assert_eq!(index.resolve("D"), None); // gap between chunks
        assert_eq!(index.resolve("Z"), None); // after the last chunk
    }

    #[test]
    fn test_hash_resolve_is_deterministic() {
        let mut index = range_index();
        index.method = PartitionMethod::Hash;

        for key in ["ドウデュース", "イクイノックス", "A", ""] {
            let first = index.resolve(key).unwrap();
            assert!(first < index.total_chunks);
            for _ in 0..10 {
                assert_eq!(index.resolve(key), Some(first));
            }
            assert_eq!(first, hash_bucket(key, 3));
        }
    }

    #[test]
    fn test_resolve_survives_serialization() {
        let index = range_index();
        let bytes = serde_json::to_vec(&index).unwrap();
        let reloaded = PartitionIndex::from_slice(&bytes).unwrap();
        for key in ["A", "D", "F", "L", "Z"] {
            assert_eq!(index.resolve(key), reloaded.resolve(key));
        }
    }

    #[test]
    fn test_validate_rejects_overlap() {
        let mut index = range_index();
        index.chunks[1].first_key = Some("B".to_string());
        assert!(matches!(index.validate(), Err(KnowledgeError::Corrupt { .. })));
    }

    #[test]
    fn test_validate_rejects_duplicate_ids() {
        let mut index = range_index();
        index.chunks[2].chunk_id = 0;
        assert!(index.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_out_of_order_ids() {
        let mut index = range_index();
        index.chunks[0].chunk_id = 1;
        index.chunks[1].chunk_id = 0;
        assert!(index.validate().is_err());
    }

    #[test]
    fn test_chunk_lookup_by_id() {
        let index = range_index();
        for id in 0..3 {
            assert_eq!(index.chunk(id).unwrap().chunk_id, id);
        }
        assert_eq!(index.chunk(1).unwrap().first_key.as_deref(), Some("E"));
        assert!(index.chunk(3).is_none());
    }

    #[test]
    fn test_from_slice_rejects_garbage() {
        assert!(PartitionIndex::from_slice(b"{not json").is_err());
    }
}
