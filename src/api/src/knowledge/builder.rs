//! Producer side: split a full snapshot into chunks plus a partition index.

use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use tracing::info;

use super::chunk::ChunkDocument;
use super::index::{hash_bucket, ChunkMeta, PartitionIndex, PartitionMethod};
use super::record::{HorseProfile, Snapshot};
use crate::error::{KnowledgeError, KnowledgeResult};

/// Index plus chunk documents ready to be published together
#[derive(Debug, Clone)]
pub struct PartitionedSnapshot {
    pub index: PartitionIndex,
    pub chunks: Vec<ChunkDocument>,
}

impl PartitionedSnapshot {
    /// Serialized artifacts keyed by file name.
    pub fn files(&self) -> KnowledgeResult<HashMap<String, Vec<u8>>> {
        let mut files = HashMap::with_capacity(self.chunks.len() + 1);
        for chunk in &self.chunks {
            let bytes = serde_json::to_vec(chunk)
                .map_err(|e| KnowledgeError::corrupt(format!("chunk {}", chunk.metadata.chunk_id), e))?;
            files.insert(chunk.metadata.filename.clone(), bytes);
        }
        Ok(files)
    }

    /// Write `index_file` and every chunk into `dir`.
    pub fn write_to_dir(&self, dir: &Path, index_file: &str) -> anyhow::Result<()> {
        std::fs::create_dir_all(dir)?;

        for (name, bytes) in self.files()? {
            std::fs::write(dir.join(&name), bytes)?;
        }
        // Index last, so a reader never sees an index pointing at missing chunks
        let index = serde_json::to_vec_pretty(&self.index)?;
        std::fs::write(dir.join(index_file), index)?;

        info!(
            "Wrote {} {} chunks ({} horses) to {}",
            self.index.total_chunks,
            self.index.method.name(),
            self.index.total_horses,
            dir.display()
        );
        Ok(())
    }

    /// Merge every chunk back into one horse map.
    pub fn reassemble(&self) -> BTreeMap<String, HorseProfile> {
        self.chunks
            .iter()
            .flat_map(|chunk| chunk.horses.iter())
            .map(|(name, profile)| (name.clone(), profile.clone()))
            .collect()
    }
}

/// Builds partitioned snapshots
pub struct SnapshotBuilder;

impl SnapshotBuilder {
    /// Split `snapshot` into `chunk_count` chunks.
    ///
    /// Range partitioning sorts names bytewise and cuts near-equal contiguous
    /// slices (never more chunks than horses). Hash partitioning always emits
    /// exactly `chunk_count` chunks, some possibly empty.
    pub fn partition(
        snapshot: &Snapshot,
        chunk_count: u32,
        method: PartitionMethod,
    ) -> KnowledgeResult<PartitionedSnapshot> {
        if chunk_count == 0 {
            return Err(KnowledgeError::InvalidInput("chunk count must be positive".to_string()));
        }
        if snapshot.horses.is_empty() {
            return Err(KnowledgeError::InvalidInput("snapshot has no horses".to_string()));
        }

        let groups = match method {
            PartitionMethod::Range => Self::range_groups(snapshot, chunk_count),
            PartitionMethod::Hash => Self::hash_groups(snapshot, chunk_count),
        };

        let chunks: Vec<ChunkDocument> = groups
            .into_iter()
            .enumerate()
            .map(|(i, horses)| {
                let chunk_id = i as u32;
                let (first_key, last_key) = match method {
                    PartitionMethod::Range => (
                        horses.keys().next().cloned(),
                        horses.keys().next_back().cloned(),
                    ),
                    PartitionMethod::Hash => (None, None),
                };
                ChunkDocument {
                    metadata: ChunkMeta {
                        chunk_id,
                        filename: ChunkMeta::filename_for(chunk_id),
                        horse_count: horses.len(),
                        first_key,
                        last_key,
                    },
                    horses,
                }
            })
            .collect();

        let index = PartitionIndex {
            version: snapshot.metadata.version.clone(),
            built_at: Utc::now(),
            method,
            total_chunks: chunks.len() as u32,
            total_horses: snapshot.horses.len(),
            chunks: chunks.iter().map(|c| c.metadata.clone()).collect(),
        };
        index.validate()?;

        Ok(PartitionedSnapshot { index, chunks })
    }

    fn range_groups(snapshot: &Snapshot, chunk_count: u32) -> Vec<BTreeMap<String, HorseProfile>> {
        let total = snapshot.horses.len();
        let chunks = (chunk_count as usize).min(total);
        let base = total / chunks;
        let remainder = total % chunks;

        // BTreeMap iteration is already bytewise-sorted
        let mut horses = snapshot.horses.iter();
        (0..chunks)
            .map(|i| {
                let size = base + usize::from(i < remainder);
                horses
                    .by_ref()
                    .take(size)
                    .map(|(name, profile)| (name.clone(), profile.clone()))
                    .collect()
            })
            .collect()
    }

    fn hash_groups(snapshot: &Snapshot, chunk_count: u32) -> Vec<BTreeMap<String, HorseProfile>> {
        let mut groups = vec![BTreeMap::new(); chunk_count as usize];
        for (name, profile) in &snapshot.horses {
            let bucket = hash_bucket(name, chunk_count) as usize;
            groups[bucket].insert(name.clone(), profile.clone());
        }
        groups
    }
}
