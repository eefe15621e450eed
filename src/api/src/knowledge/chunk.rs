//! Immutable chunk: one partition of a snapshot.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use super::index::ChunkMeta;
use super::record::HorseProfile;
use crate::error::{KnowledgeError, KnowledgeResult};

/// Serialized chunk document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkDocument {
    pub metadata: ChunkMeta,
    pub horses: BTreeMap<String, HorseProfile>,
}

/// Parsed chunk held in the cache
#[derive(Debug)]
pub struct Chunk {
    pub meta: ChunkMeta,
    horses: HashMap<String, Arc<HorseProfile>>,
}

impl Chunk {
    /// Parse raw chunk content, checking it is the chunk that was asked for.
    pub fn parse(expected_id: u32, bytes: &[u8]) -> KnowledgeResult<Self> {
        let scope = format!("chunk {}", expected_id);
        let doc: ChunkDocument =
            serde_json::from_slice(bytes).map_err(|e| KnowledgeError::corrupt(&scope, e))?;

        if doc.metadata.chunk_id != expected_id {
            return Err(KnowledgeError::corrupt(
                scope,
                format!("content belongs to chunk {}", doc.metadata.chunk_id),
            ));
        }
        if doc.metadata.horse_count != doc.horses.len() {
            return Err(KnowledgeError::corrupt(
                scope,
                format!(
                    "metadata lists {} horses, found {}",
                    doc.metadata.horse_count,
                    doc.horses.len()
                ),
            ));
        }

        Ok(Self::from_document(doc))
    }

    pub fn from_document(doc: ChunkDocument) -> Self {
        let horses = doc
            .horses
            .into_iter()
            .map(|(name, profile)| (name, Arc::new(profile)))
            .collect();
        Self {
            meta: doc.metadata,
            horses,
        }
    }

    pub fn id(&self) -> u32 {
        self.meta.chunk_id
    }

    pub fn get(&self, name: &str) -> Option<Arc<HorseProfile>> {
        self.horses.get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.horses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.horses.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.horses.keys().map(String::as_str)
    }
}
