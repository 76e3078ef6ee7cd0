//! Vector index collaborator boundary.
//!
//! The engine stores embedded contract chunks here and retrieves ranked
//! neighbours by cosine distance. [`MemoryVectorIndex`] is a brute-force
//! implementation for tests and small single-process corpora.

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{CoreError, CoreResult};

/// One embedded slice of a contract. `chunk_id` is globally unique; chunks
/// of a contract order by `(section_name, chunk_index)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentChunk {
    pub chunk_id: String,
    pub contract_id: String,
    pub section_name: String,
    pub chunk_index: usize,
    pub text: String,
    pub embedding: Vec<f32>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// Ranked search hit. `distance` is cosine distance in [0, 2].
#[derive(Debug, Clone)]
pub struct VectorHit {
    pub chunk_id: String,
    pub contract_id: String,
    pub text: String,
    pub metadata: HashMap<String, String>,
    pub distance: f32,
}

impl VectorHit {
    /// Relevance in [0, 1]: `1 - distance`, clamped.
    pub fn relevance_score(&self) -> f32 {
        (1.0 - self.distance).clamp(0.0, 1.0)
    }
}

#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Insert or replace chunks by `chunk_id`. Re-upserting an id leaves
    /// exactly one chunk.
    async fn upsert(&self, chunks: Vec<DocumentChunk>) -> CoreResult<()>;

    /// Nearest chunks to `query_embedding`, optionally restricted to one
    /// contract.
    async fn search(
        &self,
        query_embedding: &[f32],
        n: usize,
        contract_id: Option<&str>,
    ) -> CoreResult<Vec<VectorHit>>;

    /// Remove all chunks of a contract, returning how many were deleted.
    async fn delete_contract(&self, contract_id: &str) -> CoreResult<usize>;
}

/// Brute-force in-memory index.
#[derive(Default)]
pub struct MemoryVectorIndex {
    chunks: DashMap<String, DocumentChunk>,
}

impl MemoryVectorIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}

fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 1.0;
    }
    1.0 - dot / (norm_a * norm_b)
}

#[async_trait]
impl VectorIndex for MemoryVectorIndex {
    async fn upsert(&self, chunks: Vec<DocumentChunk>) -> CoreResult<()> {
        for chunk in chunks {
            if chunk.chunk_id.is_empty() {
                return Err(CoreError::invalid_input("chunk_id must not be empty"));
            }
            self.chunks.insert(chunk.chunk_id.clone(), chunk);
        }
        Ok(())
    }

    async fn search(
        &self,
        query_embedding: &[f32],
        n: usize,
        contract_id: Option<&str>,
    ) -> CoreResult<Vec<VectorHit>> {
        let mut hits: Vec<VectorHit> = self
            .chunks
            .iter()
            .filter(|entry| contract_id.map_or(true, |id| entry.contract_id == id))
            .map(|entry| {
                let chunk = entry.value();
                let mut metadata = chunk.metadata.clone();
                metadata.insert("contract_id".to_string(), chunk.contract_id.clone());
                metadata.insert("section_name".to_string(), chunk.section_name.clone());
                metadata.insert("chunk_index".to_string(), chunk.chunk_index.to_string());
                VectorHit {
                    chunk_id: chunk.chunk_id.clone(),
                    contract_id: chunk.contract_id.clone(),
                    text: chunk.text.clone(),
                    metadata,
                    distance: cosine_distance(query_embedding, &chunk.embedding),
                }
            })
            .collect();

        hits.sort_by(|a, b| {
            a.distance
                .partial_cmp(&b.distance)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.chunk_id.cmp(&b.chunk_id))
        });
        hits.truncate(n);
        Ok(hits)
    }

    async fn delete_contract(&self, contract_id: &str) -> CoreResult<usize> {
        let ids: Vec<String> = self
            .chunks
            .iter()
            .filter(|entry| entry.contract_id == contract_id)
            .map(|entry| entry.chunk_id.clone())
            .collect();
        for id in &ids {
            self.chunks.remove(id);
        }
        Ok(ids.len())
    }
}
