pub mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::chunk::Chunk;

pub use memory::InMemoryChunkStore;

/// Errors surfaced by a chunk store backend.
///
/// Strategy-local store failures are logged and swallowed by the pipeline;
/// only operations with no fallback path propagate these to callers.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("malformed query: {0}")]
    MalformedQuery(String),
    #[error("embedding dimension mismatch: query {query} vs index {index}")]
    DimensionMismatch { query: usize, index: usize },
}

/// Distance metric used by the backing vector index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SimilarityMetric {
    #[default]
    Cosine,
    L2,
    InnerProduct,
}

impl std::str::FromStr for SimilarityMetric {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "cosine" => Ok(Self::Cosine),
            "l2" | "euclidean" => Ok(Self::L2),
            "inner_product" | "dot" => Ok(Self::InnerProduct),
            other => Err(format!("unknown similarity metric '{other}'")),
        }
    }
}

/// A chunk returned from the store together with its raw backend score.
///
/// Vector rows carry a similarity already normalized to [0,1]; lexical rows
/// carry an unbounded rank value that callers normalize before fusion.
#[derive(Debug, Clone)]
pub struct ScoredRow {
    pub chunk: Chunk,
    pub raw_score: f32,
}

/// Read-only query surface over the external chunk store.
///
/// The store is an external collaborator: this core never writes chunks, so
/// no locking is required around it.
#[async_trait]
pub trait ChunkStore: Send + Sync {
    /// Nearest-neighbor search over chunk embeddings, best first.
    async fn vector_search(
        &self,
        embedding: &[f32],
        top_k: usize,
        metric: SimilarityMetric,
    ) -> Result<Vec<ScoredRow>, StoreError>;

    /// Keyword/full-text matching independent of embeddings.
    async fn lexical_search(&self, text: &str, top_k: usize) -> Result<Vec<ScoredRow>, StoreError>;

    /// Weighted combination of vector and lexical scoring done store-side.
    async fn hybrid_search(
        &self,
        text: &str,
        embedding: &[f32],
        top_k: usize,
    ) -> Result<Vec<ScoredRow>, StoreError>;

    /// Fetch chunks by id; missing ids are skipped, not errors.
    async fn fetch_by_ids(&self, ids: &[String]) -> Result<Vec<Chunk>, StoreError>;

    /// Fetch sibling chunks sharing a hierarchy path within a source,
    /// excluding the seed chunk itself.
    async fn fetch_by_section(
        &self,
        source_id: &str,
        section_path: &str,
        exclude_id: &str,
    ) -> Result<Vec<Chunk>, StoreError>;
}
