use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use crate::chunk::Chunk;
use crate::utils::text::tokenize;

use super::{ChunkStore, ScoredRow, SimilarityMetric, StoreError};

/// Store-side fusion weights applied by `hybrid_search`.
const HYBRID_VECTOR_WEIGHT: f32 = 0.7;
const HYBRID_LEXICAL_WEIGHT: f32 = 0.3;

/// Reference chunk store backed by an in-process map.
///
/// Exhaustive-scan searches; intended for tests and small embedded corpora.
/// Production deployments implement `ChunkStore` over a real vector database.
#[derive(Default)]
pub struct InMemoryChunkStore {
    chunks: RwLock<HashMap<String, Chunk>>,
}

impl InMemoryChunkStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, chunk: Chunk) {
        self.chunks.write().await.insert(chunk.id.clone(), chunk);
    }

    pub async fn insert_many(&self, chunks: Vec<Chunk>) {
        let mut guard = self.chunks.write().await;
        for chunk in chunks {
            guard.insert(chunk.id.clone(), chunk);
        }
    }

    pub async fn len(&self) -> usize {
        self.chunks.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.chunks.read().await.is_empty()
    }

    fn lexical_score(query_terms: &[String], content: &str) -> f32 {
        if query_terms.is_empty() {
            return 0.0;
        }
        let haystack = content.to_ascii_lowercase();
        let mut matches = 0usize;
        for term in query_terms {
            if haystack.contains(term.as_str()) {
                matches = matches.saturating_add(1);
            }
        }
        matches as f32
    }
}

fn similarity(metric: SimilarityMetric, query: &[f32], candidate: &[f32]) -> f32 {
    if query.is_empty() || candidate.is_empty() || query.len() != candidate.len() {
        return 0.0;
    }
    let dot: f32 = query.iter().zip(candidate).map(|(a, b)| a * b).sum();
    match metric {
        SimilarityMetric::Cosine => {
            let norm_q: f32 = query.iter().map(|v| v * v).sum::<f32>().sqrt();
            let norm_c: f32 = candidate.iter().map(|v| v * v).sum::<f32>().sqrt();
            if norm_q == 0.0 || norm_c == 0.0 {
                return 0.0;
            }
            (dot / (norm_q * norm_c)).clamp(0.0, 1.0)
        }
        SimilarityMetric::L2 => {
            let distance: f32 = query
                .iter()
                .zip(candidate)
                .map(|(a, b)| (a - b) * (a - b))
                .sum::<f32>()
                .sqrt();
            (1.0 / (1.0 + distance)).clamp(0.0, 1.0)
        }
        SimilarityMetric::InnerProduct => dot.clamp(0.0, 1.0),
    }
}

fn top_k_rows(mut rows: Vec<ScoredRow>, top_k: usize) -> Vec<ScoredRow> {
    rows.sort_by(|a, b| {
        b.raw_score
            .partial_cmp(&a.raw_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.chunk.id.cmp(&b.chunk.id))
    });
    rows.truncate(top_k);
    rows
}

#[async_trait]
impl ChunkStore for InMemoryChunkStore {
    async fn vector_search(
        &self,
        embedding: &[f32],
        top_k: usize,
        metric: SimilarityMetric,
    ) -> Result<Vec<ScoredRow>, StoreError> {
        if embedding.is_empty() {
            return Err(StoreError::MalformedQuery(
                "empty query embedding".to_string(),
            ));
        }
        let guard = self.chunks.read().await;
        let mut rows = Vec::new();
        for chunk in guard.values() {
            if chunk.embedding.is_empty() {
                continue;
            }
            if chunk.embedding.len() != embedding.len() {
                return Err(StoreError::DimensionMismatch {
                    query: embedding.len(),
                    index: chunk.embedding.len(),
                });
            }
            let score = similarity(metric, embedding, &chunk.embedding);
            rows.push(ScoredRow {
                chunk: chunk.clone(),
                raw_score: score,
            });
        }
        debug!(candidates = rows.len(), top_k, "in-memory vector search");
        Ok(top_k_rows(rows, top_k))
    }

    async fn lexical_search(&self, text: &str, top_k: usize) -> Result<Vec<ScoredRow>, StoreError> {
        let terms = tokenize(text);
        if terms.is_empty() {
            return Ok(Vec::new());
        }
        let guard = self.chunks.read().await;
        let mut rows = Vec::new();
        for chunk in guard.values() {
            let score = Self::lexical_score(&terms, &chunk.content);
            if score > 0.0 {
                rows.push(ScoredRow {
                    chunk: chunk.clone(),
                    raw_score: score,
                });
            }
        }
        Ok(top_k_rows(rows, top_k))
    }

    async fn hybrid_search(
        &self,
        text: &str,
        embedding: &[f32],
        top_k: usize,
    ) -> Result<Vec<ScoredRow>, StoreError> {
        let vector_rows = self
            .vector_search(embedding, top_k, SimilarityMetric::Cosine)
            .await?;
        let lexical_rows = self.lexical_search(text, top_k).await?;

        let max_lexical = lexical_rows
            .iter()
            .map(|row| row.raw_score)
            .fold(0.0f32, f32::max)
            .max(1.0);

        let mut combined: HashMap<String, ScoredRow> = HashMap::new();
        for row in vector_rows {
            combined.insert(
                row.chunk.id.clone(),
                ScoredRow {
                    raw_score: row.raw_score * HYBRID_VECTOR_WEIGHT,
                    chunk: row.chunk,
                },
            );
        }
        for row in lexical_rows {
            let lexical = (row.raw_score / max_lexical) * HYBRID_LEXICAL_WEIGHT;
            combined
                .entry(row.chunk.id.clone())
                .and_modify(|existing| existing.raw_score += lexical)
                .or_insert(ScoredRow {
                    raw_score: lexical,
                    chunk: row.chunk,
                });
        }

        Ok(top_k_rows(combined.into_values().collect(), top_k))
    }

    async fn fetch_by_ids(&self, ids: &[String]) -> Result<Vec<Chunk>, StoreError> {
        let guard = self.chunks.read().await;
        Ok(ids
            .iter()
            .filter_map(|id| guard.get(id).cloned())
            .collect())
    }

    async fn fetch_by_section(
        &self,
        source_id: &str,
        section_path: &str,
        exclude_id: &str,
    ) -> Result<Vec<Chunk>, StoreError> {
        let guard = self.chunks.read().await;
        let mut siblings: Vec<Chunk> = guard
            .values()
            .filter(|chunk| {
                chunk.source_id == source_id
                    && chunk.id != exclude_id
                    && chunk.hierarchy_path.as_deref() == Some(section_path)
            })
            .cloned()
            .collect();
        siblings.sort_by_key(|chunk| chunk.chunk_index);
        Ok(siblings)
    }
}
