use std::collections::HashMap;
use std::fmt;

use futures::{stream::FuturesUnordered, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use common::{
    conversation::ConversationContext,
    error::AppError,
    store::{ChunkStore, ScoredRow},
    utils::embedding::EmbeddingProvider,
};

use crate::{
    analysis::{QueryAnalysis, QueryType},
    pipeline::config::RetrievalTuning,
    scoring::{
        clamp_unit, fuse_scores, merge_by_chunk_id, min_max_normalize, sort_by_relevance_desc,
        FusionWeights, ScoredChunk,
    },
};

/// Score inherited by section siblings pulled in by hierarchical retrieval.
const SIBLING_INHERITANCE: f32 = 0.85;
/// Bonus per additional strategy that independently found the same chunk.
const CONSENSUS_BONUS: f32 = 0.1;
/// Bonus for instructional content answering a procedure query.
const INSTRUCTIONAL_CONTENT_BONUS: f32 = 0.2;
/// Quality-score bonus tiers used by the multi-feature strategy.
const QUALITY_BONUS_HIGH: f32 = 0.1;
const QUALITY_PENALTY_LOW: f32 = 0.05;

/// Closed set of retrieval strategies. Unknown requested names never reach
/// this enum; the selector resolves them to Hybrid with a warning first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalStrategy {
    VectorOnly,
    #[default]
    Hybrid,
    Contextual,
    MultiQuery,
    Hierarchical,
    MultiFeature,
}

impl fmt::Display for RetrievalStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RetrievalStrategy::VectorOnly => "vector_only",
            RetrievalStrategy::Hybrid => "hybrid",
            RetrievalStrategy::Contextual => "contextual",
            RetrievalStrategy::MultiQuery => "multi_query",
            RetrievalStrategy::Hierarchical => "hierarchical",
            RetrievalStrategy::MultiFeature => "multi_feature",
        };
        f.write_str(label)
    }
}

impl std::str::FromStr for RetrievalStrategy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "vector_only" | "vector" => Ok(Self::VectorOnly),
            "hybrid" => Ok(Self::Hybrid),
            "contextual" => Ok(Self::Contextual),
            "multi_query" => Ok(Self::MultiQuery),
            "hierarchical" => Ok(Self::Hierarchical),
            "multi_feature" | "advanced" => Ok(Self::MultiFeature),
            other => Err(format!("unknown retrieval strategy '{other}'")),
        }
    }
}

/// Borrowed inputs shared by every strategy execution.
pub struct StrategyInput<'a> {
    pub store: &'a dyn ChunkStore,
    pub embedder: &'a EmbeddingProvider,
    pub query: &'a str,
    pub query_embedding: &'a [f32],
    pub analysis: &'a QueryAnalysis,
    pub context: &'a ConversationContext,
    pub tuning: &'a RetrievalTuning,
    pub max_results: usize,
}

impl RetrievalStrategy {
    /// Runs the strategy against the chunk store. A store failure here is
    /// reported to the caller, which logs it and proceeds with whatever
    /// other strategies produced.
    pub async fn execute(self, input: &StrategyInput<'_>) -> Result<Vec<ScoredChunk>, AppError> {
        let chunks = match self {
            RetrievalStrategy::VectorOnly => vector_only(input).await?,
            RetrievalStrategy::Hybrid => hybrid(input).await?,
            RetrievalStrategy::Contextual => contextual(input).await?,
            RetrievalStrategy::MultiQuery => multi_query(input).await?,
            RetrievalStrategy::Hierarchical => hierarchical(input).await?,
            RetrievalStrategy::MultiFeature => multi_feature(input).await?,
        };
        debug!(strategy = %self, candidates = chunks.len(), "strategy execution complete");
        Ok(chunks)
    }
}

fn rows_to_scored(rows: Vec<ScoredRow>, tag: &str) -> Vec<ScoredChunk> {
    rows.into_iter()
        .map(|row| {
            ScoredChunk::new(row.chunk)
                .with_vector_score(clamp_unit(row.raw_score))
                .tagged(tag)
        })
        .collect()
}

/// Top-K by embedding similarity alone.
async fn vector_only(input: &StrategyInput<'_>) -> Result<Vec<ScoredChunk>, AppError> {
    let rows = input
        .store
        .vector_search(
            input.query_embedding,
            input.max_results,
            input.tuning.similarity_metric,
        )
        .await?;
    Ok(rows_to_scored(rows, "vector_only"))
}

/// Union of vector and lexical candidates, fused 0.7/0.3. A chunk joins the
/// candidate set by passing the vector threshold or by matching lexically.
async fn hybrid(input: &StrategyInput<'_>) -> Result<Vec<ScoredChunk>, AppError> {
    let (vector_rows, lexical_rows) = tokio::join!(
        input.store.vector_search(
            input.query_embedding,
            input.max_results,
            input.tuning.similarity_metric,
        ),
        input.store.lexical_search(input.query, input.max_results),
    );
    let vector_rows = vector_rows?;
    let lexical_rows = lexical_rows?;

    let lexical_raw: Vec<f32> = lexical_rows.iter().map(|row| row.raw_score).collect();
    let lexical_normalized = min_max_normalize(&lexical_raw);

    let weights = FusionWeights::default();
    let mut merged: HashMap<String, ScoredChunk> = HashMap::new();

    for row in vector_rows {
        if row.raw_score < input.tuning.similarity_threshold {
            continue;
        }
        merged.insert(
            row.chunk.id.clone(),
            ScoredChunk::new(row.chunk)
                .with_vector_score(clamp_unit(row.raw_score))
                .tagged("hybrid"),
        );
    }

    for (row, normalized) in lexical_rows.into_iter().zip(lexical_normalized) {
        merged
            .entry(row.chunk.id.clone())
            .and_modify(|existing| {
                existing.scores.lexical = Some(normalized);
            })
            .or_insert_with(|| {
                ScoredChunk::new(row.chunk)
                    .with_lexical_score(normalized)
                    .tagged("hybrid")
            });
    }

    let mut chunks: Vec<ScoredChunk> = merged.into_values().collect();
    for chunk in &mut chunks {
        let fused = fuse_scores(&chunk.scores, weights);
        chunk.update_relevance(fused);
    }
    sort_by_relevance_desc(&mut chunks);
    chunks.truncate(input.max_results);
    Ok(chunks)
}

/// Hybrid search over a query expanded with recent conversation topics,
/// optionally filtered by source and minimum quality.
async fn contextual(input: &StrategyInput<'_>) -> Result<Vec<ScoredChunk>, AppError> {
    let mut expanded = input.query.to_owned();
    for topic in input.context.recent_topics.iter().rev().take(2) {
        expanded.push(' ');
        expanded.push_str(topic);
    }
    if let Some(topic) = &input.context.current_topic {
        expanded.push(' ');
        expanded.push_str(topic);
    }

    let rows = input
        .store
        .hybrid_search(&expanded, input.query_embedding, input.max_results)
        .await?;

    let chunks = rows
        .into_iter()
        .filter(|row| {
            if let Some(sources) = &input.tuning.source_filter {
                if !sources.contains(&row.chunk.source_id) {
                    return false;
                }
            }
            if let Some(min_quality) = input.tuning.min_quality_score {
                if row.chunk.quality_score < min_quality {
                    return false;
                }
            }
            true
        })
        .map(|row| {
            ScoredChunk::new(row.chunk)
                .with_vector_score(clamp_unit(row.raw_score))
                .tagged("contextual")
        })
        .collect();

    Ok(chunks)
}

/// Decomposes the query into up to four sub-queries and unions their
/// vector results, deduplicated by chunk id.
async fn multi_query(input: &StrategyInput<'_>) -> Result<Vec<ScoredChunk>, AppError> {
    let sub_queries = build_sub_queries(input.query, input.analysis, input.tuning);
    let per_query = input.max_results.div_ceil(sub_queries.len().max(1));

    let mut futures = FuturesUnordered::new();
    for (index, sub_query) in sub_queries.into_iter().enumerate() {
        let store = input.store;
        let embedder = input.embedder;
        let original_embedding = input.query_embedding;
        let metric = input.tuning.similarity_metric;
        futures.push(async move {
            let embedding = if index == 0 {
                Ok(original_embedding.to_vec())
            } else {
                embedder.embed(&sub_query).await
            };
            let embedding = match embedding {
                Ok(embedding) => embedding,
                Err(err) => {
                    warn!(%sub_query, error = %err, "sub-query embedding failed; skipping");
                    return Vec::new();
                }
            };
            match store.vector_search(&embedding, per_query, metric).await {
                Ok(rows) => rows_to_scored(rows, "multi_query"),
                Err(err) => {
                    warn!(%sub_query, error = %err, "sub-query search failed; skipping");
                    Vec::new()
                }
            }
        });
    }

    let mut merged: HashMap<String, ScoredChunk> = HashMap::new();
    while let Some(batch) = futures.next().await {
        merge_by_chunk_id(&mut merged, batch);
    }

    let mut chunks: Vec<ScoredChunk> = merged.into_values().collect();
    sort_by_relevance_desc(&mut chunks);
    Ok(chunks)
}

fn build_sub_queries(query: &str, analysis: &QueryAnalysis, tuning: &RetrievalTuning) -> Vec<String> {
    let cap = tuning.max_sub_queries.max(1);
    let mut sub_queries = vec![query.to_owned()];

    for entity in &analysis.entities {
        if sub_queries.len() >= cap {
            break;
        }
        sub_queries.push(format!("{entity} in {}", tuning.domain_label));
    }

    if sub_queries.len() < cap {
        let keywords = analysis.keywords.join(" ");
        if !keywords.is_empty() {
            if analysis.intents.contains(&QueryType::Procedure) {
                sub_queries.push(format!("procedure for {keywords}"));
            } else if analysis.intents.contains(&QueryType::Definition) {
                sub_queries.push(format!("definition of {keywords}"));
            }
        }
    }

    sub_queries.truncate(cap);
    sub_queries
}

/// Seed search followed by sibling fetches along each seed's hierarchy path.
async fn hierarchical(input: &StrategyInput<'_>) -> Result<Vec<ScoredChunk>, AppError> {
    let mut seeds = if input.tuning.enable_hybrid_search {
        hybrid(input).await?
    } else {
        vector_only(input).await?
    };
    sort_by_relevance_desc(&mut seeds);

    let mut merged: HashMap<String, ScoredChunk> = HashMap::new();

    for seed in seeds.iter().take(input.tuning.hierarchy_seed_limit) {
        let Some(path) = seed.chunk.hierarchy_path.as_deref() else {
            continue;
        };
        let siblings = match input
            .store
            .fetch_by_section(&seed.chunk.source_id, path, &seed.chunk.id)
            .await
        {
            Ok(siblings) => siblings,
            Err(err) => {
                warn!(seed_id = %seed.chunk.id, error = %err, "sibling fetch failed; skipping seed");
                continue;
            }
        };

        let inherited = clamp_unit(seed.relevance * SIBLING_INHERITANCE);
        let sibling_chunks: Vec<ScoredChunk> = siblings
            .into_iter()
            .take(input.tuning.siblings_per_seed)
            .map(|chunk| {
                ScoredChunk::new(chunk)
                    .with_relevance(inherited)
                    .tagged("hierarchical")
            })
            .collect();
        merge_by_chunk_id(&mut merged, sibling_chunks);
    }

    let retagged: Vec<ScoredChunk> = seeds
        .into_iter()
        .map(|seed| seed.tagged("hierarchical"))
        .collect();
    merge_by_chunk_id(&mut merged, retagged);

    let mut chunks: Vec<ScoredChunk> = merged.into_values().collect();
    sort_by_relevance_desc(&mut chunks);
    Ok(chunks)
}

/// Fans out vector-only, hybrid, and contextual retrieval concurrently,
/// then rewards strategy consensus, quality, and instructional content.
///
/// This is the consensus variant of multi-feature retrieval; the per-feature
/// composite weighting lives in the enhanced scorer instead.
async fn multi_feature(input: &StrategyInput<'_>) -> Result<Vec<ScoredChunk>, AppError> {
    let (vector_result, hybrid_result, contextual_result) = tokio::join!(
        vector_only(input),
        hybrid(input),
        contextual(input),
    );

    let mut merged: HashMap<String, ScoredChunk> = HashMap::new();
    for (label, result) in [
        ("vector_only", vector_result),
        ("hybrid", hybrid_result),
        ("contextual", contextual_result),
    ] {
        match result {
            Ok(batch) => merge_by_chunk_id(&mut merged, batch),
            Err(err) => {
                warn!(sub_strategy = label, error = %err, "multi-feature sub-strategy failed; continuing");
            }
        }
    }

    let is_procedure = input.analysis.query_type == QueryType::Procedure;
    let mut chunks: Vec<ScoredChunk> = merged.into_values().collect();
    for scored in &mut chunks {
        let consensus = CONSENSUS_BONUS * scored.found_by.len().saturating_sub(1) as f32;

        let quality = scored.chunk.quality_score;
        let quality_bonus = if quality >= 0.8 {
            QUALITY_BONUS_HIGH
        } else if quality >= 0.6 {
            0.0
        } else {
            -QUALITY_PENALTY_LOW
        };

        let content_bonus = if is_procedure && scored.chunk.content_type.is_instructional() {
            INSTRUCTIONAL_CONTENT_BONUS
        } else {
            0.0
        };

        let boosted = scored.relevance + consensus + quality_bonus + content_bonus;
        scored.update_relevance(boosted);
        scored.found_by.push("multi_feature".to_string());
    }

    sort_by_relevance_desc(&mut chunks);
    chunks.truncate(input.max_results);
    Ok(chunks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{QueryClassifier, RegexQueryClassifier};
    use common::chunk::{Chunk, ContentType};
    use common::store::InMemoryChunkStore;

    const DIM: usize = 128;

    async fn seeded_store(embedder: &EmbeddingProvider, specs: &[(&str, &str)]) -> InMemoryChunkStore {
        let store = InMemoryChunkStore::new();
        for (index, (id, content)) in specs.iter().enumerate() {
            let embedding = embedder.embed(content).await.expect("embed chunk");
            let mut chunk =
                Chunk::new("source_1".into(), index as u32, (*content).into()).with_embedding(embedding);
            chunk.id = (*id).to_string();
            store.insert(chunk).await;
        }
        store
    }

    fn analysis_for(query: &str) -> QueryAnalysis {
        RegexQueryClassifier::default().analyze(query, &ConversationContext::default())
    }

    async fn run(
        strategy: RetrievalStrategy,
        store: &InMemoryChunkStore,
        embedder: &EmbeddingProvider,
        query: &str,
        tuning: &RetrievalTuning,
    ) -> Vec<ScoredChunk> {
        let embedding = embedder.embed(query).await.expect("embed query");
        let analysis = analysis_for(query);
        let context = ConversationContext::default();
        let input = StrategyInput {
            store,
            embedder,
            query,
            query_embedding: &embedding,
            analysis: &analysis,
            context: &context,
            tuning,
            max_results: 10,
        };
        strategy.execute(&input).await.expect("strategy failed")
    }

    #[tokio::test]
    async fn vector_only_returns_sorted_candidates() {
        let embedder = EmbeddingProvider::new_hashed(DIM);
        let store = seeded_store(
            &embedder,
            &[
                ("match", "fund creation workflow steps"),
                ("other", "gardening with watering cans"),
            ],
        )
        .await;

        let chunks = run(
            RetrievalStrategy::VectorOnly,
            &store,
            &embedder,
            "fund creation workflow",
            &RetrievalTuning::default(),
        )
        .await;

        assert!(!chunks.is_empty());
        assert_eq!(chunks[0].chunk.id, "match");
        for pair in chunks.windows(2) {
            assert!(pair[0].relevance >= pair[1].relevance);
        }
    }

    #[tokio::test]
    async fn hybrid_rewards_chunks_matching_both_signals() {
        let embedder = EmbeddingProvider::new_hashed(DIM);
        let mut tuning = RetrievalTuning::default();
        tuning.similarity_threshold = 0.0;
        let store = seeded_store(
            &embedder,
            &[
                ("golden", "fund creation workflow for new accounts"),
                ("vector_ish", "setting up investment vehicles and allocations"),
            ],
        )
        .await;

        let chunks = run(
            RetrievalStrategy::Hybrid,
            &store,
            &embedder,
            "fund creation workflow",
            &tuning,
        )
        .await;

        assert_eq!(chunks[0].chunk.id, "golden");
        assert!(chunks[0].scores.lexical.is_some());
    }

    #[tokio::test]
    async fn multi_query_dedups_union() {
        let embedder = EmbeddingProvider::new_hashed(DIM);
        let store = seeded_store(
            &embedder,
            &[
                ("a", "fund setup and configuration"),
                ("b", "portfolio management overview"),
            ],
        )
        .await;

        let chunks = run(
            RetrievalStrategy::MultiQuery,
            &store,
            &embedder,
            "How do I configure a fund and portfolio?",
            &RetrievalTuning::default(),
        )
        .await;

        let mut ids: Vec<&str> = chunks.iter().map(|c| c.chunk.id.as_str()).collect();
        let before = ids.len();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(before, ids.len(), "sub-query union must be deduplicated");
    }

    #[tokio::test]
    async fn hierarchical_pulls_section_siblings() {
        let embedder = EmbeddingProvider::new_hashed(DIM);
        let store = InMemoryChunkStore::new();

        let seed_content = "fund creation checklist overview";
        let seed_embedding = embedder.embed(seed_content).await.expect("embed");
        let mut seed = Chunk::new("source_1".into(), 0, seed_content.into())
            .with_embedding(seed_embedding)
            .with_hierarchy_path("guide/funds");
        seed.id = "seed".into();
        store.insert(seed).await;

        let sibling_embedding = embedder.embed("unrelated sibling text").await.expect("embed");
        let mut sibling = Chunk::new("source_1".into(), 1, "unrelated sibling text".into())
            .with_embedding(sibling_embedding)
            .with_hierarchy_path("guide/funds");
        sibling.id = "sibling".into();
        store.insert(sibling).await;

        let mut tuning = RetrievalTuning::default();
        tuning.similarity_threshold = 0.0;
        let chunks = run(
            RetrievalStrategy::Hierarchical,
            &store,
            &embedder,
            "fund creation checklist",
            &tuning,
        )
        .await;

        assert!(chunks.iter().any(|c| c.chunk.id == "sibling"));
    }

    #[tokio::test]
    async fn multi_feature_consensus_boosts_shared_chunks() {
        let embedder = EmbeddingProvider::new_hashed(DIM);
        let mut tuning = RetrievalTuning::default();
        tuning.similarity_threshold = 0.0;
        let store = seeded_store(
            &embedder,
            &[
                ("shared", "fund creation workflow steps"),
                ("weak", "miscellaneous office supplies list"),
            ],
        )
        .await;

        let chunks = run(
            RetrievalStrategy::MultiFeature,
            &store,
            &embedder,
            "fund creation workflow",
            &tuning,
        )
        .await;

        let shared = chunks
            .iter()
            .find(|c| c.chunk.id == "shared")
            .expect("shared chunk present");
        assert!(shared.found_by.len() > 2, "expected multiple strategy tags");
        assert_eq!(chunks[0].chunk.id, "shared");
    }

    #[tokio::test]
    async fn multi_feature_boosts_instructional_on_procedure_query() {
        let embedder = EmbeddingProvider::new_hashed(DIM);
        let store = InMemoryChunkStore::new();
        let content = "Step 1: open the admin panel. Step 2: create the fund.";
        let embedding = embedder.embed(content).await.expect("embed");
        let mut instruction = Chunk::new("source_1".into(), 0, content.into())
            .with_embedding(embedding.clone())
            .with_content_type(ContentType::Instruction)
            .with_quality(0.9);
        instruction.id = "instruction".into();
        store.insert(instruction).await;

        let mut plain = Chunk::new("source_1".into(), 1, content.into())
            .with_embedding(embedding)
            .with_content_type(ContentType::Text)
            .with_quality(0.9);
        plain.id = "plain".into();
        store.insert(plain).await;

        let mut tuning = RetrievalTuning::default();
        tuning.similarity_threshold = 0.0;
        let chunks = run(
            RetrievalStrategy::MultiFeature,
            &store,
            &embedder,
            "How do I create a new fund?",
            &tuning,
        )
        .await;

        let rank_of = |id: &str| chunks.iter().position(|c| c.chunk.id == id);
        assert!(rank_of("instruction") < rank_of("plain"));
    }

    #[tokio::test]
    async fn contextual_filters_by_quality() {
        let embedder = EmbeddingProvider::new_hashed(DIM);
        let store = InMemoryChunkStore::new();
        let content = "fund compliance summary";
        let embedding = embedder.embed(content).await.expect("embed");
        let mut low = Chunk::new("source_1".into(), 0, content.into())
            .with_embedding(embedding.clone())
            .with_quality(0.2);
        low.id = "low".into();
        store.insert(low).await;
        let mut high = Chunk::new("source_1".into(), 1, content.into())
            .with_embedding(embedding)
            .with_quality(0.9);
        high.id = "high".into();
        store.insert(high).await;

        let mut tuning = RetrievalTuning::default();
        tuning.min_quality_score = Some(0.5);
        let chunks = run(
            RetrievalStrategy::Contextual,
            &store,
            &embedder,
            "fund compliance",
            &tuning,
        )
        .await;

        assert!(chunks.iter().all(|c| c.chunk.quality_score >= 0.5));
        assert!(chunks.iter().any(|c| c.chunk.id == "high"));
    }
}
