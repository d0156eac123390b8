use tracing::{debug, warn};

use common::conversation::ConversationContext;
use common::error::AppError;
use common::store::ChunkStore;
use common::utils::embedding::EmbeddingProvider;

use crate::analysis::{QueryAnalysis, QueryClassifier, RegexQueryClassifier};
use crate::pipeline::config::RetrievalTuning;
use crate::scoring::{clamp_unit, merge_by_chunk_id, min_max_normalize, sort_by_relevance_desc, ScoredChunk};
use crate::selector::select_strategy;
use crate::strategies::{RetrievalStrategy, StrategyInput};

/// Strategy label reported when embedding failure forces keyword retrieval.
pub const LEXICAL_FALLBACK_LABEL: &str = "lexical_fallback";

/// Classifies the query. Uses caller-supplied domain terms when present.
pub fn analyze_stage(
    query: &str,
    context: &ConversationContext,
    tuning: &RetrievalTuning,
) -> QueryAnalysis {
    let classifier = RegexQueryClassifier::new(tuning.domain_terms.clone());
    classifier.analyze(query, context)
}

/// Embeds the query. The caller decides whether a failure aborts the
/// request or degrades to lexical retrieval.
pub async fn embed_stage(
    embedder: &EmbeddingProvider,
    query: &str,
) -> Result<Vec<f32>, AppError> {
    embedder.embed(query).await
}

/// Outcome of the retrieval stage: candidates plus the strategy that
/// actually ran, which may be the fallback rather than the selected one.
pub struct RetrieveOutcome {
    pub candidates: Vec<ScoredChunk>,
    pub strategy_label: String,
    pub fallback_applied: bool,
}

/// Runs the selected strategy, or keyword retrieval when no embedding is
/// available. A store failure inside the strategy yields an empty candidate
/// set rather than an error; only the lexical fallback path can propagate.
#[allow(clippy::too_many_arguments)]
pub async fn retrieve_stage(
    store: &dyn ChunkStore,
    embedder: &EmbeddingProvider,
    query: &str,
    embedding: Option<&[f32]>,
    analysis: &QueryAnalysis,
    context: &ConversationContext,
    requested_strategy: Option<&str>,
    tuning: &RetrievalTuning,
) -> Result<RetrieveOutcome, AppError> {
    let Some(embedding) = embedding else {
        let candidates = lexical_fallback(store, query, analysis, tuning).await?;
        return Ok(RetrieveOutcome {
            candidates,
            strategy_label: LEXICAL_FALLBACK_LABEL.to_string(),
            fallback_applied: true,
        });
    };

    let strategy = select_strategy(requested_strategy, analysis, context);
    let input = StrategyInput {
        store,
        embedder,
        query,
        query_embedding: embedding,
        analysis,
        context,
        tuning,
        max_results: tuning.top_k,
    };
    let candidates = match strategy.execute(&input).await {
        Ok(candidates) => candidates,
        Err(err) => {
            warn!(strategy = %strategy, error = %err, "strategy execution failed; continuing without candidates");
            Vec::new()
        }
    };
    debug!(strategy = %strategy, candidates = candidates.len(), "retrieval stage complete");

    Ok(RetrieveOutcome {
        candidates,
        strategy_label: strategy.to_string(),
        fallback_applied: false,
    })
}

/// Keyword-only retrieval used when the embedding backend is down. Tries
/// the full query first, then unions per-keyword searches if that found
/// nothing.
async fn lexical_fallback(
    store: &dyn ChunkStore,
    query: &str,
    analysis: &QueryAnalysis,
    tuning: &RetrievalTuning,
) -> Result<Vec<ScoredChunk>, AppError> {
    warn!("embedding unavailable; degrading to lexical retrieval");

    let mut rows = store.lexical_search(query, tuning.top_k).await?;

    if rows.is_empty() && !analysis.keywords.is_empty() {
        let mut merged = std::collections::HashMap::new();
        for keyword in &analysis.keywords {
            match store.lexical_search(keyword, tuning.top_k).await {
                Ok(keyword_rows) => {
                    let scored = score_lexical_rows(keyword_rows);
                    merge_by_chunk_id(&mut merged, scored);
                }
                Err(err) => {
                    warn!(keyword, error = %err, "keyword fallback search failed; skipping");
                }
            }
        }
        let mut candidates: Vec<ScoredChunk> = merged.into_values().collect();
        sort_by_relevance_desc(&mut candidates);
        candidates.truncate(tuning.top_k);
        return Ok(candidates);
    }

    rows.truncate(tuning.top_k);
    Ok(score_lexical_rows(rows))
}

fn score_lexical_rows(rows: Vec<common::store::ScoredRow>) -> Vec<ScoredChunk> {
    let raw: Vec<f32> = rows.iter().map(|row| row.raw_score).collect();
    let normalized = min_max_normalize(&raw);
    rows.into_iter()
        .zip(normalized)
        .map(|(row, score)| {
            ScoredChunk::new(row.chunk)
                .with_lexical_score(score)
                .with_relevance(clamp_unit(score))
                .tagged(LEXICAL_FALLBACK_LABEL)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::chunk::Chunk;
    use common::store::InMemoryChunkStore;

    async fn seeded_store() -> InMemoryChunkStore {
        let store = InMemoryChunkStore::new();
        let mut chunk = Chunk::new(
            "source_1".into(),
            0,
            "fund reporting deadlines for compliance".into(),
        );
        chunk.id = "only".into();
        store.insert(chunk).await;
        store
    }

    #[tokio::test]
    async fn test_missing_embedding_uses_lexical_fallback() {
        let store = seeded_store().await;
        let embedder = EmbeddingProvider::new_failing("backend offline");
        let tuning = RetrievalTuning::default();
        let context = ConversationContext::default();
        let analysis = analyze_stage("fund reporting", &context, &tuning);

        let outcome = retrieve_stage(
            &store,
            &embedder,
            "fund reporting",
            None,
            &analysis,
            &context,
            None,
            &tuning,
        )
        .await
        .expect("fallback retrieval");

        assert!(outcome.fallback_applied);
        assert_eq!(outcome.strategy_label, LEXICAL_FALLBACK_LABEL);
        assert_eq!(outcome.candidates.len(), 1);
        assert_eq!(outcome.candidates[0].chunk.id, "only");
    }

    #[tokio::test]
    async fn test_keyword_union_when_full_query_misses() {
        let store = InMemoryChunkStore::new();
        let mut chunk = Chunk::new("source_1".into(), 0, "compliance checklist".into());
        chunk.id = "kw".into();
        store.insert(chunk).await;

        let embedder = EmbeddingProvider::new_failing("backend offline");
        let tuning = RetrievalTuning::default();
        let context = ConversationContext::default();
        // No full-phrase match; "compliance" alone should still hit.
        let analysis = analyze_stage("zzzunmatchable compliance", &context, &tuning);

        let outcome = retrieve_stage(
            &store,
            &embedder,
            "zzzunmatchable",
            None,
            &analysis,
            &context,
            None,
            &tuning,
        )
        .await
        .expect("fallback retrieval");

        assert!(outcome.fallback_applied);
        assert!(outcome.candidates.iter().any(|c| c.chunk.id == "kw"));
    }
}
