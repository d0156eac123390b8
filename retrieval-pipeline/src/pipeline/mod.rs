pub mod config;
pub mod diagnostics;
pub mod stages;

use std::fmt;
use std::time::Instant;

use serde::Serialize;
use tracing::{debug, instrument, warn};

use common::conversation::ConversationContext;
use common::error::AppError;
use common::store::ChunkStore;
use common::utils::embedding::EmbeddingProvider;

use crate::analysis::is_system_probe;
use crate::expansion::expand_context;
use crate::ordering::mitigate_lost_in_middle;
use crate::quality::optimize_quality;
use crate::scoring::{sort_by_relevance_desc, ScoredChunk};
use crate::selector::{select_rerank_model, selection_confidence};

use config::RetrievalConfig;
use diagnostics::{
    AnalysisStats, ExpansionStats, PipelineDiagnostics, QualityStats, RerankStats, RetrievalStats,
};

/// Strategy label reported when a system probe bypasses retrieval.
pub const SYSTEM_BYPASS_LABEL: &str = "system_bypass";
/// Strategy label reported when an empty query short-circuits the pipeline.
pub const EMPTY_QUERY_LABEL: &str = "empty_query";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    Analyze,
    Embed,
    Retrieve,
    Expand,
    Reorder,
    Optimize,
    Rerank,
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            StageKind::Analyze => "analyze",
            StageKind::Embed => "embed",
            StageKind::Retrieve => "retrieve",
            StageKind::Expand => "expand",
            StageKind::Reorder => "reorder",
            StageKind::Optimize => "optimize",
            StageKind::Rerank => "rerank",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct StageTiming {
    pub stage: StageKind,
    pub duration_ms: u64,
}

/// Per-request stage stopwatch.
#[derive(Debug, Default)]
pub struct PipelineStageTimings {
    timings: Vec<StageTiming>,
}

impl PipelineStageTimings {
    pub fn record(&mut self, stage: StageKind, started: Instant) {
        let duration_ms = started.elapsed().as_millis().min(u128::from(u64::MAX)) as u64;
        self.timings.push(StageTiming { stage, duration_ms });
    }

    pub fn total_ms(&self) -> u64 {
        self.timings.iter().map(|t| t.duration_ms).sum()
    }

    pub fn into_inner(self) -> Vec<StageTiming> {
        self.timings
    }
}

/// Result of one retrieval request: the surviving chunks, sorted by
/// relevance descending, plus provenance metadata.
#[derive(Debug)]
pub struct RetrievalOutput {
    pub query: String,
    pub strategy: String,
    pub reranking_model: Option<String>,
    pub chunks: Vec<ScoredChunk>,
    pub metadata: RetrievalMetadata,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RetrievalMetadata {
    /// Every strategy tag seen across the surviving chunks.
    pub strategies_used: Vec<String>,
    pub average_relevance: f32,
    /// Confidence that the selected strategy fits the query.
    pub confidence: f32,
    pub fallback_applied: bool,
    pub fallback_reason: Option<String>,
    /// True when the query was a health probe that never reached the store.
    pub system_query: bool,
    pub total_duration_ms: u64,
    pub stage_timings: Vec<StageTiming>,
    pub diagnostics: Option<PipelineDiagnostics>,
}

/// One retrieval request. Borrowed so a caller can issue many requests over
/// the same store and embedder.
pub struct PipelineRequest<'a> {
    pub store: &'a dyn ChunkStore,
    pub embedder: &'a EmbeddingProvider,
    pub query: &'a str,
    pub context: &'a ConversationContext,
    pub config: &'a RetrievalConfig,
    pub collect_diagnostics: bool,
}

fn bypass_output(query: &str, strategy: &str, system_query: bool, confidence: f32) -> RetrievalOutput {
    RetrievalOutput {
        query: query.to_string(),
        strategy: strategy.to_string(),
        reranking_model: None,
        chunks: Vec::new(),
        metadata: RetrievalMetadata {
            confidence,
            system_query,
            ..RetrievalMetadata::default()
        },
    }
}

/// Runs the full retrieval pipeline for one query.
///
/// Empty queries and system probes short-circuit before any store access.
/// Embedding failure degrades to keyword retrieval instead of erroring, and
/// a store failure inside the selected strategy produces an empty result
/// set; only a failing lexical fallback propagates an error.
#[instrument(skip_all, fields(query_len = request.query.len()))]
pub async fn run_pipeline(request: PipelineRequest<'_>) -> Result<RetrievalOutput, AppError> {
    let query = request.query.trim();
    if query.is_empty() {
        debug!("empty query; skipping retrieval");
        return Ok(bypass_output(request.query, EMPTY_QUERY_LABEL, false, 0.0));
    }
    if is_system_probe(query) {
        debug!("system probe detected; bypassing retrieval");
        return Ok(bypass_output(query, SYSTEM_BYPASS_LABEL, true, 1.0));
    }

    let tuning = &request.config.tuning;
    let mut timings = PipelineStageTimings::default();
    let mut diagnostics = request.collect_diagnostics.then(PipelineDiagnostics::default);

    // Analyze
    let started = Instant::now();
    let analysis = stages::analyze_stage(query, request.context, tuning);
    timings.record(StageKind::Analyze, started);
    if let Some(diag) = diagnostics.as_mut() {
        diag.analysis = Some(AnalysisStats {
            query_type: analysis.query_type.to_string(),
            complexity: format!("{:?}", analysis.complexity).to_ascii_lowercase(),
            intent_count: analysis.intents.len(),
            keyword_count: analysis.keywords.len(),
            entity_count: analysis.entities.len(),
        });
    }

    // Embed; a failure here selects the lexical fallback path.
    let started = Instant::now();
    let (embedding, fallback_reason) = match stages::embed_stage(request.embedder, query).await {
        Ok(embedding) => (Some(embedding), None),
        Err(err) => {
            warn!(error = %err, "query embedding failed");
            (None, Some(format!("embedding unavailable: {err}")))
        }
    };
    timings.record(StageKind::Embed, started);

    // Retrieve
    let started = Instant::now();
    let outcome = stages::retrieve_stage(
        request.store,
        request.embedder,
        query,
        embedding.as_deref(),
        &analysis,
        request.context,
        request.config.strategy.as_deref(),
        tuning,
    )
    .await?;
    timings.record(StageKind::Retrieve, started);
    if let Some(diag) = diagnostics.as_mut() {
        diag.retrieval = Some(RetrievalStats {
            strategy: outcome.strategy_label.clone(),
            candidates: outcome.candidates.len(),
            fallback_applied: outcome.fallback_applied,
        });
    }

    // Expand
    let started = Instant::now();
    let (expanded, expansion_outcome) =
        expand_context(request.store, query, outcome.candidates, tuning).await;
    timings.record(StageKind::Expand, started);
    if let Some(diag) = diagnostics.as_mut() {
        diag.expansion = Some(ExpansionStats {
            hierarchical_added: expansion_outcome.hierarchical_added,
            semantic_added: expansion_outcome.semantic_added,
            total_after: expanded.len(),
        });
    }

    // Reorder, so the quality pass keeps the interleaved candidate order.
    let started = Instant::now();
    let reordered = mitigate_lost_in_middle(expanded);
    timings.record(StageKind::Reorder, started);

    // Optimize
    let started = Instant::now();
    let (optimized, quality_outcome) = optimize_quality(query, reordered, tuning);
    timings.record(StageKind::Optimize, started);
    if let Some(diag) = diagnostics.as_mut() {
        diag.quality = Some(QualityStats {
            redundant_dropped: quality_outcome.redundant_dropped,
            complementarity_applied: quality_outcome.complementarity_applied,
            kept: optimized.len(),
        });
    }

    // Rerank
    let started = Instant::now();
    let mut chunks = optimized;
    let rerank_model = if tuning.enable_reranking {
        let model = select_rerank_model(
            request.config.rerank_model.as_deref(),
            &analysis,
            request.context,
        );
        model.rerank(&mut chunks, &analysis, query, request.context, tuning);
        Some(model)
    } else {
        sort_by_relevance_desc(&mut chunks);
        None
    };
    timings.record(StageKind::Rerank, started);
    if let Some(diag) = diagnostics.as_mut() {
        diag.rerank = rerank_model.map(|model| RerankStats {
            model: model.to_string(),
            candidates: chunks.len(),
        });
    }

    chunks.truncate(tuning.max_retrieved_chunks);

    let mut strategies_used: Vec<String> = chunks
        .iter()
        .flat_map(|chunk| chunk.found_by.iter().cloned())
        .collect();
    strategies_used.sort_unstable();
    strategies_used.dedup();

    let average_relevance = if chunks.is_empty() {
        0.0
    } else {
        chunks.iter().map(|c| c.relevance).sum::<f32>() / chunks.len() as f32
    };

    let total_duration_ms = timings.total_ms();
    debug!(
        strategy = %outcome.strategy_label,
        chunks = chunks.len(),
        average_relevance,
        total_duration_ms,
        "retrieval pipeline complete"
    );

    Ok(RetrievalOutput {
        query: query.to_string(),
        strategy: outcome.strategy_label,
        reranking_model: rerank_model.map(|model| model.to_string()),
        chunks,
        metadata: RetrievalMetadata {
            strategies_used,
            average_relevance,
            confidence: selection_confidence(&analysis),
            fallback_applied: outcome.fallback_applied,
            fallback_reason,
            system_query: false,
            total_duration_ms,
            stage_timings: timings.into_inner(),
            diagnostics,
        },
    })
}
