//! Adaptive retrieval pipeline: query analysis, strategy selection, store
//! search, context expansion, ordering, quality optimization, and reranking.
//!
//! The pipeline is storage-agnostic; callers provide a
//! [`common::store::ChunkStore`] implementation and an embedding provider,
//! and receive a relevance-sorted set of chunks with provenance metadata.

pub mod analysis;
pub mod expansion;
pub mod ordering;
pub mod pipeline;
pub mod quality;
pub mod reranking;
pub mod scoring;
pub mod selector;
pub mod strategies;

pub use pipeline::config::{RetrievalConfig, RetrievalTuning};
pub use pipeline::{
    run_pipeline, PipelineRequest, RetrievalMetadata, RetrievalOutput, EMPTY_QUERY_LABEL,
    SYSTEM_BYPASS_LABEL,
};
pub use reranking::RerankModel;
pub use scoring::ScoredChunk;
pub use strategies::RetrievalStrategy;

use common::conversation::ConversationContext;
use common::error::AppError;
use common::store::ChunkStore;
use common::utils::embedding::EmbeddingProvider;

/// Convenience entry point with diagnostics disabled.
pub async fn retrieve(
    store: &dyn ChunkStore,
    embedder: &EmbeddingProvider,
    query: &str,
    context: &ConversationContext,
    config: &RetrievalConfig,
) -> Result<RetrievalOutput, AppError> {
    run_pipeline(PipelineRequest {
        store,
        embedder,
        query,
        context,
        config,
        collect_diagnostics: false,
    })
    .await
}
