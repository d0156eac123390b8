use tracing::{debug, warn};

use common::conversation::ConversationContext;

use crate::analysis::{Complexity, QueryAnalysis, QueryType};
use crate::reranking::RerankModel;
use crate::strategies::RetrievalStrategy;

/// Minimum prior turns before the contextual strategy takes over.
const CONTEXTUAL_TURN_THRESHOLD: usize = 3;

/// Picks a retrieval strategy from the query analysis. The decision table is
/// ordered; the first matching rule wins.
pub fn select_strategy(
    requested: Option<&str>,
    analysis: &QueryAnalysis,
    context: &ConversationContext,
) -> RetrievalStrategy {
    if let Some(name) = requested {
        match name.parse::<RetrievalStrategy>() {
            Ok(strategy) => {
                debug!(%strategy, "using caller-requested strategy");
                return strategy;
            }
            Err(_) => {
                warn!(requested = name, "unknown strategy requested; falling back to hybrid");
                return RetrievalStrategy::Hybrid;
            }
        }
    }

    let strategy = if analysis.complexity == Complexity::Complex || analysis.intents.len() > 2 {
        RetrievalStrategy::MultiQuery
    } else if matches!(analysis.query_type, QueryType::Procedure | QueryType::List) {
        RetrievalStrategy::Hierarchical
    } else if context.turn_count() >= CONTEXTUAL_TURN_THRESHOLD {
        RetrievalStrategy::Contextual
    } else if !analysis.entities.is_empty() || analysis.keywords.len() > 1 {
        RetrievalStrategy::Hybrid
    } else {
        RetrievalStrategy::VectorOnly
    };

    debug!(
        %strategy,
        query_type = %analysis.query_type,
        complexity = ?analysis.complexity,
        prior_turns = analysis.prior_turns,
        "selected retrieval strategy"
    );
    strategy
}

/// Picks the reranking model: conversation context wins, then intent, then
/// the similarity default.
pub fn select_rerank_model(
    requested: Option<&str>,
    analysis: &QueryAnalysis,
    context: &ConversationContext,
) -> RerankModel {
    if let Some(name) = requested {
        match name.parse::<RerankModel>() {
            Ok(model) => return model,
            Err(_) => {
                warn!(
                    requested = name,
                    "unknown reranking model requested; falling back to similarity_based"
                );
                return RerankModel::SimilarityBased;
            }
        }
    }

    if !context.is_empty() {
        RerankModel::ContextAware
    } else if matches!(analysis.query_type, QueryType::Definition | QueryType::Comparison) {
        RerankModel::RelevanceBased
    } else {
        RerankModel::SimilarityBased
    }
}

/// Confidence that the selected strategy fits the query, reported in the
/// response metadata. Recognized intent and matched entities raise it;
/// complexity lowers it slightly.
pub fn selection_confidence(analysis: &QueryAnalysis) -> f32 {
    let mut confidence: f32 = 0.5;
    if analysis.query_type != QueryType::General {
        confidence += 0.2;
    }
    if !analysis.entities.is_empty() {
        confidence += 0.15;
    }
    if analysis.complexity == Complexity::Complex {
        confidence -= 0.1;
    }
    confidence.clamp(0.0, 1.0)
}
