pub mod enhanced;

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use common::conversation::ConversationContext;
use common::utils::text::{lexical_overlap_score, tokenize};

use crate::analysis::QueryAnalysis;
use crate::pipeline::config::RetrievalTuning;
use crate::scoring::{clamp_unit, sort_by_relevance_desc, ScoredChunk};

use enhanced::enhanced_score;

/// Closed set of reranking models. All of them start from the composite
/// enhanced score and differ in what they blend on top of it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RerankModel {
    #[default]
    SimilarityBased,
    RelevanceBased,
    ContextAware,
    /// Reserved for per-user preference signals; currently behaves exactly
    /// like `SimilarityBased`.
    UserPreference,
}

impl fmt::Display for RerankModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RerankModel::SimilarityBased => "similarity_based",
            RerankModel::RelevanceBased => "relevance_based",
            RerankModel::ContextAware => "context_aware",
            RerankModel::UserPreference => "user_preference",
        };
        f.write_str(label)
    }
}

impl std::str::FromStr for RerankModel {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "similarity_based" | "similarity" => Ok(Self::SimilarityBased),
            "relevance_based" | "relevance" => Ok(Self::RelevanceBased),
            "context_aware" | "contextual" => Ok(Self::ContextAware),
            "user_preference" => Ok(Self::UserPreference),
            other => Err(format!("unknown reranking model '{other}'")),
        }
    }
}

impl RerankModel {
    /// Rescores every candidate in place and re-sorts by the new relevance,
    /// descending. Ties break on chunk id so the ordering is deterministic.
    pub fn rerank(
        self,
        candidates: &mut Vec<ScoredChunk>,
        analysis: &QueryAnalysis,
        query: &str,
        context: &ConversationContext,
        tuning: &RetrievalTuning,
    ) {
        let weights = tuning.score_weights.unwrap_or_default();
        let query_terms = tokenize(query);

        for candidate in candidates.iter_mut() {
            let base = enhanced_score(candidate, analysis, query, context, weights);
            let rescored = match self {
                RerankModel::SimilarityBased | RerankModel::UserPreference => base,
                RerankModel::RelevanceBased => {
                    let overlap = lexical_overlap_score(&query_terms, &candidate.chunk.content);
                    0.8f32.mul_add(base, 0.2 * overlap)
                }
                RerankModel::ContextAware => {
                    let affinity = context_affinity(candidate, context);
                    0.8f32.mul_add(base, 0.2 * affinity)
                }
            };
            candidate.update_relevance(clamp_unit(rescored));
        }

        sort_by_relevance_desc(candidates);
        debug!(model = %self, candidates = candidates.len(), "reranking complete");
    }
}

/// How strongly a chunk ties back to the ongoing conversation: topic term
/// overlap, current-topic mention, and membership in a previously relevant
/// section.
fn context_affinity(candidate: &ScoredChunk, context: &ConversationContext) -> f32 {
    let mut affinity: f32 = 0.0;
    let content_lower = candidate.chunk.content.to_ascii_lowercase();

    for topic in &context.recent_topics {
        if content_lower.contains(&topic.to_ascii_lowercase()) {
            affinity += 0.1;
        }
    }

    if let Some(current) = &context.current_topic {
        if content_lower.contains(&current.to_ascii_lowercase()) {
            affinity += 0.15;
        }
    }

    if let Some(path) = &candidate.chunk.hierarchy_path {
        if context.relevant_sections.iter().any(|s| s == path) {
            affinity += 0.1;
        }
    }

    // 0.35 is the maximum attainable sum with one recent topic.
    clamp_unit(affinity / 0.35)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{QueryClassifier, RegexQueryClassifier};
    use common::chunk::{Chunk, ContentType};

    fn candidate(id: &str, content: &str, relevance: f32) -> ScoredChunk {
        let mut chunk = Chunk::new("source".into(), 0, content.into())
            .with_content_type(ContentType::Text)
            .with_quality(0.7);
        chunk.id = id.to_string();
        ScoredChunk::new(chunk).with_relevance(relevance)
    }

    fn analysis(query: &str) -> QueryAnalysis {
        RegexQueryClassifier::default().analyze(query, &ConversationContext::default())
    }

    #[test]
    fn test_rerank_output_is_sorted_desc() {
        let query = "fund reporting overview";
        let analysis = analysis(query);
        let mut candidates = vec![
            candidate("a", "fund reporting overview and schedules", 0.3),
            candidate("b", "unrelated text about printers", 0.9),
            candidate("c", "fund reporting details", 0.6),
        ];

        RerankModel::RelevanceBased.rerank(
            &mut candidates,
            &analysis,
            query,
            &ConversationContext::default(),
            &RetrievalTuning::default(),
        );

        for pair in candidates.windows(2) {
            assert!(pair[0].relevance >= pair[1].relevance);
        }
    }

    #[test]
    fn test_relevance_based_rewards_term_overlap() {
        let query = "quarterly compliance report";
        let analysis = analysis(query);
        let mut candidates = vec![
            candidate("on_topic", "the quarterly compliance report is issued each period", 0.5),
            candidate("off_topic", "office seating arrangements and desk booking", 0.5),
        ];

        RerankModel::RelevanceBased.rerank(
            &mut candidates,
            &analysis,
            query,
            &ConversationContext::default(),
            &RetrievalTuning::default(),
        );

        assert_eq!(candidates[0].chunk.id, "on_topic");
    }

    #[test]
    fn test_context_aware_rewards_topic_mentions() {
        let query = "next steps";
        let analysis = analysis(query);
        let context = ConversationContext {
            current_topic: Some("onboarding".to_string()),
            ..ConversationContext::default()
        };
        let mut candidates = vec![
            candidate("topical", "onboarding continues with document checks", 0.5),
            candidate("generic", "general ledger postings are nightly", 0.5),
        ];

        RerankModel::ContextAware.rerank(
            &mut candidates,
            &analysis,
            query,
            &context,
            &RetrievalTuning::default(),
        );

        assert_eq!(candidates[0].chunk.id, "topical");
    }

    #[test]
    fn test_user_preference_matches_similarity_based() {
        let query = "what is a custody account";
        let analysis = analysis(query);
        let make = || {
            vec![
                candidate("a", "a custody account holds client assets", 0.4),
                candidate("b", "cafeteria menu for the week", 0.8),
            ]
        };

        let mut similarity = make();
        RerankModel::SimilarityBased.rerank(
            &mut similarity,
            &analysis,
            query,
            &ConversationContext::default(),
            &RetrievalTuning::default(),
        );

        let mut preference = make();
        RerankModel::UserPreference.rerank(
            &mut preference,
            &analysis,
            query,
            &ConversationContext::default(),
            &RetrievalTuning::default(),
        );

        let sim_ids: Vec<&str> = similarity.iter().map(|c| c.chunk.id.as_str()).collect();
        let pref_ids: Vec<&str> = preference.iter().map(|c| c.chunk.id.as_str()).collect();
        assert_eq!(sim_ids, pref_ids);
    }

    #[test]
    fn test_unknown_model_name_is_an_error() {
        assert!("cross_encoder".parse::<RerankModel>().is_err());
        assert_eq!(
            "context_aware".parse::<RerankModel>().ok(),
            Some(RerankModel::ContextAware)
        );
    }
}
