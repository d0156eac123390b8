use serde::{Deserialize, Serialize};

use common::store::SimilarityMetric;

use crate::reranking::enhanced::ScoreWeights;

/// Tunable parameters that govern each retrieval stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalTuning {
    /// Candidates requested from each store search.
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Minimum vector similarity for hybrid candidate membership.
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f32,
    /// Final cap on chunks returned to the caller.
    #[serde(default = "default_max_retrieved_chunks")]
    pub max_retrieved_chunks: usize,
    #[serde(default = "default_true")]
    pub enable_reranking: bool,
    #[serde(default = "default_true")]
    pub enable_hybrid_search: bool,
    /// Redundancy cutoff: candidates above this lexical similarity to an
    /// already-kept chunk are dropped.
    #[serde(default = "default_diversity_threshold")]
    pub diversity_threshold: f32,
    #[serde(default)]
    pub similarity_metric: SimilarityMetric,
    /// Contextual strategy filter: drop chunks below this quality score.
    #[serde(default)]
    pub min_quality_score: Option<f32>,
    /// Contextual strategy filter: restrict to these source ids.
    #[serde(default)]
    pub source_filter: Option<Vec<String>>,
    #[serde(default = "default_max_sub_queries")]
    pub max_sub_queries: usize,
    #[serde(default = "default_hierarchy_seed_limit")]
    pub hierarchy_seed_limit: usize,
    #[serde(default = "default_siblings_per_seed")]
    pub siblings_per_seed: usize,
    #[serde(default = "default_semantic_expansion_per_seed")]
    pub semantic_expansion_per_seed: usize,
    /// Global cap on semantically expanded chunks per request.
    #[serde(default = "default_semantic_expansion_cap")]
    pub semantic_expansion_cap: usize,
    /// Minimum lexical similarity for a semantic-expansion candidate.
    #[serde(default = "default_semantic_similarity_floor")]
    pub semantic_similarity_floor: f32,
    #[serde(default = "default_complementarity_max_selected")]
    pub complementarity_max_selected: usize,
    /// Candidate sets at or below this size skip complementarity selection.
    #[serde(default = "default_complementarity_bypass_at")]
    pub complementarity_bypass_at: usize,
    /// Entity-matching terms for query analysis; None uses the built-in list.
    #[serde(default)]
    pub domain_terms: Option<Vec<String>>,
    /// Label used when multi-query rephrases an entity as "<entity> in <domain>".
    #[serde(default = "default_domain_label")]
    pub domain_label: String,
    /// Optional override of the enhanced scorer's weight table.
    #[serde(default)]
    pub score_weights: Option<ScoreWeights>,
}

impl Default for RetrievalTuning {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            similarity_threshold: default_similarity_threshold(),
            max_retrieved_chunks: default_max_retrieved_chunks(),
            enable_reranking: true,
            enable_hybrid_search: true,
            diversity_threshold: default_diversity_threshold(),
            similarity_metric: SimilarityMetric::default(),
            min_quality_score: None,
            source_filter: None,
            max_sub_queries: default_max_sub_queries(),
            hierarchy_seed_limit: default_hierarchy_seed_limit(),
            siblings_per_seed: default_siblings_per_seed(),
            semantic_expansion_per_seed: default_semantic_expansion_per_seed(),
            semantic_expansion_cap: default_semantic_expansion_cap(),
            semantic_similarity_floor: default_semantic_similarity_floor(),
            complementarity_max_selected: default_complementarity_max_selected(),
            complementarity_bypass_at: default_complementarity_bypass_at(),
            domain_terms: None,
            domain_label: default_domain_label(),
            score_weights: None,
        }
    }
}

/// Per-request wrapper: optional caller overrides plus stage tuning.
#[derive(Debug, Clone, Default)]
pub struct RetrievalConfig {
    /// Requested strategy name; unknown names fall back to hybrid with a
    /// warning rather than erroring.
    pub strategy: Option<String>,
    /// Requested reranking model name; unknown names fall back to
    /// similarity_based with a warning.
    pub rerank_model: Option<String>,
    pub tuning: RetrievalTuning,
}

impl RetrievalConfig {
    pub fn new(tuning: RetrievalTuning) -> Self {
        Self {
            strategy: None,
            rerank_model: None,
            tuning,
        }
    }

    pub fn with_strategy(strategy: impl Into<String>) -> Self {
        Self {
            strategy: Some(strategy.into()),
            rerank_model: None,
            tuning: RetrievalTuning::default(),
        }
    }
}

const fn default_top_k() -> usize {
    10
}

const fn default_similarity_threshold() -> f32 {
    0.35
}

const fn default_max_retrieved_chunks() -> usize {
    8
}

const fn default_true() -> bool {
    true
}

const fn default_diversity_threshold() -> f32 {
    0.9
}

const fn default_max_sub_queries() -> usize {
    4
}

const fn default_hierarchy_seed_limit() -> usize {
    3
}

const fn default_siblings_per_seed() -> usize {
    5
}

const fn default_semantic_expansion_per_seed() -> usize {
    2
}

const fn default_semantic_expansion_cap() -> usize {
    10
}

const fn default_semantic_similarity_floor() -> f32 {
    0.2
}

const fn default_complementarity_max_selected() -> usize {
    5
}

const fn default_complementarity_bypass_at() -> usize {
    3
}

fn default_domain_label() -> String {
    "the documentation".to_string()
}
