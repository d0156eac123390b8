use serde::Serialize;

/// Optional per-request diagnostics, populated only when the caller asks
/// for them. Serialized into response metadata for inspection tooling.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PipelineDiagnostics {
    pub analysis: Option<AnalysisStats>,
    pub retrieval: Option<RetrievalStats>,
    pub expansion: Option<ExpansionStats>,
    pub quality: Option<QualityStats>,
    pub rerank: Option<RerankStats>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnalysisStats {
    pub query_type: String,
    pub complexity: String,
    pub intent_count: usize,
    pub keyword_count: usize,
    pub entity_count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct RetrievalStats {
    pub strategy: String,
    pub candidates: usize,
    pub fallback_applied: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExpansionStats {
    pub hierarchical_added: usize,
    pub semantic_added: usize,
    pub total_after: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct QualityStats {
    pub redundant_dropped: usize,
    pub complementarity_applied: bool,
    pub kept: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct RerankStats {
    pub model: String,
    pub candidates: usize,
}
