use tracing::debug;

use common::utils::text::{content_jaccard_similarity, lexical_overlap_score, tokenize};

use crate::pipeline::config::RetrievalTuning;
use crate::scoring::{clamp_unit, ScoredChunk};

/// Weight of pairwise dissimilarity within the complementarity matrix.
const COMP_DISSIMILARITY_WEIGHT: f32 = 0.4;
/// Weight of source diversity within the complementarity matrix.
const COMP_SOURCE_WEIGHT: f32 = 0.2;
/// Weight of scale diversity within the complementarity matrix.
const COMP_SCALE_WEIGHT: f32 = 0.2;
/// Weight of topical distinctness within the complementarity matrix.
const COMP_TOPIC_WEIGHT: f32 = 0.2;
/// Greedy selection blends average complementarity with relevance.
const GREEDY_COMPLEMENTARITY_WEIGHT: f32 = 0.7;
const GREEDY_RELEVANCE_WEIGHT: f32 = 0.3;

/// Summary of the quality pass, for diagnostics.
#[derive(Debug, Clone, Copy, Default)]
pub struct QualityOutcome {
    pub redundant_dropped: usize,
    pub complementarity_applied: bool,
}

/// Runs the quality pass in order: coherence annotation, redundancy
/// reduction, then complementarity selection. Input order is preserved for
/// survivors; the pass never reorders, only drops.
pub fn optimize_quality(
    query: &str,
    candidates: Vec<ScoredChunk>,
    tuning: &RetrievalTuning,
) -> (Vec<ScoredChunk>, QualityOutcome) {
    let mut outcome = QualityOutcome::default();

    let mut candidates = attach_coherence(query, candidates);
    let before = candidates.len();
    candidates = reduce_redundancy(candidates, tuning.diversity_threshold);
    outcome.redundant_dropped = before - candidates.len();

    if candidates.len() > tuning.complementarity_bypass_at {
        candidates = maximize_complementarity(candidates, tuning.complementarity_max_selected);
        outcome.complementarity_applied = true;
    }

    debug!(
        dropped = outcome.redundant_dropped,
        complementarity = outcome.complementarity_applied,
        kept = candidates.len(),
        "quality optimization complete"
    );
    (candidates, outcome)
}

/// Annotates each candidate with its keyword overlap against the query.
/// Coherence is advisory; it feeds diagnostics and never changes relevance.
fn attach_coherence(query: &str, mut candidates: Vec<ScoredChunk>) -> Vec<ScoredChunk> {
    let query_terms = tokenize(query);
    for candidate in &mut candidates {
        let overlap = lexical_overlap_score(&query_terms, &candidate.chunk.content);
        candidate.coherence = Some(clamp_unit(overlap));
    }
    candidates
}

/// Drops candidates whose content is near-identical to an already kept one.
/// The earlier candidate always survives, so ranking decides who stays.
fn reduce_redundancy(candidates: Vec<ScoredChunk>, diversity_threshold: f32) -> Vec<ScoredChunk> {
    let mut kept: Vec<ScoredChunk> = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        let redundant = kept.iter().any(|existing| {
            content_jaccard_similarity(&existing.chunk.content, &candidate.chunk.content)
                > diversity_threshold
        });
        if !redundant {
            kept.push(candidate);
        }
    }
    kept
}

/// Greedy selection of a subset that covers complementary material: start
/// from the most relevant candidate, then repeatedly add the candidate with
/// the best blend of average complementarity to the selection and own
/// relevance. Survivors keep their input order.
fn maximize_complementarity(candidates: Vec<ScoredChunk>, max_selected: usize) -> Vec<ScoredChunk> {
    let n = candidates.len();
    let matrix = complementarity_matrix(&candidates);

    let mut best_start = 0;
    for (index, candidate) in candidates.iter().enumerate() {
        if candidate.relevance > candidates[best_start].relevance {
            best_start = index;
        }
    }

    let mut selected = vec![best_start];
    while selected.len() < max_selected.min(n) {
        let mut best: Option<(usize, f32)> = None;
        for index in 0..n {
            if selected.contains(&index) {
                continue;
            }
            let avg_complementarity = selected
                .iter()
                .map(|&s| matrix[index][s])
                .sum::<f32>()
                / selected.len() as f32;
            let score = GREEDY_COMPLEMENTARITY_WEIGHT * avg_complementarity
                + GREEDY_RELEVANCE_WEIGHT * candidates[index].relevance;
            if best.is_none_or(|(_, best_score)| score > best_score) {
                best = Some((index, score));
            }
        }
        match best {
            Some((index, _)) => selected.push(index),
            None => break,
        }
    }

    selected.sort_unstable();
    candidates
        .into_iter()
        .enumerate()
        .filter(|(index, _)| selected.contains(index))
        .map(|(_, candidate)| candidate)
        .collect()
}

/// Pairwise complementarity: dissimilar content, different sources,
/// different scales, and distinct topics all count toward the pair.
fn complementarity_matrix(candidates: &[ScoredChunk]) -> Vec<Vec<f32>> {
    let n = candidates.len();
    let mut matrix = vec![vec![0.0; n]; n];
    for i in 0..n {
        for j in (i + 1)..n {
            let a = &candidates[i];
            let b = &candidates[j];

            let dissimilarity =
                1.0 - content_jaccard_similarity(&a.chunk.content, &b.chunk.content);
            let source = if a.chunk.source_id == b.chunk.source_id {
                0.0
            } else {
                1.0
            };
            let scale = if a.chunk.scale == b.chunk.scale { 0.0 } else { 1.0 };
            let topic = topical_distinctness(a, b);

            let value = COMP_DISSIMILARITY_WEIGHT * dissimilarity
                + COMP_SOURCE_WEIGHT * source
                + COMP_SCALE_WEIGHT * scale
                + COMP_TOPIC_WEIGHT * topic;
            matrix[i][j] = value;
            matrix[j][i] = value;
        }
    }
    matrix
}

/// Distinctness of the headings and hierarchy paths two chunks sit under.
fn topical_distinctness(a: &ScoredChunk, b: &ScoredChunk) -> f32 {
    let topic_text = |scored: &ScoredChunk| {
        let mut text = String::new();
        if let Some(heading) = &scored.chunk.heading {
            text.push_str(heading);
            text.push(' ');
        }
        if let Some(path) = &scored.chunk.hierarchy_path {
            text.push_str(&path.replace('/', " "));
        }
        text
    };

    let text_a = topic_text(a);
    let text_b = topic_text(b);
    if text_a.trim().is_empty() || text_b.trim().is_empty() {
        return 0.5;
    }
    1.0 - content_jaccard_similarity(&text_a, &text_b)
}
