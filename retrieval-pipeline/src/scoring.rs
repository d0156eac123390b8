use std::{cmp::Ordering, collections::HashMap};

use serde::{Deserialize, Serialize};

use common::chunk::Chunk;

/// Holds optional subscores gathered from different retrieval signals.
#[derive(Debug, Clone, Copy, Default)]
pub struct Scores {
    pub vector: Option<f32>,
    pub lexical: Option<f32>,
}

/// A candidate chunk with its accumulated retrieval scores.
///
/// `relevance` is the fused score in [0,1], higher is better, regardless of
/// the backend's distance metric. `found_by` records every strategy that
/// independently surfaced the chunk; the multi-feature strategy turns that
/// into a consensus bonus.
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub scores: Scores,
    pub relevance: f32,
    pub found_by: Vec<String>,
    pub coherence: Option<f32>,
}

impl ScoredChunk {
    pub fn new(chunk: Chunk) -> Self {
        Self {
            chunk,
            scores: Scores::default(),
            relevance: 0.0,
            found_by: Vec::new(),
            coherence: None,
        }
    }

    pub fn with_vector_score(mut self, score: f32) -> Self {
        self.scores.vector = Some(score);
        self.relevance = clamp_unit(score);
        self
    }

    pub fn with_lexical_score(mut self, score: f32) -> Self {
        self.scores.lexical = Some(score);
        self
    }

    pub fn with_relevance(mut self, relevance: f32) -> Self {
        self.relevance = clamp_unit(relevance);
        self
    }

    pub fn tagged(mut self, strategy: impl Into<String>) -> Self {
        let label = strategy.into();
        if !self.found_by.contains(&label) {
            self.found_by.push(label);
        }
        self
    }

    pub fn update_relevance(&mut self, relevance: f32) {
        self.relevance = clamp_unit(relevance);
    }
}

/// Weights used for linear vector/lexical score fusion in hybrid retrieval.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FusionWeights {
    pub vector: f32,
    pub lexical: f32,
}

impl Default for FusionWeights {
    fn default() -> Self {
        // Tuned weights; vector similarity dominates, lexical rank complements.
        Self {
            vector: 0.7,
            lexical: 0.3,
        }
    }
}

pub fn clamp_unit(value: f32) -> f32 {
    value.clamp(0.0, 1.0)
}

/// Converts a raw distance into a [0,1] similarity, higher is better.
pub fn distance_to_similarity(distance: f32) -> f32 {
    if !distance.is_finite() {
        return 0.0;
    }
    clamp_unit(1.0 / (1.0 + distance.max(0.0)))
}

pub fn min_max_normalize(scores: &[f32]) -> Vec<f32> {
    if scores.is_empty() {
        return Vec::new();
    }

    let mut min = f32::MAX;
    let mut max = f32::MIN;

    for s in scores {
        if !s.is_finite() {
            continue;
        }
        if *s < min {
            min = *s;
        }
        if *s > max {
            max = *s;
        }
    }

    if !min.is_finite() || !max.is_finite() {
        return scores.iter().map(|_| 0.0).collect();
    }

    if (max - min).abs() < f32::EPSILON {
        return vec![1.0; scores.len()];
    }

    scores
        .iter()
        .map(|score| {
            if score.is_finite() {
                clamp_unit((score - min) / (max - min))
            } else {
                0.0
            }
        })
        .collect()
}

pub fn fuse_scores(scores: &Scores, weights: FusionWeights) -> f32 {
    let vector = scores.vector.unwrap_or(0.0);
    let lexical = scores.lexical.unwrap_or(0.0);
    clamp_unit(vector.mul_add(weights.vector, lexical * weights.lexical))
}

/// Merges incoming candidates into the working set, deduplicating by chunk
/// id. Subscores are kept at their maximum and strategy tags are unioned, so
/// a chunk found by several strategies appears exactly once.
pub fn merge_by_chunk_id(target: &mut HashMap<String, ScoredChunk>, incoming: Vec<ScoredChunk>) {
    for scored in incoming {
        let id = scored.chunk.id.clone();
        match target.entry(id) {
            std::collections::hash_map::Entry::Occupied(mut entry) => {
                let existing = entry.get_mut();
                if let Some(score) = scored.scores.vector {
                    let prior = existing.scores.vector.unwrap_or(f32::MIN);
                    if score > prior {
                        existing.scores.vector = Some(score);
                    }
                }
                if let Some(score) = scored.scores.lexical {
                    let prior = existing.scores.lexical.unwrap_or(f32::MIN);
                    if score > prior {
                        existing.scores.lexical = Some(score);
                    }
                }
                if scored.relevance > existing.relevance {
                    existing.relevance = scored.relevance;
                }
                for tag in scored.found_by {
                    if !existing.found_by.contains(&tag) {
                        existing.found_by.push(tag);
                    }
                }
            }
            std::collections::hash_map::Entry::Vacant(entry) => {
                entry.insert(scored);
            }
        }
    }
}

pub fn sort_by_relevance_desc(items: &mut [ScoredChunk]) {
    items.sort_by(|a, b| {
        b.relevance
            .partial_cmp(&a.relevance)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.chunk.id.cmp(&b.chunk.id))
    });
}
