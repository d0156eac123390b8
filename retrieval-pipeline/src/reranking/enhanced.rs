use serde::{Deserialize, Serialize};

use common::chunk::{Chunk, ContentType};
use common::conversation::ConversationContext;

use crate::analysis::{QueryAnalysis, QueryType};
use crate::scoring::{clamp_unit, ScoredChunk};

/// Hard ceiling applied to tables of contents on procedure queries. A ToC
/// that names the right section must never outrank the section itself.
const TOC_PROCEDURE_CAP: f32 = 0.1;

/// Weight table for the composite enhanced score. Weights sum to 1.0.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ScoreWeights {
    #[serde(default = "default_vector_weight")]
    pub vector: f32,
    #[serde(default = "default_content_type_weight")]
    pub content_type: f32,
    #[serde(default = "default_instructional_weight")]
    pub instructional: f32,
    #[serde(default = "default_quality_weight")]
    pub quality: f32,
    #[serde(default = "default_contextual_weight")]
    pub contextual: f32,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            vector: default_vector_weight(),
            content_type: default_content_type_weight(),
            instructional: default_instructional_weight(),
            quality: default_quality_weight(),
            contextual: default_contextual_weight(),
        }
    }
}

const fn default_vector_weight() -> f32 {
    0.4
}

const fn default_content_type_weight() -> f32 {
    0.25
}

const fn default_instructional_weight() -> f32 {
    0.2
}

const fn default_quality_weight() -> f32 {
    0.1
}

const fn default_contextual_weight() -> f32 {
    0.05
}

/// Computes the composite enhanced score for one candidate.
///
/// Every feature lands in [0,1] before weighting, so the composite is also
/// in [0,1] and comparable across candidates and queries.
pub fn enhanced_score(
    scored: &ScoredChunk,
    analysis: &QueryAnalysis,
    query: &str,
    context: &ConversationContext,
    weights: ScoreWeights,
) -> f32 {
    let chunk = &scored.chunk;

    let vector = scored.relevance;
    let content_type = content_type_score(chunk.content_type, analysis.query_type);
    let instructional = instructional_score(chunk, analysis, query);
    let quality = quality_boost(chunk);
    let contextual = contextual_score(chunk, context);

    let composite = vector * weights.vector
        + content_type * weights.content_type
        + instructional * weights.instructional
        + quality * weights.quality
        + contextual * weights.contextual;
    let composite = clamp_unit(composite);

    if analysis.query_type == QueryType::Procedure && chunk.content_type.is_table_of_contents() {
        composite.min(TOC_PROCEDURE_CAP)
    } else {
        composite
    }
}

/// Content-type affinity for the query intent, as a [0,1] score. Neutral
/// pairings sit at 0.5; the modifier tables push matches up and navigational
/// or mismatched content down.
fn content_type_score(content_type: ContentType, query_type: QueryType) -> f32 {
    let modifier = match query_type {
        QueryType::Procedure => match content_type {
            ContentType::Instruction | ContentType::Procedure => 2.5,
            ContentType::Example => 1.2,
            ContentType::Definition => 0.8,
            ContentType::TableOfContents | ContentType::Heading => 0.1,
            ContentType::Text => 0.7,
            _ => 1.0,
        },
        QueryType::Definition => match content_type {
            ContentType::Definition => 1.4,
            ContentType::Summary => 1.2,
            ContentType::TableOfContents | ContentType::Heading => 0.3,
            _ => 1.0,
        },
        QueryType::List => match content_type {
            ContentType::List | ContentType::Table => 1.4,
            ContentType::Instruction => 1.2,
            ContentType::TableOfContents => 0.6,
            _ => 1.0,
        },
        QueryType::Example => match content_type {
            ContentType::Example => 1.6,
            ContentType::TableOfContents | ContentType::Heading => 0.4,
            _ => 1.0,
        },
        QueryType::Comparison => match content_type {
            ContentType::Table => 1.4,
            ContentType::TableOfContents | ContentType::Heading => 0.4,
            _ => 1.0,
        },
        QueryType::Troubleshooting => match content_type {
            ContentType::Instruction | ContentType::Procedure => 1.4,
            ContentType::TableOfContents | ContentType::Heading => 0.4,
            _ => 1.0,
        },
        QueryType::General => match content_type {
            ContentType::TableOfContents | ContentType::Heading => 0.5,
            _ => 1.0,
        },
    };
    clamp_unit(0.5 * modifier)
}

/// How instructional the chunk is, scaled up on procedure queries and for
/// step-dense content.
fn instructional_score(chunk: &Chunk, analysis: &QueryAnalysis, query: &str) -> f32 {
    let base = match chunk.content_type {
        ContentType::Instruction | ContentType::Procedure => 0.9,
        ContentType::Example => 0.6,
        ContentType::List => 0.5,
        ContentType::Text | ContentType::Definition | ContentType::Summary => 0.4,
        ContentType::Table => 0.3,
        ContentType::TableOfContents | ContentType::Heading => 0.1,
    };

    let intent_factor = if analysis.query_type == QueryType::Procedure {
        match chunk.content_type {
            ContentType::Instruction | ContentType::Procedure => 1.5,
            ContentType::TableOfContents | ContentType::Heading => 0.2,
            _ => 1.0,
        }
    } else {
        1.0
    };

    let steps = count_steps(&chunk.content);
    let step_factor = 1.0 + (steps.min(10) as f32) * 0.03;

    let detail_factor = if analysis.wants_detail(query) && steps > 0 {
        1.3
    } else {
        1.0
    };

    clamp_unit(base * intent_factor * step_factor * detail_factor)
}

fn count_steps(content: &str) -> usize {
    let lower = content.to_ascii_lowercase();
    lower.matches("step ").count()
        + content
            .lines()
            .filter(|line| {
                let trimmed = line.trim_start();
                trimmed
                    .chars()
                    .next()
                    .is_some_and(|c| c.is_ascii_digit())
                    && trimmed.contains('.')
            })
            .count()
}

/// Intrinsic quality: the ingestion-time score nudged by length, step
/// density, and action-word density.
fn quality_boost(chunk: &Chunk) -> f32 {
    let mut score = chunk.quality_score;

    let chars = chunk.character_count;
    if (500..=3000).contains(&chars) {
        score += 0.1;
    } else if chars < 100 {
        score -= 0.1;
    }

    if count_steps(&chunk.content) >= 2 {
        score += 0.05;
    }

    let lower = chunk.content.to_ascii_lowercase();
    let action_words = ["click", "select", "enter", "open", "navigate", "create", "choose", "configure"];
    let words = lower.split_whitespace().count().max(1);
    let actions: usize = action_words.iter().map(|w| lower.matches(w).count()).sum();
    if actions as f32 / words as f32 > 0.02 {
        score += 0.05;
    }

    clamp_unit(score)
}

/// Freshness and authority signals independent of the query.
fn contextual_score(chunk: &Chunk, _context: &ConversationContext) -> f32 {
    let mut score: f32 = 0.5;

    let age = chunk.age_days(chrono::Utc::now());
    if age < 30 {
        score += 0.2;
    } else if age < 90 {
        score += 0.1;
    }

    // The source title carries the authority signal; the heading can too.
    let mut title = chunk.source_id.to_ascii_lowercase();
    if let Some(heading) = &chunk.heading {
        title.push(' ');
        title.push_str(&heading.to_ascii_lowercase());
    }
    let authoritative = ["guide", "manual", "handbook", "official", "policy"];
    if authoritative.iter().any(|word| title.contains(word)) {
        score += 0.2;
    }

    clamp_unit(score)
}
