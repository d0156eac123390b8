use tracing::debug;

use crate::scoring::ScoredChunk;

/// Relevance boundaries for the high / medium / low tiers.
const HIGH_TIER_FLOOR: f32 = 0.8;
const MEDIUM_TIER_FLOOR: f32 = 0.6;

/// Reorders candidates so strong material is spread across the final prompt
/// rather than clustered at the top, where a long middle run gets ignored.
///
/// Two passes: a tier interleave emits one high, one medium, and one low
/// chunk per round until every tier drains, then a source round-robin breaks
/// up long runs from a single document.
pub fn mitigate_lost_in_middle(candidates: Vec<ScoredChunk>) -> Vec<ScoredChunk> {
    if candidates.len() <= 2 {
        return candidates;
    }

    let mut high = Vec::new();
    let mut medium = Vec::new();
    let mut low = Vec::new();
    for candidate in candidates {
        if candidate.relevance > HIGH_TIER_FLOOR {
            high.push(candidate);
        } else if candidate.relevance > MEDIUM_TIER_FLOOR {
            medium.push(candidate);
        } else {
            low.push(candidate);
        }
    }

    let interleaved = interleave_tiers(high, medium, low);
    let balanced = source_round_robin(interleaved);
    debug!(count = balanced.len(), "lost-in-middle mitigation applied");
    balanced
}

/// Cycles through the tiers taking one chunk from each per round, skipping
/// tiers that have drained. Within a tier the incoming relevance order is
/// kept.
fn interleave_tiers(
    high: Vec<ScoredChunk>,
    medium: Vec<ScoredChunk>,
    low: Vec<ScoredChunk>,
) -> Vec<ScoredChunk> {
    let mut ordered = Vec::with_capacity(high.len() + medium.len() + low.len());
    let mut high = high.into_iter();
    let mut medium = medium.into_iter();
    let mut low = low.into_iter();

    loop {
        let round = [high.next(), medium.next(), low.next()];
        if round.iter().all(Option::is_none) {
            break;
        }
        ordered.extend(round.into_iter().flatten());
    }
    ordered
}

/// Round-robins across source documents so no long run of chunks comes from
/// one document. Relative order within a source is preserved.
fn source_round_robin(candidates: Vec<ScoredChunk>) -> Vec<ScoredChunk> {
    let mut by_source: Vec<(String, std::collections::VecDeque<ScoredChunk>)> = Vec::new();
    for candidate in candidates {
        let source = candidate.chunk.source_id.clone();
        match by_source.iter_mut().find(|(id, _)| *id == source) {
            Some((_, queue)) => queue.push_back(candidate),
            None => {
                let mut queue = std::collections::VecDeque::new();
                queue.push_back(candidate);
                by_source.push((source, queue));
            }
        }
    }

    if by_source.len() <= 1 {
        return by_source
            .into_iter()
            .flat_map(|(_, queue)| queue)
            .collect();
    }

    let mut ordered = Vec::new();
    loop {
        let mut emitted = false;
        for (_, queue) in &mut by_source {
            if let Some(candidate) = queue.pop_front() {
                ordered.push(candidate);
                emitted = true;
            }
        }
        if !emitted {
            break;
        }
    }
    ordered
}
