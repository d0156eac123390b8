use std::collections::{HashMap, HashSet};

use tracing::{debug, warn};

use common::store::ChunkStore;
use common::utils::text::{content_jaccard_similarity, extract_keywords};

use crate::pipeline::config::RetrievalTuning;
use crate::scoring::{clamp_unit, merge_by_chunk_id, sort_by_relevance_desc, ScoredChunk};

/// Score inherited by a retrieved chunk's parent.
const PARENT_INHERITANCE: f32 = 0.8;
/// Score inherited by a retrieved chunk's children.
const CHILD_INHERITANCE: f32 = 0.9;
/// Score inherited by semantically related chunks found via keyword search.
const SEMANTIC_INHERITANCE: f32 = 0.7;

/// Summary of what expansion added, for diagnostics.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExpansionOutcome {
    pub hierarchical_added: usize,
    pub semantic_added: usize,
}

/// Grows the candidate set with structural neighbors and semantically
/// related chunks. Expansion never removes or rescores existing candidates;
/// added chunks carry a discounted inherited score.
pub async fn expand_context(
    store: &dyn ChunkStore,
    query: &str,
    candidates: Vec<ScoredChunk>,
    tuning: &RetrievalTuning,
) -> (Vec<ScoredChunk>, ExpansionOutcome) {
    let mut present: HashSet<String> = candidates.iter().map(|c| c.chunk.id.clone()).collect();
    let mut merged: HashMap<String, ScoredChunk> = candidates
        .into_iter()
        .map(|c| (c.chunk.id.clone(), c))
        .collect();
    let seeds: Vec<ScoredChunk> = merged.values().cloned().collect();
    let mut outcome = ExpansionOutcome::default();

    hierarchical_expansion(store, &seeds, &mut merged, &mut present, &mut outcome).await;
    semantic_expansion(store, query, &seeds, &mut merged, &mut present, tuning, &mut outcome).await;

    let mut expanded: Vec<ScoredChunk> = merged.into_values().collect();
    sort_by_relevance_desc(&mut expanded);
    debug!(
        hierarchical = outcome.hierarchical_added,
        semantic = outcome.semantic_added,
        total = expanded.len(),
        "context expansion complete"
    );
    (expanded, outcome)
}

/// Pulls each seed's parent and children by id. A fetch failure skips that
/// seed and leaves the rest of the expansion intact.
async fn hierarchical_expansion(
    store: &dyn ChunkStore,
    seeds: &[ScoredChunk],
    merged: &mut HashMap<String, ScoredChunk>,
    present: &mut HashSet<String>,
    outcome: &mut ExpansionOutcome,
) {
    for seed in seeds {
        let mut wanted: Vec<(String, f32)> = Vec::new();
        if let Some(parent_id) = &seed.chunk.parent_chunk_id {
            wanted.push((parent_id.clone(), PARENT_INHERITANCE));
        }
        for child_id in &seed.chunk.child_chunk_ids {
            wanted.push((child_id.clone(), CHILD_INHERITANCE));
        }

        let missing: Vec<String> = wanted
            .iter()
            .filter(|(id, _)| !present.contains(id))
            .map(|(id, _)| id.clone())
            .collect();
        if missing.is_empty() {
            continue;
        }

        let fetched = match store.fetch_by_ids(&missing).await {
            Ok(fetched) => fetched,
            Err(err) => {
                warn!(seed_id = %seed.chunk.id, error = %err, "hierarchical expansion fetch failed; skipping seed");
                continue;
            }
        };

        for chunk in fetched {
            let factor = wanted
                .iter()
                .find(|(id, _)| *id == chunk.id)
                .map_or(CHILD_INHERITANCE, |(_, factor)| *factor);
            let inherited = clamp_unit(seed.relevance * factor);
            if present.insert(chunk.id.clone()) {
                outcome.hierarchical_added += 1;
                merge_by_chunk_id(
                    merged,
                    vec![ScoredChunk::new(chunk)
                        .with_relevance(inherited)
                        .tagged("expansion_hierarchical")],
                );
            }
        }
    }
}

/// Keyword search seeded from the query plus top-seed content, filtered by
/// lexical similarity to the seed and capped globally.
async fn semantic_expansion(
    store: &dyn ChunkStore,
    query: &str,
    seeds: &[ScoredChunk],
    merged: &mut HashMap<String, ScoredChunk>,
    present: &mut HashSet<String>,
    tuning: &RetrievalTuning,
    outcome: &mut ExpansionOutcome,
) {
    for seed in seeds {
        if outcome.semantic_added >= tuning.semantic_expansion_cap {
            break;
        }

        let mut probe = extract_keywords(query);
        probe.extend(extract_keywords(&seed.chunk.content).into_iter().take(5));
        probe.sort_unstable();
        probe.dedup();
        if probe.is_empty() {
            continue;
        }
        let probe_text = probe.join(" ");

        let rows = match store
            .lexical_search(&probe_text, tuning.semantic_expansion_per_seed * 3)
            .await
        {
            Ok(rows) => rows,
            Err(err) => {
                warn!(seed_id = %seed.chunk.id, error = %err, "semantic expansion search failed; skipping seed");
                continue;
            }
        };

        let inherited = clamp_unit(seed.relevance * SEMANTIC_INHERITANCE);
        let mut added_for_seed = 0;
        for row in rows {
            if added_for_seed >= tuning.semantic_expansion_per_seed
                || outcome.semantic_added >= tuning.semantic_expansion_cap
            {
                break;
            }
            if present.contains(&row.chunk.id) {
                continue;
            }
            let similarity = content_jaccard_similarity(&seed.chunk.content, &row.chunk.content);
            if similarity <= tuning.semantic_similarity_floor {
                continue;
            }
            present.insert(row.chunk.id.clone());
            added_for_seed += 1;
            outcome.semantic_added += 1;
            merge_by_chunk_id(
                merged,
                vec![ScoredChunk::new(row.chunk)
                    .with_relevance(inherited)
                    .tagged("expansion_semantic")],
            );
        }
    }
}
