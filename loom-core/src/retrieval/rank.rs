//! Retrieval ranking: fusing keyword triggers with the lexical and
//! semantic scorers into one ordered entry list.

use super::{bm25, keywords, semantic};
use crate::world::LorebookEntry;
use std::collections::HashMap;

/// Relative weights for combining the two rankers.
///
/// A configuration knob of the prompt-building side, not of the rankers
/// themselves; both score maps are normalized independently before the
/// weighted sum.
#[derive(Debug, Clone, Copy)]
pub struct RetrievalWeights {
    pub lexical: f32,
    pub semantic: f32,
}

impl Default for RetrievalWeights {
    fn default() -> Self {
        Self {
            lexical: 0.6,
            semantic: 0.4,
        }
    }
}

/// An entry selected for injection, with its final score.
#[derive(Debug, Clone)]
pub struct RankedEntry<'a> {
    pub entry: &'a LorebookEntry,
    pub score: f32,
    /// Whether a keyword trigger fired (as opposed to scoring alone).
    pub triggered: bool,
}

/// Keyword-triggered entries sort ahead of merely well-scoring ones.
const TRIGGER_BONUS: f32 = 1.0;

/// Rank lorebook entries against the retrieval query.
///
/// `query` is the scan text (latest input plus a short history window).
/// `semantic_scores` holds pre-computed cosine similarities per entry
/// id; pass `None` when semantic retrieval is disabled or degraded.
///
/// An entry is a candidate only when a keyword trigger fires or its
/// opted-in semantic similarity is positive; BM25 refines the order of
/// candidates rather than admitting entries on shared stopwords alone.
/// `constant` entries are excluded here — the prompt builder admits
/// them unconditionally ahead of scored entries.
pub fn rank_entries<'a>(
    entries: &'a [LorebookEntry],
    query: &str,
    semantic_scores: Option<&HashMap<String, f32>>,
    weights: RetrievalWeights,
) -> Vec<RankedEntry<'a>> {
    let scorable: Vec<&LorebookEntry> = entries.iter().filter(|e| !e.constant).collect();
    if scorable.is_empty() || query.trim().is_empty() {
        return Vec::new();
    }

    let docs: Vec<bm25::ScoredDoc<'_>> = scorable
        .iter()
        .map(|entry| bm25::ScoredDoc {
            id: entry.id.as_str(),
            text: entry.text.as_str(),
        })
        .collect();
    let lexical = bm25::normalize(&bm25::score(query, &docs));
    let semantic = semantic_scores
        .map(|scores| bm25::normalize(scores))
        .unwrap_or_default();

    let mut ranked = Vec::new();
    for entry in scorable {
        let triggered = entry
            .keywords
            .iter()
            .any(|keyword| keywords::matches(query, keyword, entry.whole_word, entry.use_fuzzy));

        let semantic_component = if entry.use_semantic {
            semantic.get(&entry.id).copied().unwrap_or(0.0)
        } else {
            0.0
        };

        if !triggered && semantic_component <= 0.0 {
            continue;
        }

        let mut score = weights.lexical * lexical.get(&entry.id).copied().unwrap_or(0.0)
            + weights.semantic * semantic_component;
        if triggered {
            score += TRIGGER_BONUS;
        }

        ranked.push(RankedEntry {
            entry,
            score,
            triggered,
        });
    }

    // Highest score first; authored order breaks ties deterministically.
    ranked.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.entry.order.cmp(&b.entry.order))
            .then(a.entry.id.cmp(&b.entry.id))
    });

    ranked
}

/// Compute cosine similarities between a query vector and each entry's
/// vector.
///
/// Entries without a vector are skipped; negative similarities clamp to
/// zero so they cannot subtract from the lexical score.
pub fn semantic_scores(
    query_vector: &[f32],
    entry_vectors: &HashMap<String, Vec<f32>>,
) -> HashMap<String, f32> {
    entry_vectors
        .iter()
        .map(|(id, vector)| {
            let similarity = semantic::cosine_similarity(query_vector, vector).max(0.0);
            (id.clone(), similarity)
        })
        .filter(|(_, similarity)| *similarity > 0.0)
        .collect()
}
