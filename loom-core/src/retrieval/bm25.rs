//! BM25 lexical ranking over lorebook entry texts.

use std::collections::HashMap;

const K1: f32 = 1.2;
const B: f32 = 0.75;

/// A document to be scored: an entry id and its searchable text.
#[derive(Debug, Clone)]
pub struct ScoredDoc<'a> {
    pub id: &'a str,
    pub text: &'a str,
}

/// Score `query` against `documents` with BM25.
///
/// Documents with a zero score are omitted from the result. An empty
/// query or empty corpus yields an empty map, never an error.
pub fn score(query: &str, documents: &[ScoredDoc<'_>]) -> HashMap<String, f32> {
    let query_terms = tokenize(query);
    if query_terms.is_empty() || documents.is_empty() {
        return HashMap::new();
    }

    let tokenized: Vec<(&str, Vec<String>)> = documents
        .iter()
        .map(|doc| (doc.id, tokenize(doc.text)))
        .collect();

    let corpus_size = tokenized.len() as f32;
    let average_length = tokenized
        .iter()
        .map(|(_, tokens)| tokens.len() as f32)
        .sum::<f32>()
        / corpus_size;

    // Document frequency per query term across the corpus.
    let mut document_frequency: HashMap<&str, usize> = HashMap::new();
    for term in &query_terms {
        let df = tokenized
            .iter()
            .filter(|(_, tokens)| tokens.iter().any(|t| t == term))
            .count();
        document_frequency.insert(term.as_str(), df);
    }

    let mut scores = HashMap::new();
    for (id, tokens) in &tokenized {
        let doc_length = tokens.len() as f32;
        let mut total = 0.0;

        for term in &query_terms {
            let tf = tokens.iter().filter(|t| *t == term).count() as f32;
            if tf == 0.0 {
                continue;
            }

            let df = document_frequency[term.as_str()] as f32;
            let idf = ((corpus_size - df + 0.5) / (df + 0.5) + 1.0).ln();

            let length_norm = if average_length > 0.0 {
                doc_length / average_length
            } else {
                1.0
            };
            let saturation = (tf * (K1 + 1.0)) / (tf + K1 * (1.0 - B + B * length_norm));

            total += idf * saturation;
        }

        if total > 0.0 {
            scores.insert((*id).to_string(), total);
        }
    }

    scores
}

/// Scale scores into [0, 1] by dividing by the maximum.
///
/// A no-op on an empty map or an all-zero maximum. Normalized maps from
/// independent rankers can be combined linearly.
pub fn normalize(scores: &HashMap<String, f32>) -> HashMap<String, f32> {
    let max = scores.values().cloned().fold(0.0_f32, f32::max);
    if max <= 0.0 {
        return scores.clone();
    }
    scores.iter().map(|(id, s)| (id.clone(), s / max)).collect()
}

/// Lower-case, strip non-word characters to spaces, split on
/// whitespace, drop single-character tokens.
fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .filter(|token| token.chars().count() > 1)
        .map(str::to_string)
        .collect()
}
