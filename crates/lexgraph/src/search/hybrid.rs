//! Reciprocal Rank Fusion over the vector and graph result lists.
//!
//! Formula: rrf_score(item) = Σ 1/(k + rank_i) for each list containing the
//! item. Items are keyed by normalised content, so a chunk surfaced by both
//! legs receives the sum of both reciprocal terms, which is the reason RRF
//! is used here instead of score blending.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetrievalSource {
    Vector,
    Graph,
}

/// Single retrieval result with combined scores.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalResult {
    pub contract_id: String,
    pub content: String,
    pub source: RetrievalSource,
    pub vector_score: Option<f32>,
    pub graph_relevance: Option<f32>,
    pub rrf_score: f64,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// Content key for deduplication: case-folded with runs of whitespace
/// collapsed.
fn content_key(content: &str) -> String {
    content
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Re-rank merged results with RRF and deduplicate on content.
///
/// Vector results rank by descending `vector_score`, graph results by
/// descending `graph_relevance`. A result present in both lists is collapsed
/// into one record carrying both scores and the sum of both reciprocal
/// terms. Ties break deterministically: vector before graph, then
/// `contract_id`, then content.
pub fn rrf_rerank(results: Vec<RetrievalResult>, k: usize) -> Vec<RetrievalResult> {
    let rank_of = |scored: Vec<(&RetrievalResult, f32)>| -> HashMap<String, usize> {
        let mut scored = scored;
        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.content.cmp(&b.0.content))
        });
        scored
            .into_iter()
            .enumerate()
            .map(|(i, (result, _))| (content_key(&result.content), i + 1))
            .collect()
    };

    let vector_ranks = rank_of(
        results
            .iter()
            .filter_map(|r| r.vector_score.map(|s| (r, s)))
            .collect(),
    );
    let graph_ranks = rank_of(
        results
            .iter()
            .filter_map(|r| r.graph_relevance.map(|s| (r, s)))
            .collect(),
    );

    // Collapse duplicates: the vector-sourced record wins and absorbs the
    // graph record's relevance.
    let mut merged: HashMap<String, RetrievalResult> = HashMap::new();
    for result in results {
        let key = content_key(&result.content);
        match merged.get_mut(&key) {
            None => {
                merged.insert(key, result);
            }
            Some(existing) => {
                if existing.vector_score.is_none() {
                    if let Some(score) = result.vector_score {
                        existing.vector_score = Some(score);
                        existing.source = RetrievalSource::Vector;
                    }
                }
                if existing.graph_relevance.is_none() {
                    existing.graph_relevance = result.graph_relevance;
                }
            }
        }
    }

    let mut ranked: Vec<RetrievalResult> = merged
        .into_iter()
        .map(|(key, mut result)| {
            let mut rrf = 0.0;
            if let Some(rank) = vector_ranks.get(&key) {
                rrf += 1.0 / (k + rank) as f64;
            }
            if let Some(rank) = graph_ranks.get(&key) {
                rrf += 1.0 / (k + rank) as f64;
            }
            result.rrf_score = rrf;
            result
        })
        .collect();

    ranked.sort_by(|a, b| {
        b.rrf_score
            .partial_cmp(&a.rrf_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| {
                let source_order = |s: RetrievalSource| match s {
                    RetrievalSource::Vector => 0u8,
                    RetrievalSource::Graph => 1u8,
                };
                source_order(a.source).cmp(&source_order(b.source))
            })
            .then_with(|| a.contract_id.cmp(&b.contract_id))
            .then_with(|| a.content.cmp(&b.content))
    });

    if let Some(top) = ranked.first() {
        tracing::debug!(
            result_count = ranked.len(),
            top_score = top.rrf_score,
            rrf_k = k,
            "rrf rerank complete"
        );
    }
    ranked
}
