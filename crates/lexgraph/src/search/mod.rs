//! Hybrid retrieval: dense vector search fused with graph-expanded context.
//!
//! The vector leg finds relevant chunks; the graph leg expands every
//! contract those chunks belong to into connected entities. Both streams
//! merge under RRF. The vector leg is load-bearing and its failure fails
//! the call; a graph failure only degrades that contract to vector-only.

pub mod hybrid;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use crate::error::{CoreError, CoreResult};
use crate::graph::context::{ContextOptions, GraphContext, GraphContextRetriever};
use crate::llm::Embedder;
use crate::types::Deadline;
use crate::vector::VectorIndex;

pub use hybrid::{rrf_rerank, RetrievalResult, RetrievalSource};

// Graph context relevance by entity type. Risk factors rank highest for
// typical legal queries; plain metadata sits just below.
const RELEVANCE_METADATA: f32 = 0.8;
const RELEVANCE_COMPANY: f32 = 0.7;
const RELEVANCE_CLAUSE: f32 = 0.6;
const RELEVANCE_RISK: f32 = 0.9;

// Rough estimate: 1 token ~ 4 characters of English text.
const CHARS_PER_TOKEN: usize = 4;

/// Knobs for one retrieval call.
#[derive(Debug, Clone)]
pub struct RetrieveOptions {
    /// Restrict to one contract; `None` searches the whole corpus.
    pub contract_id: Option<String>,
    pub n_vector: usize,
    pub n_graph: usize,
    pub include_companies: bool,
    pub include_risks: bool,
}

impl Default for RetrieveOptions {
    fn default() -> Self {
        Self {
            contract_id: None,
            n_vector: 5,
            n_graph: 3,
            include_companies: true,
            include_risks: true,
        }
    }
}

/// Combined retrieval response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HybridResponse {
    pub results: Vec<RetrievalResult>,
    pub vector_count: usize,
    pub graph_count: usize,
    pub estimated_tokens: usize,
}

/// Fuses vector search with graph traversal.
pub struct HybridRetriever {
    vector: Arc<dyn VectorIndex>,
    embedder: Arc<dyn Embedder>,
    graph: Arc<GraphContextRetriever>,
    rrf_k: usize,
}

impl HybridRetriever {
    pub fn new(
        vector: Arc<dyn VectorIndex>,
        embedder: Arc<dyn Embedder>,
        graph: Arc<GraphContextRetriever>,
        rrf_k: usize,
    ) -> Self {
        Self {
            vector,
            embedder,
            graph,
            rrf_k,
        }
    }

    pub async fn retrieve(
        &self,
        query: &str,
        options: RetrieveOptions,
        deadline: Deadline,
    ) -> CoreResult<HybridResponse> {
        if query.trim().is_empty() {
            return Err(CoreError::invalid_input("query must not be empty"));
        }
        if deadline.expired() {
            return Err(CoreError::timeout("deadline expired before retrieval"));
        }

        // Vector leg. Failure here is fatal for the call.
        let embeddings = self.embedder.embed(&[query.to_string()]).await?;
        let query_embedding = embeddings
            .into_iter()
            .next()
            .ok_or_else(|| CoreError::integrity("embedder returned no vector for query"))?;
        let hits = self
            .vector
            .search(
                &query_embedding,
                options.n_vector,
                options.contract_id.as_deref(),
            )
            .await?;
        let vector_count = hits.len();

        // Contracts surfaced by the vector leg, in stable order.
        let contract_ids: BTreeSet<String> =
            hits.iter().map(|hit| hit.contract_id.clone()).collect();

        // Graph leg, fanned out across contracts. Any single contract's
        // failure degrades that contract to vector-only.
        let fetches = contract_ids.iter().map(|contract_id| {
            let graph = self.graph.clone();
            let context_options = ContextOptions {
                include_companies: options.include_companies,
                include_clauses: true,
                include_risks: options.include_risks,
                max_clauses: options.n_graph,
            };
            async move {
                match graph.context_for_contract(contract_id, context_options).await {
                    Ok(context) => context,
                    Err(err) => {
                        tracing::error!(
                            contract_id = %contract_id,
                            error = %err,
                            "graph context fetch failed, degrading to vector-only"
                        );
                        None
                    }
                }
            }
        });
        let contexts: Vec<GraphContext> = join_all(fetches).await.into_iter().flatten().collect();

        let mut results: Vec<RetrievalResult> = hits
            .iter()
            .map(|hit| RetrievalResult {
                contract_id: hit.contract_id.clone(),
                content: hit.text.clone(),
                source: RetrievalSource::Vector,
                vector_score: Some(hit.relevance_score()),
                graph_relevance: None,
                rrf_score: 0.0,
                metadata: hit.metadata.clone(),
            })
            .collect();
        let mut graph_count = 0;
        for context in &contexts {
            let items = context_items(context, &options);
            graph_count += items.len();
            results.extend(items);
        }

        let ranked = rrf_rerank(results, self.rrf_k);
        let total_chars: usize = ranked.iter().map(|r| r.content.len()).sum();

        tracing::info!(
            vector_count,
            graph_count,
            result_count = ranked.len(),
            "hybrid retrieval complete"
        );

        Ok(HybridResponse {
            estimated_tokens: total_chars.div_ceil(CHARS_PER_TOKEN),
            results: ranked,
            vector_count,
            graph_count,
        })
    }
}

/// Flatten one contract's graph context into scored retrieval results.
fn context_items(context: &GraphContext, options: &RetrieveOptions) -> Vec<RetrievalResult> {
    let mut items = Vec::new();
    let item = |content: String, item_type: &str, relevance: f32| RetrievalResult {
        contract_id: context.contract_id.clone(),
        content,
        source: RetrievalSource::Graph,
        vector_score: None,
        graph_relevance: Some(relevance),
        rrf_score: 0.0,
        metadata: HashMap::from([("type".to_string(), item_type.to_string())]),
    };

    let mut metadata_parts = Vec::new();
    if let Some(level) = context.contract.risk_level {
        metadata_parts.push(format!("Risk Level: {}", level.as_str()));
    }
    if let Some(score) = context.contract.risk_score {
        metadata_parts.push(format!("Risk Score: {score}"));
    }
    if let Some(amount) = &context.contract.payment_amount {
        metadata_parts.push(format!("Payment Amount: {amount}"));
    }
    if let Some(frequency) = &context.contract.payment_frequency {
        metadata_parts.push(format!("Payment Frequency: {frequency}"));
    }
    if !metadata_parts.is_empty() {
        items.push(item(
            format!("Contract Metadata: {}", metadata_parts.join(", ")),
            "metadata",
            RELEVANCE_METADATA,
        ));
    }

    for company in context.companies.iter().take(options.n_graph) {
        items.push(item(
            format!("Party: {} (Role: {})", company.name, company.role),
            "company",
            RELEVANCE_COMPANY,
        ));
    }

    for clause in context.clauses.iter().take(options.n_graph) {
        items.push(item(
            format!("Clause - {}: {}", clause.section_name, clause.content),
            "clause",
            RELEVANCE_CLAUSE,
        ));
    }

    for risk in context.risks.iter().take(options.n_graph) {
        let mut content = format!("Risk ({}): {}", risk.risk_level.as_str(), risk.concern);
        if let Some(recommendation) = &risk.recommendation {
            content.push_str(&format!(" - Recommendation: {recommendation}"));
        }
        items.push(item(content, "risk", RELEVANCE_RISK));
    }

    items
}
