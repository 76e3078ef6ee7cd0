//! Retrieve-then-generate Q&A over one contract or the whole corpus.
//!
//! Hybrid retrieval supplies the context; generation runs on the SIMPLE
//! tier with a system instruction that confines the model to that context
//! and makes it cite `[Source N]` markers. Q&A is deliberately routed to
//! the cheapest tier.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::config::RetrievalConfig;
use crate::cost::{CostEntry, CostLedger};
use crate::error::{CoreResult, ErrorKind};
use crate::llm::{GenerateOptions, ModelRouter, TaskComplexity};
use crate::search::{HybridRetriever, RetrievalSource, RetrieveOptions};
use crate::types::Deadline;

/// Returned instead of a generated answer when retrieval comes back empty.
pub const NO_CONTEXT_ANSWER: &str = "No relevant context was found.";

const QA_SYSTEM_INSTRUCTION: &str = "You are a legal contract analyst. Answer strictly from the \
supplied context; do not use outside knowledge. If the context does not contain the answer, say \
\"I cannot find this information in the provided context\". Cite source numbers [Source N] when \
referencing specific information. Be concise but thorough.";

/// One context item the answer may cite.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceRef {
    /// 1-based, matching the `[Source N]` markers in the prompt.
    pub index: usize,
    pub source_type: RetrievalSource,
    pub contract_id: String,
    pub score: f64,
    /// First 100 characters of the content.
    pub preview: String,
}

/// Structured Q&A outcome. Generation failures surface here as an empty
/// answer with `error_kind` set rather than as an error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerResult {
    pub text: String,
    pub sources: Vec<SourceRef>,
    pub vector_count: usize,
    pub graph_count: usize,
    pub cost: f64,
    pub error_kind: Option<ErrorKind>,
}

pub struct QueryPipeline {
    retriever: Arc<HybridRetriever>,
    router: Arc<ModelRouter>,
    ledger: Arc<CostLedger>,
    retrieval: RetrievalConfig,
}

impl QueryPipeline {
    pub fn new(
        retriever: Arc<HybridRetriever>,
        router: Arc<ModelRouter>,
        ledger: Arc<CostLedger>,
        retrieval: RetrievalConfig,
    ) -> Self {
        Self {
            retriever,
            router,
            ledger,
            retrieval,
        }
    }

    /// Answer a question, optionally scoped to one contract.
    ///
    /// Retrieval failures surface as errors; generation failures are folded
    /// into the result with `error_kind` set and cost 0.
    pub async fn answer(
        &self,
        query: &str,
        contract_id: Option<&str>,
        n_results: usize,
        deadline: Deadline,
    ) -> CoreResult<AnswerResult> {
        let retrieval = self
            .retriever
            .retrieve(
                query,
                RetrieveOptions {
                    contract_id: contract_id.map(str::to_string),
                    n_vector: n_results,
                    n_graph: self.retrieval.n_graph,
                    include_companies: self.retrieval.include_companies,
                    include_risks: self.retrieval.include_risks,
                },
                deadline,
            )
            .await?;

        if retrieval.results.is_empty() {
            tracing::warn!(query = %truncate_for_log(query), "no retrieval context");
            return Ok(AnswerResult {
                text: NO_CONTEXT_ANSWER.to_string(),
                sources: Vec::new(),
                vector_count: retrieval.vector_count,
                graph_count: retrieval.graph_count,
                cost: 0.0,
                error_kind: None,
            });
        }

        let top = &retrieval.results[..retrieval.results.len().min(n_results)];
        let sources: Vec<SourceRef> = top
            .iter()
            .enumerate()
            .map(|(i, result)| SourceRef {
                index: i + 1,
                source_type: result.source,
                contract_id: result.contract_id.clone(),
                score: result.rrf_score,
                preview: preview_of(&result.content),
            })
            .collect();

        let context_text = top
            .iter()
            .enumerate()
            .map(|(i, result)| {
                let source_type = match result.source {
                    RetrievalSource::Vector => "Document",
                    RetrievalSource::Graph => "Knowledge Graph",
                };
                format!("[Source {} - {}]\n{}\n", i + 1, source_type, result.content)
            })
            .collect::<Vec<_>>()
            .join("\n");
        let prompt = format!("CONTEXT:\n{context_text}\nQUESTION: {query}\n\nANSWER:");

        let generation = self
            .router
            .generate(
                &prompt,
                TaskComplexity::Simple,
                GenerateOptions {
                    system_instruction: Some(QA_SYSTEM_INSTRUCTION.to_string()),
                    ..Default::default()
                },
                deadline,
            )
            .await;

        match generation {
            Ok(result) => {
                let mut entry = CostEntry::now(
                    result.model.clone(),
                    "query",
                    result.input_tokens,
                    result.output_tokens,
                    result.thinking_tokens,
                    result.cost,
                );
                if let Some(contract_id) = contract_id {
                    entry = entry.with_contract(contract_id);
                }
                // Ledger trouble never fails an otherwise good answer.
                if let Err(err) = self.ledger.record(&entry).await {
                    tracing::error!(error = %err, "query cost not recorded");
                }

                tracing::info!(
                    contract_id = contract_id.unwrap_or("<corpus>"),
                    cost = result.cost,
                    sources = sources.len(),
                    "qa complete"
                );
                Ok(AnswerResult {
                    text: result.text,
                    sources,
                    vector_count: retrieval.vector_count,
                    graph_count: retrieval.graph_count,
                    cost: result.cost,
                    error_kind: None,
                })
            }
            Err(err) => {
                tracing::error!(
                    kind = err.kind.as_str(),
                    error = %err,
                    "qa generation failed"
                );
                Ok(AnswerResult {
                    text: String::new(),
                    sources,
                    vector_count: retrieval.vector_count,
                    graph_count: retrieval.graph_count,
                    cost: 0.0,
                    error_kind: Some(err.kind),
                })
            }
        }
    }
}

fn preview_of(content: &str) -> String {
    if content.chars().count() > 100 {
        let cut: String = content.chars().take(100).collect();
        format!("{cut}...")
    } else {
        content.to_string()
    }
}

fn truncate_for_log(text: &str) -> String {
    text.chars().take(50).collect()
}
