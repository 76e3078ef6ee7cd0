//! Contract analysis pipeline.
//!
//! Fixed stage order: parse, analyze_risk, persist_vectors, persist_graph,
//! then an optional answer stage when the caller supplied a question. Each
//! stage runs behind a failure barrier: its error becomes an entry in the
//! run's error list and later stages still execute, because a partial
//! analysis (say, risk without a graph write) is still worth returning.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use crate::config::{ChunkingConfig, PipelineConfig};
use crate::cost::{CostEntry, CostLedger};
use crate::error::CoreError;
use crate::graph::writer::{clauses_from_concerns, risks_from_concerns, ContractGraphStore};
use crate::graph::{CompanyNode, ContractNode};
use crate::llm::{Embedder, GenerateOptions, ModelRouter, TaskComplexity};
use crate::processing::chunker::chunk_text;
use crate::processing::{DocumentMetadata, PdfParser};
use crate::types::{Deadline, ErrorEntry, RiskReport};
use crate::vector::{DocumentChunk, VectorIndex};
use crate::workflow::query::QueryPipeline;
use crate::workflow::StageOutcome;

const STAGE_PARSE: &str = "parse";
const STAGE_ANALYZE: &str = "analyze_risk";
const STAGE_VECTORS: &str = "persist_vectors";
const STAGE_GRAPH: &str = "persist_graph";
const STAGE_ANSWER: &str = "answer";

/// Mutable state threaded through the stages of one run.
#[derive(Debug, Default)]
pub struct ContractAnalysisState {
    pub contract_id: String,
    pub filename: String,
    pub query: Option<String>,
    pub parsed_text: Option<String>,
    /// Section name -> content, in document order.
    pub sections: Vec<(String, String)>,
    pub metadata: DocumentMetadata,
    pub risk: Option<RiskReport>,
    pub key_terms: HashMap<String, serde_json::Value>,
    pub vector_chunk_ids: BTreeSet<String>,
    pub graph_written: bool,
    pub answer: Option<String>,
    pub total_cost: f64,
    pub errors: Vec<ErrorEntry>,
}

impl ContractAnalysisState {
    fn text(&self) -> &str {
        self.parsed_text.as_deref().unwrap_or("")
    }
}

/// Serialisable outcome of a run. The run itself never errors; partial
/// results carry their failures in `errors`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub contract_id: String,
    pub filename: String,
    pub risk: Option<RiskReport>,
    pub key_terms: HashMap<String, serde_json::Value>,
    pub vector_chunk_ids: Vec<String>,
    pub graph_written: bool,
    pub answer: Option<String>,
    pub total_cost: f64,
    pub errors: Vec<ErrorEntry>,
}

pub struct AnalysisPipeline {
    parser: Arc<dyn PdfParser>,
    router: Arc<ModelRouter>,
    embedder: Arc<dyn Embedder>,
    vector: Arc<dyn VectorIndex>,
    graph: Arc<ContractGraphStore>,
    query_pipeline: Arc<QueryPipeline>,
    ledger: Arc<CostLedger>,
    chunking: ChunkingConfig,
    config: PipelineConfig,
}

impl AnalysisPipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        parser: Arc<dyn PdfParser>,
        router: Arc<ModelRouter>,
        embedder: Arc<dyn Embedder>,
        vector: Arc<dyn VectorIndex>,
        graph: Arc<ContractGraphStore>,
        query_pipeline: Arc<QueryPipeline>,
        ledger: Arc<CostLedger>,
        chunking: ChunkingConfig,
        config: PipelineConfig,
    ) -> Self {
        Self {
            parser,
            router,
            embedder,
            vector,
            graph,
            query_pipeline,
            ledger,
            chunking,
            config,
        }
    }

    /// Run the full pipeline for one document. Never fails; every stage
    /// error is absorbed into the report.
    pub async fn run(
        &self,
        contract_id: &str,
        file_bytes: &[u8],
        filename: &str,
        query: Option<String>,
    ) -> AnalysisReport {
        let deadline = Deadline::after(Duration::from_secs(self.config.run_deadline_secs));
        let mut state = ContractAnalysisState {
            contract_id: contract_id.to_string(),
            filename: filename.to_string(),
            query,
            ..Default::default()
        };
        tracing::info!(contract_id, filename, "analysis started");

        let outcome = self.parse(&mut state, file_bytes, deadline).await;
        absorb(&mut state, STAGE_PARSE, outcome);

        let outcome = self.analyze_risk(&mut state, deadline).await;
        absorb(&mut state, STAGE_ANALYZE, outcome);

        let outcome = self.persist_vectors(&mut state, deadline).await;
        absorb(&mut state, STAGE_VECTORS, outcome);

        let outcome = self.persist_graph(&mut state, deadline).await;
        absorb(&mut state, STAGE_GRAPH, outcome);

        if state.query.as_deref().is_some_and(|q| !q.trim().is_empty()) {
            let outcome = self.answer(&mut state, deadline).await;
            absorb(&mut state, STAGE_ANSWER, outcome);
        }

        tracing::info!(
            contract_id,
            cost = state.total_cost,
            errors = state.errors.len(),
            "analysis finished"
        );

        AnalysisReport {
            contract_id: state.contract_id,
            filename: state.filename,
            risk: state.risk,
            key_terms: state.key_terms,
            vector_chunk_ids: state.vector_chunk_ids.into_iter().collect(),
            graph_written: state.graph_written,
            answer: state.answer,
            total_cost: state.total_cost,
            errors: state.errors,
        }
    }

    async fn parse(
        &self,
        state: &mut ContractAnalysisState,
        file_bytes: &[u8],
        deadline: Deadline,
    ) -> StageOutcome {
        if deadline.expired() {
            return StageOutcome::Failed(CoreError::timeout("run deadline exhausted"));
        }
        match self.parser.parse(file_bytes, &state.filename).await {
            Ok(document) => {
                tracing::info!(
                    contract_id = %state.contract_id,
                    chars = document.raw_text.len(),
                    sections = document.sections.len(),
                    "document parsed"
                );
                state.parsed_text = Some(document.raw_text);
                state.sections = document.sections;
                state.metadata = document.metadata;
                StageOutcome::Ok
            }
            Err(err) => {
                state.parsed_text = Some(String::new());
                StageOutcome::Failed(err)
            }
        }
    }

    async fn analyze_risk(
        &self,
        state: &mut ContractAnalysisState,
        deadline: Deadline,
    ) -> StageOutcome {
        if state.text().is_empty() {
            return StageOutcome::Skip("no parsed text to analyze".to_string());
        }
        if deadline.expired() {
            return StageOutcome::Failed(CoreError::timeout("run deadline exhausted"));
        }

        let prompt = risk_prompt(state.text(), self.config.max_prompt_chars);
        let result = match self
            .router
            .generate(
                &prompt,
                TaskComplexity::Balanced,
                GenerateOptions::default(),
                deadline,
            )
            .await
        {
            Ok(result) => result,
            Err(err) => return StageOutcome::Failed(err),
        };

        // The call happened; its cost counts even if the payload is junk.
        state.total_cost += result.cost;
        let entry = CostEntry::now(
            result.model.clone(),
            "analyze",
            result.input_tokens,
            result.output_tokens,
            result.thinking_tokens,
            result.cost,
        )
        .with_contract(state.contract_id.clone());
        if let Err(err) = self.ledger.record(&entry).await {
            tracing::error!(error = %err, "analysis cost not recorded");
        }

        let mut report: RiskReport = match extract_json_object(&result.text)
            .ok_or_else(|| CoreError::integrity("model returned no JSON object"))
            .and_then(|json| {
                serde_json::from_str(json)
                    .map_err(|e| CoreError::integrity(format!("risk JSON did not parse: {e}")))
            }) {
            Ok(report) => report,
            Err(err) => return StageOutcome::Failed(err),
        };
        report.normalize();

        tracing::info!(
            contract_id = %state.contract_id,
            risk_score = report.risk_score,
            risk_level = report.risk_level.as_str(),
            concerns = report.concerning_clauses.len(),
            "risk analysis complete"
        );
        state.key_terms = report.key_terms.clone();
        state.risk = Some(report);
        StageOutcome::Ok
    }

    async fn persist_vectors(
        &self,
        state: &mut ContractAnalysisState,
        deadline: Deadline,
    ) -> StageOutcome {
        if state.text().is_empty() {
            return StageOutcome::Skip("no parsed text to index".to_string());
        }
        if deadline.expired() {
            return StageOutcome::Failed(CoreError::timeout("run deadline exhausted"));
        }

        // Parsers that found no section structure still yield one indexable
        // body section.
        let sections: Vec<(String, String)> = if state.sections.is_empty() {
            vec![("document".to_string(), state.text().to_string())]
        } else {
            state.sections.clone()
        };

        let mut texts = Vec::new();
        let mut pending: Vec<(String, String, usize)> = Vec::new();
        for (section_name, content) in &sections {
            for (i, chunk) in
                chunk_text(content, self.chunking.chunk_size, self.chunking.chunk_overlap)
                    .into_iter()
                    .enumerate()
            {
                pending.push((section_name.clone(), chunk.clone(), i));
                texts.push(chunk);
            }
        }
        if pending.is_empty() {
            return StageOutcome::Skip("document produced no chunks".to_string());
        }

        let embeddings = match self.embedder.embed(&texts).await {
            Ok(embeddings) => embeddings,
            Err(err) => return StageOutcome::Failed(err),
        };
        if embeddings.len() != pending.len() {
            return StageOutcome::Failed(CoreError::integrity(format!(
                "embedder returned {} vectors for {} chunks",
                embeddings.len(),
                pending.len()
            )));
        }

        let risk_level = state
            .risk
            .as_ref()
            .map(|r| r.risk_level.as_str().to_string())
            .unwrap_or_else(|| "unknown".to_string());
        let chunks: Vec<DocumentChunk> = pending
            .into_iter()
            .zip(embeddings)
            .map(|((section_name, text, chunk_index), embedding)| DocumentChunk {
                chunk_id: format!("{}:{}:{}", state.contract_id, section_name, chunk_index),
                contract_id: state.contract_id.clone(),
                section_name,
                chunk_index,
                text,
                embedding,
                metadata: HashMap::from([
                    ("filename".to_string(), state.filename.clone()),
                    ("risk_level".to_string(), risk_level.clone()),
                ]),
            })
            .collect();
        let chunk_ids: BTreeSet<String> = chunks.iter().map(|c| c.chunk_id.clone()).collect();

        if let Err(err) = self.vector.upsert(chunks).await {
            return StageOutcome::Failed(err);
        }
        tracing::info!(
            contract_id = %state.contract_id,
            chunks = chunk_ids.len(),
            "vectors persisted"
        );
        state.vector_chunk_ids = chunk_ids;
        StageOutcome::Ok
    }

    async fn persist_graph(
        &self,
        state: &mut ContractAnalysisState,
        deadline: Deadline,
    ) -> StageOutcome {
        if deadline.expired() {
            return StageOutcome::Failed(CoreError::timeout("run deadline exhausted"));
        }

        let key_term = |name: &str| -> Option<String> {
            state.key_terms.get(name).map(|value| match value {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            })
        };
        let contract = ContractNode {
            contract_id: state.contract_id.clone(),
            filename: state.filename.clone(),
            upload_date: chrono::Utc::now(),
            risk_score: state.risk.as_ref().map(|r| r.risk_score),
            risk_level: state.risk.as_ref().map(|r| r.risk_level),
            payment_amount: key_term("payment_amount"),
            payment_frequency: key_term("payment_frequency"),
            has_termination_clause: state
                .key_terms
                .get("termination_clause")
                .and_then(serde_json::Value::as_bool),
            liability_cap: key_term("liability_cap"),
        };

        let companies: Vec<CompanyNode> = if state.metadata.parties.is_empty() {
            // The parser found no parties; keep the placeholder pair so the
            // graph stays traversable by role.
            vec![
                CompanyNode {
                    name: "Unknown Party A".to_string(),
                    role: "party_a".to_string(),
                },
                CompanyNode {
                    name: "Unknown Party B".to_string(),
                    role: "party_b".to_string(),
                },
            ]
        } else {
            state
                .metadata
                .parties
                .iter()
                .map(|party| CompanyNode {
                    name: party.name.clone(),
                    role: party.role.clone(),
                })
                .collect()
        };

        let concerns = state
            .risk
            .as_ref()
            .map(|r| r.concerning_clauses.as_slice())
            .unwrap_or_default();
        let clauses = clauses_from_concerns(&state.contract_id, concerns);
        let risks = risks_from_concerns(concerns);

        match self
            .graph
            .store_contract(&contract, &companies, &clauses, &risks)
            .await
        {
            Ok(()) => {
                state.graph_written = true;
                StageOutcome::Ok
            }
            Err(err) => StageOutcome::Failed(err),
        }
    }

    async fn answer(&self, state: &mut ContractAnalysisState, deadline: Deadline) -> StageOutcome {
        let query = state.query.clone().unwrap_or_default();
        match self
            .query_pipeline
            .answer(
                &query,
                Some(&state.contract_id),
                self.config.answer_sources,
                deadline,
            )
            .await
        {
            Ok(result) => {
                state.total_cost += result.cost;
                if let Some(kind) = result.error_kind {
                    return StageOutcome::Failed(CoreError::new(
                        kind,
                        "answer generation failed",
                    ));
                }
                state.answer = Some(result.text);
                StageOutcome::Ok
            }
            Err(err) => StageOutcome::Failed(err),
        }
    }
}

fn absorb(state: &mut ContractAnalysisState, stage: &str, outcome: StageOutcome) {
    match outcome {
        StageOutcome::Ok => {}
        StageOutcome::Skip(reason) => {
            tracing::info!(stage, reason = %reason, "stage skipped");
            state.errors.push(ErrorEntry::skip(stage, reason));
        }
        StageOutcome::Failed(err) => {
            tracing::error!(stage, kind = err.kind.as_str(), error = %err, "stage failed");
            state
                .errors
                .push(ErrorEntry::failure(stage, err.kind, err.message));
        }
    }
}

fn risk_prompt(text: &str, max_chars: usize) -> String {
    format!(
        r#"Analyze this legal contract for risk factors.

CONTRACT TEXT:
{}

Provide analysis in JSON format:
{{
    "risk_score": <0-10>,
    "risk_level": "low|medium|high",
    "concerning_clauses": [
        {{
            "section": "section name",
            "concern": "description",
            "risk_level": "low|medium|high",
            "recommendation": "suggestion"
        }}
    ],
    "key_terms": {{
        "payment_amount": "amount",
        "payment_frequency": "frequency",
        "termination_clause": true/false,
        "liability_cap": "amount or unlimited"
    }}
}}"#,
        truncate_chars(text, max_chars)
    )
}

fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_index, _)) => &text[..byte_index],
        None => text,
    }
}

/// Pull the JSON object out of a model response, tolerating markdown fences
/// and stray prose around the braces.
fn extract_json_object(raw: &str) -> Option<&str> {
    let cleaned = raw
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();
    match (cleaned.find('{'), cleaned.rfind('}')) {
        (Some(start), Some(end)) if end > start => Some(&cleaned[start..=end]),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{LedgerConfig, RetrievalConfig, RouterConfig};
    use crate::cost::store::MemoryCounterStore;
    use crate::error::{CoreResult, ErrorKind};
    use crate::graph::context::GraphContextRetriever;
    use crate::graph::{GraphClient, GraphStatement, GraphValue, QueryResult};
    use crate::llm::{ModelProvider, ProviderRequest, ProviderResponse};
    use crate::processing::{ContractParty, ParsedDocument};
    use crate::search::HybridRetriever;
    use crate::types::RiskLevel;
    use crate::vector::{MemoryVectorIndex, VectorHit};
    use async_trait::async_trait;
    use chrono::Utc;
    use parking_lot::Mutex;

    const RISK_JSON: &str = r#"{
        "risk_score": 8,
        "risk_level": "high",
        "concerning_clauses": [
            {
                "section": "Liability",
                "concern": "uncapped indemnification",
                "risk_level": "high",
                "recommendation": "negotiate a liability cap"
            }
        ],
        "key_terms": {
            "payment_amount": "$10,000",
            "payment_frequency": "monthly",
            "termination_clause": true,
            "liability_cap": "unlimited"
        }
    }"#;

    struct StubParser {
        fail: bool,
    }

    #[async_trait]
    impl PdfParser for StubParser {
        async fn parse(&self, _bytes: &[u8], _filename: &str) -> CoreResult<ParsedDocument> {
            if self.fail {
                return Err(CoreError::invalid_input("not a PDF"));
            }
            Ok(ParsedDocument {
                raw_text: "Liability. The supplier shall indemnify without cap. \
                           Payment. Fees are $10,000 monthly."
                    .to_string(),
                sections: vec![
                    (
                        "Liability".to_string(),
                        "The supplier shall indemnify without cap.".to_string(),
                    ),
                    (
                        "Payment".to_string(),
                        "Fees are $10,000 monthly.".to_string(),
                    ),
                ],
                tables: Vec::new(),
                metadata: DocumentMetadata {
                    parties: vec![
                        ContractParty {
                            name: "Acme Corp".to_string(),
                            role: "party_a".to_string(),
                        },
                        ContractParty {
                            name: "Globex LLC".to_string(),
                            role: "party_b".to_string(),
                        },
                    ],
                    effective_date: None,
                    contract_type: Some("services".to_string()),
                },
            })
        }
    }

    struct JsonProvider {
        body: String,
    }

    #[async_trait]
    impl ModelProvider for JsonProvider {
        async fn generate(
            &self,
            _model: &str,
            _prompt: &str,
            _request: &ProviderRequest,
        ) -> CoreResult<ProviderResponse> {
            Ok(ProviderResponse {
                text: self.body.clone(),
                input_tokens: 1200,
                output_tokens: 300,
                thinking_tokens: 0,
            })
        }
    }

    struct UnitEmbedder;

    #[async_trait]
    impl Embedder for UnitEmbedder {
        async fn embed(&self, texts: &[String]) -> CoreResult<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
        }
    }

    struct OkGraphClient {
        batches: Mutex<Vec<Vec<GraphStatement>>>,
    }

    impl OkGraphClient {
        fn new() -> Self {
            Self {
                batches: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl GraphClient for OkGraphClient {
        async fn query(
            &self,
            _cypher: &str,
            _params: HashMap<String, GraphValue>,
        ) -> CoreResult<QueryResult> {
            Ok(QueryResult::default())
        }
        async fn run_batch(&self, statements: Vec<GraphStatement>) -> CoreResult<()> {
            self.batches.lock().push(statements);
            Ok(())
        }
    }

    struct FailingVectorIndex;

    #[async_trait]
    impl VectorIndex for FailingVectorIndex {
        async fn upsert(&self, _chunks: Vec<DocumentChunk>) -> CoreResult<()> {
            Err(CoreError::transient("vector store unavailable"))
        }
        async fn search(
            &self,
            _query_embedding: &[f32],
            _n: usize,
            _contract_id: Option<&str>,
        ) -> CoreResult<Vec<VectorHit>> {
            Ok(Vec::new())
        }
        async fn delete_contract(&self, _contract_id: &str) -> CoreResult<usize> {
            Ok(0)
        }
    }

    struct Fixture {
        pipeline: AnalysisPipeline,
        vector: Arc<MemoryVectorIndex>,
        graph_client: Arc<OkGraphClient>,
        ledger: Arc<CostLedger>,
    }

    fn fixture_with(parser_fails: bool, provider_body: &str, failing_vectors: bool) -> Fixture {
        let vector = Arc::new(MemoryVectorIndex::new());
        let vector_dyn: Arc<dyn VectorIndex> = if failing_vectors {
            Arc::new(FailingVectorIndex)
        } else {
            vector.clone()
        };
        let graph_client = Arc::new(OkGraphClient::new());
        let embedder: Arc<dyn Embedder> = Arc::new(UnitEmbedder);
        let router = Arc::new(ModelRouter::new(
            Arc::new(JsonProvider {
                body: provider_body.to_string(),
            }),
            RouterConfig {
                max_retries: 0,
                backoff_base_ms: 1,
                backoff_cap_ms: 2,
                default_timeout_secs: 5,
                max_timeout_secs: 10,
                breaker_fail_max: 5,
                breaker_reset_secs: 60,
            },
        ));
        let ledger = Arc::new(CostLedger::new(
            Arc::new(MemoryCounterStore::new()),
            LedgerConfig {
                raw_retention_days: 7,
                aggregate_retention_days: 30,
                fail_silently: true,
            },
        ));
        let graph = Arc::new(ContractGraphStore::new(graph_client.clone()));
        let retriever = Arc::new(HybridRetriever::new(
            vector_dyn.clone(),
            embedder.clone(),
            Arc::new(GraphContextRetriever::new(graph_client.clone())),
            60,
        ));
        let query_pipeline = Arc::new(QueryPipeline::new(
            retriever,
            router.clone(),
            ledger.clone(),
            RetrievalConfig {
                n_graph: 3,
                rrf_k: 60,
                include_companies: true,
                include_risks: true,
            },
        ));
        let pipeline = AnalysisPipeline::new(
            Arc::new(StubParser { fail: parser_fails }),
            router,
            embedder,
            vector_dyn,
            graph,
            query_pipeline,
            ledger.clone(),
            ChunkingConfig {
                chunk_size: 1000,
                chunk_overlap: 200,
            },
            PipelineConfig {
                run_deadline_secs: 300,
                max_prompt_chars: 50_000,
                answer_sources: 5,
            },
        );
        Fixture {
            pipeline,
            vector,
            graph_client,
            ledger,
        }
    }

    #[tokio::test]
    async fn full_run_populates_every_output_field() {
        let fixture = fixture_with(false, RISK_JSON, false);
        let report = fixture
            .pipeline
            .run("c-1", b"%PDF-1.7", "msa.pdf", None)
            .await;

        assert!(report.errors.is_empty(), "errors: {:?}", report.errors);
        let risk = report.risk.as_ref().unwrap();
        assert_eq!(risk.risk_score, 8);
        assert_eq!(risk.risk_level, RiskLevel::High);
        assert_eq!(risk.concerning_clauses.len(), 1);
        assert_eq!(report.key_terms["payment_frequency"], "monthly");
        assert!(!report.vector_chunk_ids.is_empty());
        assert!(report.graph_written);
        assert!(report.total_cost > 0.0);
        assert!(report.answer.is_none());

        // Chunks landed in the index under section-scoped ids.
        assert_eq!(fixture.vector.len(), report.vector_chunk_ids.len());
        assert!(report.vector_chunk_ids[0].starts_with("c-1:"));

        // One atomic graph batch: contract + 2 parties + 1 clause + 1 risk.
        let batches = fixture.graph_client.batches.lock();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 5);

        // Ledger saw the analyze call.
        drop(batches);
        let daily = fixture.ledger.daily(Utc::now().date_naive()).await.unwrap();
        assert_eq!(daily.by_operation["analyze"].calls, 1);
    }

    #[tokio::test]
    async fn vector_failure_is_partial_not_fatal() {
        let fixture = fixture_with(false, RISK_JSON, true);
        let report = fixture
            .pipeline
            .run("c-2", b"%PDF-1.7", "msa.pdf", None)
            .await;

        assert!(report.risk.is_some());
        assert!(report.vector_chunk_ids.is_empty());
        assert!(report.graph_written);
        assert!(report.total_cost > 0.0);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].stage, STAGE_VECTORS);
        assert_eq!(report.errors[0].kind, Some(ErrorKind::Transient));
    }

    #[tokio::test]
    async fn parse_failure_skips_model_stages_but_still_writes_graph() {
        let fixture = fixture_with(true, RISK_JSON, false);
        let report = fixture
            .pipeline
            .run("c-3", b"not a pdf", "broken.pdf", None)
            .await;

        assert!(report.risk.is_none());
        assert!(report.vector_chunk_ids.is_empty());
        // The contract node is still written so the document shows up.
        assert!(report.graph_written);
        assert_eq!(report.total_cost, 0.0);

        let stages: Vec<&str> = report.errors.iter().map(|e| e.stage.as_str()).collect();
        assert_eq!(stages, vec![STAGE_PARSE, STAGE_ANALYZE, STAGE_VECTORS]);
        assert_eq!(report.errors[0].kind, Some(ErrorKind::InvalidInput));
        // Skips carry no error kind.
        assert_eq!(report.errors[1].kind, None);
        assert_eq!(report.errors[2].kind, None);
    }

    #[tokio::test]
    async fn unparseable_model_json_is_an_integrity_failure_with_cost() {
        let fixture = fixture_with(false, "I'd rather write prose than JSON.", false);
        let report = fixture
            .pipeline
            .run("c-4", b"%PDF-1.7", "msa.pdf", None)
            .await;

        assert!(report.risk.is_none());
        let analyze_error = report
            .errors
            .iter()
            .find(|e| e.stage == STAGE_ANALYZE)
            .unwrap();
        assert_eq!(analyze_error.kind, Some(ErrorKind::Integrity));
        // The model call still happened and still cost money.
        assert!(report.total_cost > 0.0);
    }

    #[tokio::test]
    async fn inconsistent_risk_level_is_coerced_to_band() {
        let json = RISK_JSON.replace("\"risk_level\": \"high\"", "\"risk_level\": \"low\"");
        let fixture = fixture_with(false, &json, false);
        let report = fixture
            .pipeline
            .run("c-5", b"%PDF-1.7", "msa.pdf", None)
            .await;
        // Score 8 forces the high band regardless of what the model said
        // about the report level (the clause-level field is untouched).
        assert_eq!(report.risk.unwrap().risk_level, RiskLevel::High);
    }

    #[tokio::test]
    async fn supplied_query_runs_the_answer_stage() {
        let fixture = fixture_with(false, RISK_JSON, false);
        let report = fixture
            .pipeline
            .run(
                "c-6",
                b"%PDF-1.7",
                "msa.pdf",
                Some("what are the payment terms?".to_string()),
            )
            .await;

        assert!(report.answer.is_some());
        // Cost accumulates across the analyze and answer calls.
        let daily = fixture.ledger.daily(Utc::now().date_naive()).await.unwrap();
        assert_eq!(daily.total_calls, 2);
        assert_eq!(daily.by_operation["analyze"].calls, 1);
        assert_eq!(daily.by_operation["query"].calls, 1);
        assert!((report.total_cost - daily.total_cost).abs() < 1e-9);
    }

    #[tokio::test]
    async fn blank_query_does_not_run_the_answer_stage() {
        let fixture = fixture_with(false, RISK_JSON, false);
        let report = fixture
            .pipeline
            .run("c-7", b"%PDF-1.7", "msa.pdf", Some("   ".to_string()))
            .await;
        assert!(report.answer.is_none());
        assert!(!report.errors.iter().any(|e| e.stage == STAGE_ANSWER));
    }

    #[test]
    fn json_extraction_tolerates_fences_and_prose() {
        assert_eq!(
            extract_json_object("```json\n{\"a\": 1}\n```").unwrap(),
            "{\"a\": 1}"
        );
        assert_eq!(
            extract_json_object("Here you go: {\"a\": 1} hope that helps").unwrap(),
            "{\"a\": 1}"
        );
        assert!(extract_json_object("no json here").is_none());
    }

    #[test]
    fn prompt_truncates_long_contracts() {
        let text = "a".repeat(100_000);
        let prompt = risk_prompt(&text, 50_000);
        assert!(prompt.len() < 60_000);
        assert!(prompt.contains("risk_score"));
    }

    #[test]
    fn char_truncation_respects_boundaries() {
        let text = "äöü".repeat(10);
        let cut = truncate_chars(&text, 5);
        assert_eq!(cut.chars().count(), 5);
    }
}
