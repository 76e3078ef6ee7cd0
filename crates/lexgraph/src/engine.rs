//! Engine facade: wires the collaborators into the pipelines and exposes
//! the library's operation surface: ingest, scoped and corpus-wide query,
//! contract read, cost reporting and contract deletion.

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::cost::store::CounterStore;
use crate::cost::{CostLedger, DailyCost, RangeCost};
use crate::error::CoreResult;
use crate::graph::context::GraphContextRetriever;
use crate::graph::writer::ContractGraphStore;
use crate::graph::{ContractView, GraphClient};
use crate::llm::{Embedder, ModelProvider, ModelRouter};
use crate::processing::PdfParser;
use crate::search::HybridRetriever;
use crate::vector::VectorIndex;
use crate::workflow::analysis::{AnalysisPipeline, AnalysisReport};
use crate::workflow::query::{AnswerResult, QueryPipeline};

/// External services the engine runs against. Tests wire in-memory fakes;
/// deployments wire real adapters.
pub struct Collaborators {
    pub parser: Arc<dyn PdfParser>,
    pub provider: Arc<dyn ModelProvider>,
    pub embedder: Arc<dyn Embedder>,
    pub vector: Arc<dyn VectorIndex>,
    pub graph: Arc<dyn GraphClient>,
    pub counters: Arc<dyn CounterStore>,
}

/// What a contract deletion removed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteReport {
    pub contract_id: String,
    pub vector_chunks_deleted: usize,
    pub graph_deleted: bool,
}

/// Top-level entry point over the analysis and query pipelines.
pub struct ContractEngine {
    ledger: Arc<CostLedger>,
    vector: Arc<dyn VectorIndex>,
    graph_store: Arc<ContractGraphStore>,
    graph_context: Arc<GraphContextRetriever>,
    analysis: AnalysisPipeline,
    query: Arc<QueryPipeline>,
    query_budget: std::time::Duration,
}

impl ContractEngine {
    pub fn new(config: EngineConfig, collaborators: Collaborators) -> Result<Self, String> {
        config.validate()?;

        let router = Arc::new(ModelRouter::new(
            collaborators.provider,
            config.router.clone(),
        ));
        let ledger = Arc::new(CostLedger::new(
            collaborators.counters,
            config.ledger.clone(),
        ));
        let graph_store = Arc::new(ContractGraphStore::new(collaborators.graph.clone()));
        let graph_context = Arc::new(GraphContextRetriever::new(collaborators.graph));
        let retriever = Arc::new(HybridRetriever::new(
            collaborators.vector.clone(),
            collaborators.embedder.clone(),
            graph_context.clone(),
            config.retrieval.rrf_k,
        ));
        let query = Arc::new(QueryPipeline::new(
            retriever,
            router.clone(),
            ledger.clone(),
            config.retrieval.clone(),
        ));
        let analysis = AnalysisPipeline::new(
            collaborators.parser,
            router,
            collaborators.embedder,
            collaborators.vector.clone(),
            graph_store.clone(),
            query.clone(),
            ledger.clone(),
            config.chunking.clone(),
            config.pipeline.clone(),
        );

        Ok(Self {
            ledger,
            vector: collaborators.vector,
            graph_store,
            graph_context,
            analysis,
            query,
            query_budget: std::time::Duration::from_secs(config.pipeline.run_deadline_secs),
        })
    }

    /// Create graph indexes. Safe to call on every startup.
    pub async fn init(&self) {
        self.graph_store.init_schema().await;
    }

    /// Analyse and index one uploaded document. Assigns the contract id and
    /// never fails; partial outcomes carry their errors in the report.
    pub async fn ingest(
        &self,
        file_bytes: &[u8],
        filename: &str,
        query: Option<String>,
    ) -> AnalysisReport {
        let contract_id = Uuid::new_v4().to_string();
        self.analysis
            .run(&contract_id, file_bytes, filename, query)
            .await
    }

    /// Ad-hoc question over one contract.
    pub async fn query_contract(
        &self,
        contract_id: &str,
        query: &str,
        n_results: usize,
    ) -> CoreResult<AnswerResult> {
        self.query
            .answer(query, Some(contract_id), n_results, self.query_deadline())
            .await
    }

    /// Ad-hoc question over the whole corpus.
    pub async fn query_corpus(&self, query: &str, n_results: usize) -> CoreResult<AnswerResult> {
        self.query
            .answer(query, None, n_results, self.query_deadline())
            .await
    }

    /// A contract's graph neighbourhood, or `None` when unknown.
    pub async fn contract(&self, contract_id: &str) -> CoreResult<Option<ContractView>> {
        self.graph_store.contract_view(contract_id).await
    }

    /// Connected-entity context, exposed for cross-contract analysis.
    pub fn graph_context(&self) -> &GraphContextRetriever {
        &self.graph_context
    }

    /// Aggregate spend for one UTC day (today when unspecified).
    pub async fn daily_cost(&self, day: Option<NaiveDate>) -> CoreResult<DailyCost> {
        self.ledger
            .daily(day.unwrap_or_else(|| Utc::now().date_naive()))
            .await
    }

    /// Aggregate spend over an inclusive day range.
    pub async fn cost_range(&self, from: NaiveDate, to: NaiveDate) -> CoreResult<RangeCost> {
        self.ledger.range(from, to).await
    }

    /// Remove a contract from both indexes. Companies shared with other
    /// contracts survive.
    pub async fn delete_contract(&self, contract_id: &str) -> CoreResult<DeleteReport> {
        let vector_chunks_deleted = self.vector.delete_contract(contract_id).await?;
        let graph_deleted = self.graph_store.delete_contract(contract_id).await?;
        tracing::info!(
            contract_id,
            vector_chunks_deleted,
            graph_deleted,
            "contract deleted"
        );
        Ok(DeleteReport {
            contract_id: contract_id.to_string(),
            vector_chunks_deleted,
            graph_deleted,
        })
    }

    fn query_deadline(&self) -> crate::types::Deadline {
        // Queries get the same soft budget as analysis runs; callers wanting
        // tighter cancellation drop the future.
        crate::types::Deadline::after(self.query_budget)
    }
}
