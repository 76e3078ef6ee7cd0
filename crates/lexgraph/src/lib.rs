//! lexgraph: legal contract analysis engine.
//!
//! Ingests contract documents through a staged pipeline (parse, risk
//! analysis, vector indexing, graph write, optional Q&A), answers
//! natural-language questions with hybrid vector+graph retrieval fused by
//! RRF, routes model calls by task complexity behind retry and a circuit
//! breaker, and accounts every model call in a daily cost ledger.
//!
//! External services (PDF parsing, the model provider, embeddings, the
//! vector index, the property graph and the counter store) sit behind
//! small traits; tests run entirely on in-memory implementations.

pub mod config;
pub mod cost;
pub mod engine;
pub mod error;
pub mod graph;
pub mod llm;
pub mod processing;
pub mod search;
pub mod types;
pub mod vector;
pub mod workflow;

// Re-export the primary surface for convenience.
pub use config::EngineConfig;
pub use cost::store::{CounterStore, MemoryCounterStore};
pub use cost::{CostEntry, CostLedger, DailyCost, RangeCost};
pub use engine::{Collaborators, ContractEngine, DeleteReport};
pub use error::{CoreError, CoreResult, ErrorKind};
pub use graph::context::{GraphContext, GraphContextRetriever};
pub use graph::{ContractView, GraphClient};
pub use llm::{Embedder, GenerationResult, ModelProvider, ModelRouter, TaskComplexity};
pub use processing::PdfParser;
pub use search::{HybridResponse, HybridRetriever, RetrievalResult, RetrievalSource};
pub use types::{Deadline, RiskLevel, RiskReport};
pub use vector::{DocumentChunk, MemoryVectorIndex, VectorIndex};
pub use workflow::analysis::{AnalysisPipeline, AnalysisReport};
pub use workflow::query::{AnswerResult, QueryPipeline};

// Re-export common foundations the way downstream callers expect them.
pub use anyhow::{Error, Result};
pub use uuid::Uuid;
