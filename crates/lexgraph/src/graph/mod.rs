//! Labelled property graph collaborator boundary and contract graph schema.
//!
//! The store is Cypher-like: parameterised query text in, rows of typed
//! values out. The engine owns the schema (Contract, Company, Clause and
//! RiskFactor nodes joined by PARTY_TO, CONTAINS and HAS_RISK) and keeps
//! all graph summaries as flat records.

pub mod context;
pub mod writer;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::CoreResult;
use crate::types::RiskLevel;

// ---------------------------------------------------------------------------
// Wire values
// ---------------------------------------------------------------------------

/// A value bound into or returned from a graph query.
#[derive(Debug, Clone, PartialEq)]
pub enum GraphValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Node(GraphNode),
    List(Vec<GraphValue>),
}

impl GraphValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            GraphValue::Text(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            GraphValue::Int(v) => Some(*v),
            GraphValue::Float(v) => Some(*v as i64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            GraphValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_node(&self) -> Option<&GraphNode> {
        match self {
            GraphValue::Node(v) => Some(v),
            _ => None,
        }
    }

    /// The list elements, or an empty slice for anything else.
    pub fn as_list(&self) -> &[GraphValue] {
        match self {
            GraphValue::List(v) => v,
            _ => &[],
        }
    }
}

impl From<&str> for GraphValue {
    fn from(value: &str) -> Self {
        GraphValue::Text(value.to_string())
    }
}

impl From<String> for GraphValue {
    fn from(value: String) -> Self {
        GraphValue::Text(value)
    }
}

impl From<i64> for GraphValue {
    fn from(value: i64) -> Self {
        GraphValue::Int(value)
    }
}

impl From<bool> for GraphValue {
    fn from(value: bool) -> Self {
        GraphValue::Bool(value)
    }
}

impl<T: Into<GraphValue>> From<Option<T>> for GraphValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(GraphValue::Null, Into::into)
    }
}

/// A node with labels and properties.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct GraphNode {
    pub labels: Vec<String>,
    pub properties: HashMap<String, GraphValue>,
}

impl GraphNode {
    pub fn new(label: &str) -> Self {
        Self {
            labels: vec![label.to_string()],
            properties: HashMap::new(),
        }
    }

    pub fn with(mut self, key: &str, value: impl Into<GraphValue>) -> Self {
        self.properties.insert(key.to_string(), value.into());
        self
    }

    pub fn prop_str(&self, key: &str) -> Option<String> {
        self.properties
            .get(key)
            .and_then(GraphValue::as_str)
            .map(str::to_string)
    }

    pub fn prop_i64(&self, key: &str) -> Option<i64> {
        self.properties.get(key).and_then(GraphValue::as_i64)
    }

    pub fn prop_bool(&self, key: &str) -> Option<bool> {
        self.properties.get(key).and_then(GraphValue::as_bool)
    }
}

/// Rows returned by a traversal.
#[derive(Debug, Clone, Default)]
pub struct QueryResult {
    pub rows: Vec<Vec<GraphValue>>,
}

/// One parameterised statement for a batched write.
#[derive(Debug, Clone)]
pub struct GraphStatement {
    pub cypher: String,
    pub params: HashMap<String, GraphValue>,
}

/// Graph store collaborator: a Cypher-like query surface with parameter
/// binding. Batched writes apply atomically.
#[async_trait]
pub trait GraphClient: Send + Sync {
    async fn query(
        &self,
        cypher: &str,
        params: HashMap<String, GraphValue>,
    ) -> CoreResult<QueryResult>;

    async fn run_batch(&self, statements: Vec<GraphStatement>) -> CoreResult<()>;
}

// ---------------------------------------------------------------------------
// Schema records
// ---------------------------------------------------------------------------

/// Contract node. `contract_id` is the unique key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContractNode {
    pub contract_id: String,
    pub filename: String,
    pub upload_date: DateTime<Utc>,
    pub risk_score: Option<u8>,
    pub risk_level: Option<RiskLevel>,
    pub payment_amount: Option<String>,
    pub payment_frequency: Option<String>,
    pub has_termination_clause: Option<bool>,
    pub liability_cap: Option<String>,
}

impl ContractNode {
    pub(crate) fn from_node(node: &GraphNode) -> Self {
        Self {
            contract_id: node.prop_str("contract_id").unwrap_or_default(),
            filename: node.prop_str("filename").unwrap_or_default(),
            upload_date: node
                .prop_str("upload_date")
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(Utc::now),
            risk_score: node.prop_i64("risk_score").map(|v| v.clamp(0, 10) as u8),
            risk_level: node
                .prop_str("risk_level")
                .and_then(|v| RiskLevel::parse(&v)),
            payment_amount: node.prop_str("payment_amount"),
            payment_frequency: node.prop_str("payment_frequency"),
            has_termination_clause: node.prop_bool("has_termination_clause"),
            liability_cap: node.prop_str("liability_cap"),
        }
    }
}

/// Company node, keyed by name. Companies are shared across contracts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompanyNode {
    pub name: String,
    pub role: String,
}

impl CompanyNode {
    pub(crate) fn from_node(node: &GraphNode) -> Self {
        Self {
            name: node.prop_str("name").unwrap_or_default(),
            role: node.prop_str("role").unwrap_or_default(),
        }
    }
}

/// Clause node, keyed by `clause_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClauseNode {
    pub clause_id: String,
    pub section_name: String,
    pub content: String,
    pub clause_type: String,
    pub importance: String,
}

impl ClauseNode {
    pub(crate) fn from_node(node: &GraphNode) -> Self {
        Self {
            clause_id: node.prop_str("clause_id").unwrap_or_default(),
            section_name: node.prop_str("section_name").unwrap_or_default(),
            content: node.prop_str("content").unwrap_or_default(),
            clause_type: node.prop_str("clause_type").unwrap_or_default(),
            importance: node.prop_str("importance").unwrap_or_default(),
        }
    }
}

/// Risk factor node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskFactorNode {
    pub concern: String,
    pub risk_level: RiskLevel,
    pub section: String,
    pub recommendation: Option<String>,
}

impl RiskFactorNode {
    pub(crate) fn from_node(node: &GraphNode) -> Self {
        Self {
            concern: node.prop_str("concern").unwrap_or_default(),
            risk_level: node
                .prop_str("risk_level")
                .and_then(|v| RiskLevel::parse(&v))
                .unwrap_or(RiskLevel::Medium),
            section: node.prop_str("section").unwrap_or_default(),
            recommendation: node.prop_str("recommendation"),
        }
    }
}

/// Flat read model of one contract's graph neighbourhood.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContractView {
    pub contract: ContractNode,
    pub companies: Vec<CompanyNode>,
    pub clauses: Vec<ClauseNode>,
    pub risk_factors: Vec<RiskFactorNode>,
}
