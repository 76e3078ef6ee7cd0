//! Graph context retrieval.
//!
//! Expands a contract into its connected entities with a single traversal
//! per query. Missing contracts come back as `None` or empty collections,
//! never as errors.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{CoreError, CoreResult};
use crate::types::RiskLevel;

use super::{
    ClauseNode, CompanyNode, ContractNode, GraphClient, GraphValue, RiskFactorNode,
};

/// Context retrieved from one contract traversal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphContext {
    pub contract_id: String,
    pub contract: ContractNode,
    pub companies: Vec<CompanyNode>,
    pub clauses: Vec<ClauseNode>,
    pub risks: Vec<RiskFactorNode>,
    pub traversal_depth: u8,
}

/// Clause of a given type together with the risks in its section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClauseTypeContext {
    pub clause: ClauseNode,
    pub related_risks: Vec<RiskFactorNode>,
}

/// A contract reached through a company's PARTY_TO edge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompanyContract {
    pub contract_id: String,
    pub filename: String,
    pub risk_level: Option<RiskLevel>,
    pub role: String,
}

/// A risk factor paired with the clause of the matching section, if any.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskContext {
    pub risk: RiskFactorNode,
    pub clause_content: Option<String>,
}

/// Options for [`GraphContextRetriever::context_for_contract`].
#[derive(Debug, Clone, Copy)]
pub struct ContextOptions {
    pub include_companies: bool,
    pub include_clauses: bool,
    pub include_risks: bool,
    pub max_clauses: usize,
}

impl Default for ContextOptions {
    fn default() -> Self {
        Self {
            include_companies: true,
            include_clauses: true,
            include_risks: true,
            max_clauses: 10,
        }
    }
}

/// Fetches connected-entity context for contracts.
pub struct GraphContextRetriever {
    client: Arc<dyn GraphClient>,
}

impl GraphContextRetriever {
    pub fn new(client: Arc<dyn GraphClient>) -> Self {
        Self { client }
    }

    /// Full graph context for a contract, or `None` when it does not exist.
    pub async fn context_for_contract(
        &self,
        contract_id: &str,
        options: ContextOptions,
    ) -> CoreResult<Option<GraphContext>> {
        if contract_id.is_empty() {
            return Err(CoreError::invalid_input("contract_id must not be empty"));
        }

        let mut params = HashMap::new();
        params.insert("contract_id".into(), GraphValue::from(contract_id));
        params.insert(
            "max_clauses".into(),
            GraphValue::from(options.max_clauses as i64),
        );
        let result = self
            .client
            .query(
                "MATCH (c:Contract {contract_id: $contract_id}) \
                 OPTIONAL MATCH (co:Company)-[:PARTY_TO]->(c) \
                 OPTIONAL MATCH (c)-[:CONTAINS]->(cl:Clause) \
                 OPTIONAL MATCH (c)-[:HAS_RISK]->(r:RiskFactor) \
                 RETURN c, \
                        collect(DISTINCT co) as companies, \
                        collect(DISTINCT cl)[0..$max_clauses] as clauses, \
                        collect(DISTINCT r) as risks",
                params,
            )
            .await?;

        let Some(row) = result.rows.first() else {
            tracing::info!(contract_id, "contract not found in graph");
            return Ok(None);
        };
        let Some(contract_node) = row.first().and_then(GraphValue::as_node) else {
            return Ok(None);
        };

        let companies = if options.include_companies {
            collect_nodes(row.get(1)).map(CompanyNode::from_node).collect()
        } else {
            Vec::new()
        };
        let clauses: Vec<ClauseNode> = if options.include_clauses {
            collect_nodes(row.get(2))
                .map(ClauseNode::from_node)
                .take(options.max_clauses)
                .collect()
        } else {
            Vec::new()
        };
        let risks = if options.include_risks {
            collect_nodes(row.get(3)).map(RiskFactorNode::from_node).collect()
        } else {
            Vec::new()
        };

        tracing::info!(
            contract_id,
            companies = companies.len(),
            clauses = clauses.len(),
            risks = risks.len(),
            "graph context retrieved"
        );

        Ok(Some(GraphContext {
            contract_id: contract_id.to_string(),
            contract: ContractNode::from_node(contract_node),
            companies,
            clauses,
            risks,
            traversal_depth: 1,
        }))
    }

    /// The clause of a given type plus risks sharing its section, or `None`
    /// when the contract has no such clause.
    pub async fn context_for_clause_type(
        &self,
        contract_id: &str,
        clause_type: &str,
    ) -> CoreResult<Option<ClauseTypeContext>> {
        if contract_id.is_empty() {
            return Err(CoreError::invalid_input("contract_id must not be empty"));
        }
        if clause_type.is_empty() {
            return Err(CoreError::invalid_input("clause_type must not be empty"));
        }

        let mut params = HashMap::new();
        params.insert("contract_id".into(), GraphValue::from(contract_id));
        params.insert("clause_type".into(), GraphValue::from(clause_type));
        let result = self
            .client
            .query(
                "MATCH (c:Contract {contract_id: $contract_id})-[:CONTAINS]->(cl:Clause) \
                 WHERE cl.clause_type = $clause_type \
                 OPTIONAL MATCH (c)-[:HAS_RISK]->(r:RiskFactor) \
                 WHERE r.section = cl.section_name \
                 RETURN cl, collect(r) as related_risks",
                params,
            )
            .await?;

        let Some(row) = result.rows.first() else {
            tracing::info!(contract_id, clause_type, "clause type not found");
            return Ok(None);
        };
        let Some(clause_node) = row.first().and_then(GraphValue::as_node) else {
            return Ok(None);
        };

        Ok(Some(ClauseTypeContext {
            clause: ClauseNode::from_node(clause_node),
            related_risks: collect_nodes(row.get(1))
                .map(RiskFactorNode::from_node)
                .collect(),
        }))
    }

    /// Other contracts involving a company, newest upload first.
    pub async fn contracts_by_company(
        &self,
        company_name: &str,
        limit: usize,
    ) -> CoreResult<Vec<CompanyContract>> {
        if company_name.is_empty() {
            return Err(CoreError::invalid_input("company_name must not be empty"));
        }
        if limit == 0 {
            return Err(CoreError::invalid_input("limit must be at least 1"));
        }

        let mut params = HashMap::new();
        params.insert("company_name".into(), GraphValue::from(company_name));
        params.insert("limit".into(), GraphValue::from(limit as i64));
        let result = self
            .client
            .query(
                "MATCH (co:Company {name: $company_name})-[:PARTY_TO]->(c:Contract) \
                 RETURN c.contract_id, c.filename, c.risk_level, co.role \
                 ORDER BY c.upload_date DESC \
                 LIMIT $limit",
                params,
            )
            .await?;

        let contracts: Vec<CompanyContract> = result
            .rows
            .iter()
            .map(|row| CompanyContract {
                contract_id: str_at(row, 0),
                filename: str_at(row, 1),
                risk_level: row
                    .get(2)
                    .and_then(GraphValue::as_str)
                    .and_then(RiskLevel::parse),
                role: str_at(row, 3),
            })
            .collect();

        tracing::info!(
            company_name,
            count = contracts.len(),
            "contracts by company retrieved"
        );
        Ok(contracts)
    }

    /// All risk factors of a contract, optionally filtered by level, each
    /// paired with the clause content of the matching section.
    pub async fn risk_context(
        &self,
        contract_id: &str,
        risk_level: Option<RiskLevel>,
    ) -> CoreResult<Vec<RiskContext>> {
        if contract_id.is_empty() {
            return Err(CoreError::invalid_input("contract_id must not be empty"));
        }

        let mut params = HashMap::new();
        params.insert("contract_id".into(), GraphValue::from(contract_id));
        params.insert(
            "risk_level".into(),
            GraphValue::from(risk_level.map(|v| v.as_str().to_string())),
        );
        let result = self
            .client
            .query(
                "MATCH (c:Contract {contract_id: $contract_id})-[:HAS_RISK]->(r:RiskFactor) \
                 WHERE $risk_level IS NULL OR r.risk_level = $risk_level \
                 OPTIONAL MATCH (c)-[:CONTAINS]->(cl:Clause) \
                 WHERE cl.section_name = r.section \
                 RETURN r, cl.content as clause_content",
                params,
            )
            .await?;

        Ok(result
            .rows
            .iter()
            .filter_map(|row| {
                let risk_node = row.first().and_then(GraphValue::as_node)?;
                Some(RiskContext {
                    risk: RiskFactorNode::from_node(risk_node),
                    clause_content: row.get(1).and_then(GraphValue::as_str).map(str::to_string),
                })
            })
            .collect())
    }
}

fn collect_nodes<'a>(
    value: Option<&'a GraphValue>,
) -> impl Iterator<Item = &'a super::GraphNode> {
    value
        .map(|v| v.as_list())
        .unwrap_or(&[])
        .iter()
        .filter_map(GraphValue::as_node)
}

fn str_at(row: &[GraphValue], index: usize) -> String {
    row.get(index)
        .and_then(GraphValue::as_str)
        .unwrap_or_default()
        .to_string()
}
