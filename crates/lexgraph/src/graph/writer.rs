//! Contract graph writes.
//!
//! Builds the MERGE statements that materialise a contract's neighbourhood
//! and applies them as one atomic batch. All writes are idempotent on the
//! unique keys (`Contract.contract_id`, `Company.name`, `Clause.clause_id`),
//! so re-running an identical store leaves identical graph state.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{CoreError, CoreResult};
use crate::types::RiskLevel;

use super::{
    ClauseNode, CompanyNode, ContractNode, ContractView, GraphClient, GraphStatement, GraphValue,
    RiskFactorNode,
};

const SCHEMA_STATEMENTS: &[&str] = &[
    "CREATE INDEX FOR (c:Contract) ON (c.contract_id)",
    "CREATE INDEX FOR (c:Contract) ON (c.upload_date)",
    "CREATE INDEX FOR (c:Contract) ON (c.risk_level)",
    "CREATE INDEX FOR (co:Company) ON (co.name)",
    "CREATE INDEX FOR (cl:Clause) ON (cl.clause_type)",
    "CREATE INDEX FOR (r:RiskFactor) ON (r.risk_level)",
];

/// Writes and reads whole contract subgraphs through the [`GraphClient`].
pub struct ContractGraphStore {
    client: Arc<dyn GraphClient>,
}

impl ContractGraphStore {
    pub fn new(client: Arc<dyn GraphClient>) -> Self {
        Self { client }
    }

    /// Create indexes. Existing indexes are fine; failures are logged and
    /// ignored so startup is not blocked by a pre-initialised store.
    pub async fn init_schema(&self) {
        for statement in SCHEMA_STATEMENTS {
            if let Err(err) = self.client.query(statement, HashMap::new()).await {
                tracing::warn!(error = %err, statement, "index creation skipped");
            }
        }
    }

    /// Store a contract with its companies, clauses and risk factors as one
    /// atomic batch of idempotent MERGE statements.
    pub async fn store_contract(
        &self,
        contract: &ContractNode,
        companies: &[CompanyNode],
        clauses: &[ClauseNode],
        risks: &[RiskFactorNode],
    ) -> CoreResult<()> {
        if contract.contract_id.is_empty() {
            return Err(CoreError::invalid_input("contract_id must not be empty"));
        }

        let mut statements = Vec::with_capacity(1 + companies.len() + clauses.len() + risks.len());

        let mut params = HashMap::new();
        params.insert("contract_id".into(), GraphValue::from(contract.contract_id.clone()));
        params.insert("filename".into(), GraphValue::from(contract.filename.clone()));
        params.insert(
            "upload_date".into(),
            GraphValue::from(contract.upload_date.to_rfc3339()),
        );
        params.insert(
            "risk_score".into(),
            GraphValue::from(contract.risk_score.map(|v| v as i64)),
        );
        params.insert(
            "risk_level".into(),
            GraphValue::from(contract.risk_level.map(|v| v.as_str().to_string())),
        );
        params.insert(
            "payment_amount".into(),
            GraphValue::from(contract.payment_amount.clone()),
        );
        params.insert(
            "payment_frequency".into(),
            GraphValue::from(contract.payment_frequency.clone()),
        );
        params.insert(
            "has_termination_clause".into(),
            GraphValue::from(contract.has_termination_clause),
        );
        params.insert(
            "liability_cap".into(),
            GraphValue::from(contract.liability_cap.clone()),
        );
        statements.push(GraphStatement {
            cypher: "MERGE (c:Contract {contract_id: $contract_id}) \
                     SET c.filename = $filename, \
                         c.upload_date = $upload_date, \
                         c.risk_score = $risk_score, \
                         c.risk_level = $risk_level, \
                         c.payment_amount = $payment_amount, \
                         c.payment_frequency = $payment_frequency, \
                         c.has_termination_clause = $has_termination_clause, \
                         c.liability_cap = $liability_cap"
                .to_string(),
            params,
        });

        for company in companies {
            let mut params = HashMap::new();
            params.insert("name".into(), GraphValue::from(company.name.clone()));
            params.insert("role".into(), GraphValue::from(company.role.clone()));
            params.insert(
                "contract_id".into(),
                GraphValue::from(contract.contract_id.clone()),
            );
            statements.push(GraphStatement {
                cypher: "MERGE (co:Company {name: $name}) \
                         SET co.role = $role \
                         WITH co \
                         MATCH (c:Contract {contract_id: $contract_id}) \
                         MERGE (co)-[r:PARTY_TO]->(c) \
                         SET r.role = $role"
                    .to_string(),
                params,
            });
        }

        for (i, clause) in clauses.iter().enumerate() {
            let clause_id = if clause.clause_id.is_empty() {
                format!("{}_clause_{}", contract.contract_id, i)
            } else {
                clause.clause_id.clone()
            };
            let mut params = HashMap::new();
            params.insert("clause_id".into(), GraphValue::from(clause_id));
            params.insert(
                "section_name".into(),
                GraphValue::from(clause.section_name.clone()),
            );
            params.insert("content".into(), GraphValue::from(clause.content.clone()));
            params.insert(
                "clause_type".into(),
                GraphValue::from(clause.clause_type.clone()),
            );
            params.insert(
                "importance".into(),
                GraphValue::from(clause.importance.clone()),
            );
            params.insert(
                "contract_id".into(),
                GraphValue::from(contract.contract_id.clone()),
            );
            statements.push(GraphStatement {
                cypher: "MERGE (cl:Clause {clause_id: $clause_id}) \
                         SET cl.section_name = $section_name, \
                             cl.content = $content, \
                             cl.clause_type = $clause_type, \
                             cl.importance = $importance \
                         WITH cl \
                         MATCH (c:Contract {contract_id: $contract_id}) \
                         MERGE (c)-[:CONTAINS]->(cl)"
                    .to_string(),
                params,
            });
        }

        for (i, risk) in risks.iter().enumerate() {
            let risk_id = format!("{}_risk_{}", contract.contract_id, i);
            let mut params = HashMap::new();
            params.insert("risk_id".into(), GraphValue::from(risk_id));
            params.insert("concern".into(), GraphValue::from(risk.concern.clone()));
            params.insert(
                "risk_level".into(),
                GraphValue::from(risk.risk_level.as_str()),
            );
            params.insert("section".into(), GraphValue::from(risk.section.clone()));
            params.insert(
                "recommendation".into(),
                GraphValue::from(risk.recommendation.clone()),
            );
            params.insert(
                "contract_id".into(),
                GraphValue::from(contract.contract_id.clone()),
            );
            statements.push(GraphStatement {
                cypher: "MERGE (r:RiskFactor {risk_id: $risk_id}) \
                         SET r.concern = $concern, \
                             r.risk_level = $risk_level, \
                             r.section = $section, \
                             r.recommendation = $recommendation \
                         WITH r \
                         MATCH (c:Contract {contract_id: $contract_id}) \
                         MERGE (c)-[rel:HAS_RISK]->(r) \
                         SET rel.risk_level = $risk_level"
                    .to_string(),
                params,
            });
        }

        self.client.run_batch(statements).await?;
        tracing::info!(
            contract_id = %contract.contract_id,
            companies = companies.len(),
            clauses = clauses.len(),
            risks = risks.len(),
            "contract graph stored"
        );
        Ok(())
    }

    /// One contract's full neighbourhood as a flat view, `None` when the
    /// contract does not exist.
    pub async fn contract_view(&self, contract_id: &str) -> CoreResult<Option<ContractView>> {
        if contract_id.is_empty() {
            return Err(CoreError::invalid_input("contract_id must not be empty"));
        }
        let mut params = HashMap::new();
        params.insert("contract_id".into(), GraphValue::from(contract_id));
        let result = self
            .client
            .query(
                "MATCH (c:Contract {contract_id: $contract_id}) \
                 OPTIONAL MATCH (co:Company)-[:PARTY_TO]->(c) \
                 OPTIONAL MATCH (c)-[:CONTAINS]->(cl:Clause) \
                 OPTIONAL MATCH (c)-[:HAS_RISK]->(r:RiskFactor) \
                 RETURN c, collect(DISTINCT co) as companies, \
                        collect(DISTINCT cl) as clauses, \
                        collect(DISTINCT r) as risks",
                params,
            )
            .await?;

        let Some(row) = result.rows.first() else {
            return Ok(None);
        };
        let Some(contract_node) = row.first().and_then(GraphValue::as_node) else {
            return Ok(None);
        };

        let nodes_at = |index: usize| -> Vec<&super::GraphNode> {
            row.get(index)
                .map(|value| value.as_list().iter().filter_map(GraphValue::as_node).collect())
                .unwrap_or_default()
        };

        Ok(Some(ContractView {
            contract: ContractNode::from_node(contract_node),
            companies: nodes_at(1).into_iter().map(CompanyNode::from_node).collect(),
            clauses: nodes_at(2).into_iter().map(ClauseNode::from_node).collect(),
            risk_factors: nodes_at(3).into_iter().map(RiskFactorNode::from_node).collect(),
        }))
    }

    /// Delete a contract with its clause and risk nodes and incoming party
    /// edges. Company nodes are shared and survive. Returns whether the
    /// contract existed.
    pub async fn delete_contract(&self, contract_id: &str) -> CoreResult<bool> {
        if contract_id.is_empty() {
            return Err(CoreError::invalid_input("contract_id must not be empty"));
        }
        let mut params = HashMap::new();
        params.insert("contract_id".into(), GraphValue::from(contract_id));
        let result = self
            .client
            .query(
                "MATCH (c:Contract {contract_id: $contract_id}) \
                 OPTIONAL MATCH (c)-[:CONTAINS|HAS_RISK]->(n) \
                 DETACH DELETE n, c \
                 RETURN count(DISTINCT c) as deleted",
                params,
            )
            .await?;

        let deleted = result
            .rows
            .first()
            .and_then(|row| row.first())
            .and_then(GraphValue::as_i64)
            .unwrap_or(0)
            > 0;
        if deleted {
            tracing::info!(contract_id, "contract graph deleted");
        } else {
            tracing::warn!(contract_id, "contract not found for deletion");
        }
        Ok(deleted)
    }
}

/// Derive clause nodes from the concerning clauses of a risk report.
pub fn clauses_from_concerns(
    contract_id: &str,
    concerns: &[crate::types::ConcerningClause],
) -> Vec<ClauseNode> {
    concerns
        .iter()
        .enumerate()
        .map(|(i, concern)| ClauseNode {
            clause_id: format!("{contract_id}_clause_{i}"),
            section_name: concern.section.clone(),
            content: concern.concern.clone(),
            clause_type: "concern".to_string(),
            importance: if concern.risk_level == RiskLevel::High {
                "high".to_string()
            } else {
                "medium".to_string()
            },
        })
        .collect()
}

/// Derive risk factor nodes from the concerning clauses of a risk report.
pub fn risks_from_concerns(concerns: &[crate::types::ConcerningClause]) -> Vec<RiskFactorNode> {
    concerns
        .iter()
        .map(|concern| RiskFactorNode {
            concern: concern.concern.clone(),
            risk_level: concern.risk_level,
            section: concern.section.clone(),
            recommendation: concern.recommendation.clone(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{GraphNode, QueryResult};
    use crate::types::ConcerningClause;
    use async_trait::async_trait;
    use chrono::Utc;
    use parking_lot::Mutex;

    /// Records every statement; answers queries from a script.
    struct RecordingClient {
        batches: Mutex<Vec<Vec<GraphStatement>>>,
        queries: Mutex<Vec<String>>,
        responses: Mutex<Vec<QueryResult>>,
    }

    impl RecordingClient {
        fn new(responses: Vec<QueryResult>) -> Self {
            Self {
                batches: Mutex::new(Vec::new()),
                queries: Mutex::new(Vec::new()),
                responses: Mutex::new(responses),
            }
        }
    }

    #[async_trait]
    impl GraphClient for RecordingClient {
        async fn query(
            &self,
            cypher: &str,
            _params: HashMap<String, GraphValue>,
        ) -> CoreResult<QueryResult> {
            self.queries.lock().push(cypher.to_string());
            let mut responses = self.responses.lock();
            if responses.is_empty() {
                Ok(QueryResult::default())
            } else {
                Ok(responses.remove(0))
            }
        }

        async fn run_batch(&self, statements: Vec<GraphStatement>) -> CoreResult<()> {
            self.batches.lock().push(statements);
            Ok(())
        }
    }

    fn contract() -> ContractNode {
        ContractNode {
            contract_id: "c-1".to_string(),
            filename: "msa.pdf".to_string(),
            upload_date: Utc::now(),
            risk_score: Some(7),
            risk_level: Some(RiskLevel::High),
            payment_amount: Some("$10,000".to_string()),
            payment_frequency: Some("monthly".to_string()),
            has_termination_clause: Some(true),
            liability_cap: Some("unlimited".to_string()),
        }
    }

    #[tokio::test]
    async fn store_batches_one_statement_per_node() {
        let client = Arc::new(RecordingClient::new(vec![]));
        let store = ContractGraphStore::new(client.clone());
        let companies = vec![CompanyNode {
            name: "Acme Corp".to_string(),
            role: "party_a".to_string(),
        }];
        let concerns = vec![ConcerningClause {
            section: "Liability".to_string(),
            concern: "uncapped indemnity".to_string(),
            risk_level: RiskLevel::High,
            recommendation: Some("negotiate a cap".to_string()),
        }];
        let clauses = clauses_from_concerns("c-1", &concerns);
        let risks = risks_from_concerns(&concerns);

        store
            .store_contract(&contract(), &companies, &clauses, &risks)
            .await
            .unwrap();

        let batches = client.batches.lock();
        assert_eq!(batches.len(), 1, "one atomic batch");
        let batch = &batches[0];
        assert_eq!(batch.len(), 4);
        assert!(batch[0].cypher.starts_with("MERGE (c:Contract"));
        assert!(batch[1].cypher.contains("MERGE (co:Company"));
        assert!(batch[1].cypher.contains("PARTY_TO"));
        assert!(batch[2].cypher.contains("MERGE (cl:Clause"));
        assert!(batch[2].cypher.contains("CONTAINS"));
        assert!(batch[3].cypher.contains("MERGE (r:RiskFactor"));
        assert!(batch[3].cypher.contains("HAS_RISK"));
    }

    #[tokio::test]
    async fn store_is_idempotent_on_repeat() {
        let client = Arc::new(RecordingClient::new(vec![]));
        let store = ContractGraphStore::new(client.clone());
        let concerns = vec![ConcerningClause {
            section: "Payment".to_string(),
            concern: "net-90 terms".to_string(),
            risk_level: RiskLevel::Medium,
            recommendation: None,
        }];
        let clauses = clauses_from_concerns("c-1", &concerns);
        let risks = risks_from_concerns(&concerns);

        store
            .store_contract(&contract(), &[], &clauses, &risks)
            .await
            .unwrap();
        store
            .store_contract(&contract(), &[], &clauses, &risks)
            .await
            .unwrap();

        let batches = client.batches.lock();
        // Identical input produces identical MERGE batches: every statement
        // is keyed on a stable unique id, so replaying converges.
        assert_eq!(batches[0].len(), batches[1].len());
        for (a, b) in batches[0].iter().zip(batches[1].iter()) {
            assert_eq!(a.cypher, b.cypher);
            assert!(a.cypher.contains("MERGE"));
            assert!(!a.cypher.contains("CREATE "));
            assert_eq!(a.params.get("clause_id"), b.params.get("clause_id"));
            assert_eq!(a.params.get("risk_id"), b.params.get("risk_id"));
        }
    }

    #[tokio::test]
    async fn view_parses_collected_nodes() {
        let row = vec![
            GraphValue::Node(
                GraphNode::new("Contract")
                    .with("contract_id", "c-1")
                    .with("filename", "msa.pdf")
                    .with("upload_date", "2025-01-15T10:00:00Z")
                    .with("risk_score", 7i64)
                    .with("risk_level", "high"),
            ),
            GraphValue::List(vec![GraphValue::Node(
                GraphNode::new("Company")
                    .with("name", "Acme Corp")
                    .with("role", "party_a"),
            )]),
            GraphValue::List(vec![GraphValue::Node(
                GraphNode::new("Clause")
                    .with("clause_id", "c-1_clause_0")
                    .with("section_name", "Liability")
                    .with("content", "uncapped indemnity")
                    .with("clause_type", "concern")
                    .with("importance", "high"),
            )]),
            GraphValue::List(vec![GraphValue::Node(
                GraphNode::new("RiskFactor")
                    .with("concern", "uncapped indemnity")
                    .with("risk_level", "high")
                    .with("section", "Liability"),
            )]),
        ];
        let client = Arc::new(RecordingClient::new(vec![QueryResult { rows: vec![row] }]));
        let store = ContractGraphStore::new(client);

        let view = store.contract_view("c-1").await.unwrap().unwrap();
        assert_eq!(view.contract.contract_id, "c-1");
        assert_eq!(view.companies.len(), 1);
        assert_eq!(view.clauses[0].section_name, "Liability");
        assert_eq!(view.risk_factors[0].risk_level, RiskLevel::High);
    }

    #[tokio::test]
    async fn missing_contract_view_is_none() {
        let client = Arc::new(RecordingClient::new(vec![QueryResult::default()]));
        let store = ContractGraphStore::new(client);
        assert!(store.contract_view("ghost").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_reports_whether_contract_existed() {
        let client = Arc::new(RecordingClient::new(vec![
            QueryResult {
                rows: vec![vec![GraphValue::Int(1)]],
            },
            QueryResult {
                rows: vec![vec![GraphValue::Int(0)]],
            },
        ]));
        let store = ContractGraphStore::new(client.clone());
        assert!(store.delete_contract("c-1").await.unwrap());
        assert!(!store.delete_contract("ghost").await.unwrap());
        let queries = client.queries.lock();
        assert!(queries[0].contains("DETACH DELETE"));
        // Companies are never part of the delete pattern.
        assert!(!queries[0].contains("Company"));
    }

    #[tokio::test]
    async fn empty_contract_id_is_invalid_input() {
        let client = Arc::new(RecordingClient::new(vec![]));
        let store = ContractGraphStore::new(client);
        let err = store.contract_view("").await.unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::InvalidInput);
    }

    #[test]
    fn importance_follows_risk_level() {
        let concerns = vec![
            ConcerningClause {
                section: "A".to_string(),
                concern: "x".to_string(),
                risk_level: RiskLevel::High,
                recommendation: None,
            },
            ConcerningClause {
                section: "B".to_string(),
                concern: "y".to_string(),
                risk_level: RiskLevel::Low,
                recommendation: None,
            },
        ];
        let clauses = clauses_from_concerns("c-9", &concerns);
        assert_eq!(clauses[0].importance, "high");
        assert_eq!(clauses[1].importance, "medium");
        assert_eq!(clauses[0].clause_id, "c-9_clause_0");
        assert_eq!(clauses[1].clause_id, "c-9_clause_1");
    }
}
