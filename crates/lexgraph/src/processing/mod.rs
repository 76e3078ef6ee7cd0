//! Document intake: the PDF parser collaborator boundary and text chunking.

pub mod chunker;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::CoreResult;

/// Party extracted from contract front matter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContractParty {
    pub name: String,
    /// `party_a`, `party_b`, ...
    pub role: String,
}

/// Document-level metadata the parser recovered.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DocumentMetadata {
    #[serde(default)]
    pub parties: Vec<ContractParty>,
    #[serde(default)]
    pub effective_date: Option<String>,
    #[serde(default)]
    pub contract_type: Option<String>,
}

/// Parsed contract: full text plus named sections in document order.
#[derive(Debug, Clone, Default)]
pub struct ParsedDocument {
    pub raw_text: String,
    /// Section name -> content, preserving document order.
    pub sections: Vec<(String, String)>,
    pub tables: Vec<Vec<Vec<String>>>,
    pub metadata: DocumentMetadata,
}

/// PDF parsing collaborator. Failures map to `InvalidInput` for malformed
/// documents and `Transient` for service trouble.
#[async_trait]
pub trait PdfParser: Send + Sync {
    async fn parse(&self, bytes: &[u8], filename: &str) -> CoreResult<ParsedDocument>;
}
