use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub chunking: ChunkingConfig,
    pub retrieval: RetrievalConfig,
    pub router: RouterConfig,
    pub ledger: LedgerConfig,
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkingConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Graph context items fetched per contract surfaced by the vector leg.
    pub n_graph: usize,
    pub rrf_k: usize,
    pub include_companies: bool,
    pub include_risks: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    pub max_retries: u32,
    /// Base delay for the exponential backoff, in milliseconds.
    pub backoff_base_ms: u64,
    /// Cap on any single backoff delay, in milliseconds.
    pub backoff_cap_ms: u64,
    pub default_timeout_secs: u64,
    pub max_timeout_secs: u64,
    /// Consecutive failures before the breaker opens.
    pub breaker_fail_max: u32,
    /// Seconds the breaker stays open before admitting a probe.
    pub breaker_reset_secs: u64,
}

impl RouterConfig {
    pub fn default_timeout(&self) -> Duration {
        Duration::from_secs(self.default_timeout_secs)
    }

    pub fn max_timeout(&self) -> Duration {
        Duration::from_secs(self.max_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// Retention for raw per-call records, in days.
    pub raw_retention_days: u32,
    /// Retention for daily aggregates, in days.
    pub aggregate_retention_days: u32,
    /// Swallow backing-store write errors instead of surfacing them.
    pub fail_silently: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Soft deadline for a full analysis run, in seconds.
    pub run_deadline_secs: u64,
    /// Contract text beyond this many characters is not sent to the model.
    pub max_prompt_chars: usize,
    /// Context results fed to answer generation.
    pub answer_sources: usize,
}

impl EngineConfig {
    /// Validate config values, returning errors for clearly broken configurations.
    pub fn validate(&self) -> Result<(), String> {
        if self.chunking.chunk_size < 50 {
            return Err("chunking.chunk_size must be >= 50".into());
        }
        if self.chunking.chunk_overlap >= self.chunking.chunk_size {
            return Err("chunking.chunk_overlap must be < chunk_size".into());
        }
        if self.retrieval.rrf_k == 0 {
            return Err("retrieval.rrf_k must be > 0".into());
        }
        if self.router.max_timeout_secs < self.router.default_timeout_secs {
            return Err("router.max_timeout_secs must be >= default_timeout_secs".into());
        }
        if self.router.breaker_fail_max == 0 {
            return Err("router.breaker_fail_max must be > 0".into());
        }
        if self.ledger.aggregate_retention_days < self.ledger.raw_retention_days {
            return Err("ledger.aggregate_retention_days must be >= raw_retention_days".into());
        }
        if self.pipeline.max_prompt_chars == 0 {
            return Err("pipeline.max_prompt_chars must be > 0".into());
        }
        Ok(())
    }

    /// Load config from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self, String> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file: {}", e))?;
        let config: Self =
            serde_json::from_str(&content).map_err(|e| format!("Failed to parse config: {}", e))?;
        config.validate()?;
        Ok(config)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            chunking: ChunkingConfig {
                chunk_size: 1000,
                chunk_overlap: 200,
            },
            retrieval: RetrievalConfig {
                n_graph: 3,
                rrf_k: 60,
                include_companies: true,
                include_risks: true,
            },
            router: RouterConfig {
                max_retries: 3,
                backoff_base_ms: 500,
                backoff_cap_ms: 30_000,
                default_timeout_secs: 30,
                max_timeout_secs: 120,
                breaker_fail_max: 5,
                breaker_reset_secs: 60,
            },
            ledger: LedgerConfig {
                raw_retention_days: 7,
                aggregate_retention_days: 30,
                fail_silently: true,
            },
            pipeline: PipelineConfig {
                run_deadline_secs: 300,
                max_prompt_chars: 50_000,
                answer_sources: 5,
            },
        }
    }
}
