//! Complexity-routed model gateway.
//!
//! Maps a task complexity tier to a concrete model and price schedule, then
//! executes the call with a per-attempt timeout, bounded retry with
//! full-jitter backoff, and a circuit breaker shared by all calls through
//! the router. The cost attached to each [`GenerationResult`] is the single
//! source of truth for what the cost ledger records.

pub mod resilience;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::config::RouterConfig;
use crate::error::{CoreError, CoreResult};
use crate::types::Deadline;
use resilience::{backoff_with_jitter, CircuitBreaker};

/// Task complexity levels for model routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskComplexity {
    /// Quick extractions, simple queries.
    Simple,
    /// Standard contract analysis.
    Balanced,
    /// Deep legal analysis.
    Complex,
    /// Advanced reasoning with a thinking budget.
    Reasoning,
}

/// Pricing and capability data for one routed model.
#[derive(Debug, Clone, Copy)]
pub struct ModelSpec {
    pub name: &'static str,
    /// USD per 1M input tokens.
    pub input_per_1m: f64,
    /// USD per 1M output tokens.
    pub output_per_1m: f64,
    /// USD per 1M thinking tokens, for models that expose them.
    pub thinking_per_1m: Option<f64>,
    pub supports_thinking: bool,
}

/// Static tier table (pricing as of December 2024).
pub fn model_spec(complexity: TaskComplexity) -> &'static ModelSpec {
    match complexity {
        TaskComplexity::Simple => &ModelSpec {
            name: "gemini-2.5-flash-lite",
            input_per_1m: 0.075,
            output_per_1m: 0.30,
            thinking_per_1m: None,
            supports_thinking: false,
        },
        TaskComplexity::Balanced => &ModelSpec {
            name: "gemini-2.5-flash",
            input_per_1m: 0.15,
            output_per_1m: 0.60,
            thinking_per_1m: None,
            supports_thinking: false,
        },
        TaskComplexity::Complex => &ModelSpec {
            name: "gemini-2.5-pro",
            input_per_1m: 1.25,
            output_per_1m: 5.00,
            thinking_per_1m: None,
            supports_thinking: false,
        },
        TaskComplexity::Reasoning => &ModelSpec {
            name: "gemini-3-pro",
            input_per_1m: 2.50,
            output_per_1m: 10.00,
            thinking_per_1m: Some(2.50),
            supports_thinking: true,
        },
    }
}

/// Request parameters forwarded to the provider for a single attempt.
#[derive(Debug, Clone)]
pub struct ProviderRequest {
    pub system_instruction: Option<String>,
    /// Zero unless the routed model supports thinking.
    pub thinking_budget: u32,
    pub temperature: f32,
    pub max_output_tokens: u32,
}

impl Default for ProviderRequest {
    fn default() -> Self {
        Self {
            system_instruction: None,
            thinking_budget: 0,
            // Low temperature for legal analysis.
            temperature: 0.2,
            max_output_tokens: 8192,
        }
    }
}

/// Raw provider output for one successful attempt.
#[derive(Debug, Clone)]
pub struct ProviderResponse {
    pub text: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub thinking_tokens: u64,
}

/// A model provider SDK. Implementations map their native failures into the
/// crate error taxonomy; the router decides what to retry.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    async fn generate(
        &self,
        model: &str,
        prompt: &str,
        request: &ProviderRequest,
    ) -> CoreResult<ProviderResponse>;
}

/// Embedding provider. Kept separate from [`ModelProvider`] because the
/// embedding model is not tier-routed.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, texts: &[String]) -> CoreResult<Vec<Vec<f32>>>;
}

/// Per-call knobs for [`ModelRouter::generate`].
#[derive(Debug, Clone, Default)]
pub struct GenerateOptions {
    pub thinking_budget: Option<u32>,
    pub system_instruction: Option<String>,
    pub timeout: Option<Duration>,
}

/// Result from a generation request, with the attempt's token usage and the
/// computed cost in USD.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationResult {
    pub text: String,
    pub model: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub thinking_tokens: u64,
    pub cost: f64,
}

/// Routes generation requests to the model for a task's complexity tier.
pub struct ModelRouter {
    provider: Arc<dyn ModelProvider>,
    config: RouterConfig,
    breaker: CircuitBreaker,
}

impl ModelRouter {
    pub fn new(provider: Arc<dyn ModelProvider>, config: RouterConfig) -> Self {
        let breaker = CircuitBreaker::new(
            "model_provider",
            config.breaker_fail_max,
            Duration::from_secs(config.breaker_reset_secs),
        );
        Self {
            provider,
            config,
            breaker,
        }
    }

    /// Generate content with the model routed for `complexity`.
    ///
    /// One breaker admission covers the whole call; retries happen inside
    /// it, and the call counts as a single success or failure against the
    /// breaker. A call that recovers on a retry returns only the successful
    /// attempt's tokens and cost.
    pub async fn generate(
        &self,
        prompt: &str,
        complexity: TaskComplexity,
        options: GenerateOptions,
        deadline: Deadline,
    ) -> CoreResult<GenerationResult> {
        if prompt.trim().is_empty() {
            return Err(CoreError::invalid_input("prompt must not be empty"));
        }
        self.breaker.try_acquire()?;

        let spec = model_spec(complexity);
        let thinking_budget = match options.thinking_budget {
            Some(budget) if spec.supports_thinking => budget,
            Some(budget) if budget > 0 => {
                tracing::debug!(
                    model = spec.name,
                    budget,
                    "thinking budget ignored for non-reasoning tier"
                );
                0
            }
            _ => 0,
        };
        let request = ProviderRequest {
            system_instruction: options.system_instruction,
            thinking_budget,
            ..ProviderRequest::default()
        };

        let per_attempt = options
            .timeout
            .unwrap_or_else(|| self.config.default_timeout())
            .min(self.config.max_timeout());
        let base = Duration::from_millis(self.config.backoff_base_ms);
        let cap = Duration::from_millis(self.config.backoff_cap_ms);

        let mut last_error = CoreError::fatal("no generation attempt was made");
        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                tokio::time::sleep(backoff_with_jitter(attempt - 1, base, cap)).await;
            }
            if deadline.expired() {
                last_error = CoreError::timeout("deadline expired before attempt");
                break;
            }
            let attempt_timeout = deadline.clamp(per_attempt);

            match tokio::time::timeout(
                attempt_timeout,
                self.provider.generate(spec.name, prompt, &request),
            )
            .await
            {
                Ok(Ok(response)) => {
                    self.breaker.on_success();
                    let cost = calculate_cost(spec, &response);
                    tracing::info!(
                        model = spec.name,
                        input_tokens = response.input_tokens,
                        output_tokens = response.output_tokens,
                        thinking_tokens = response.thinking_tokens,
                        cost,
                        attempt,
                        "generation_complete"
                    );
                    return Ok(GenerationResult {
                        text: response.text,
                        model: spec.name.to_string(),
                        input_tokens: response.input_tokens,
                        output_tokens: response.output_tokens,
                        thinking_tokens: response.thinking_tokens,
                        cost,
                    });
                }
                Ok(Err(err)) => {
                    if !err.is_retryable() {
                        self.breaker.on_failure();
                        tracing::error!(
                            model = spec.name,
                            kind = err.kind.as_str(),
                            error = %err,
                            "generation_failed"
                        );
                        return Err(err);
                    }
                    tracing::warn!(
                        model = spec.name,
                        attempt,
                        kind = err.kind.as_str(),
                        error = %err,
                        "generation_attempt_failed"
                    );
                    last_error = err;
                }
                Err(_elapsed) => {
                    tracing::warn!(
                        model = spec.name,
                        attempt,
                        timeout_ms = attempt_timeout.as_millis() as u64,
                        "generation_attempt_timed_out"
                    );
                    last_error = CoreError::timeout(format!(
                        "generation exceeded {} ms",
                        attempt_timeout.as_millis()
                    ));
                }
            }
        }

        self.breaker.on_failure();
        tracing::error!(
            model = spec.name,
            kind = last_error.kind.as_str(),
            error = %last_error,
            "generation_retries_exhausted"
        );
        Err(last_error)
    }

    /// Breaker state, for health reporting.
    pub fn breaker_state(&self) -> resilience::BreakerState {
        self.breaker.state()
    }
}

/// Cost of one attempt under a model's price schedule, rounded to 6 decimals.
fn calculate_cost(spec: &ModelSpec, response: &ProviderResponse) -> f64 {
    let input = response.input_tokens as f64 / 1_000_000.0 * spec.input_per_1m;
    let output = response.output_tokens as f64 / 1_000_000.0 * spec.output_per_1m;
    let thinking = match spec.thinking_per_1m {
        Some(price) if response.thinking_tokens > 0 => {
            response.thinking_tokens as f64 / 1_000_000.0 * price
        }
        _ => 0.0,
    };
    ((input + output + thinking) * 1e6).round() / 1e6
}
