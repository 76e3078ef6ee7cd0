//! Cost accounting for model calls.
//!
//! Every generation records a raw per-call entry plus atomic increments to a
//! set of per-day aggregate counters, bucketed by UTC calendar day. The
//! backing store is a key-value collaborator with per-key atomic hash
//! counters and TTL support; an in-memory implementation lives in
//! [`store`].

pub mod store;

use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::config::LedgerConfig;
use crate::error::{CoreError, CoreResult};
use store::CounterStore;

const KEY_PREFIX_DAILY: &str = "cost:daily:";
const KEY_PREFIX_CALL: &str = "cost:call:";

/// One recorded model call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostEntry {
    /// UTC calendar day the call is bucketed under.
    pub day: NaiveDate,
    pub model: String,
    /// Operation label: `parse`, `analyze`, `query`, ...
    pub operation: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub thinking_tokens: u64,
    pub cost: f64,
    pub occurred_at: DateTime<Utc>,
    pub contract_id: Option<String>,
}

impl CostEntry {
    /// Entry stamped with the current UTC time and day.
    pub fn now(
        model: impl Into<String>,
        operation: impl Into<String>,
        input_tokens: u64,
        output_tokens: u64,
        thinking_tokens: u64,
        cost: f64,
    ) -> Self {
        let occurred_at = Utc::now();
        Self {
            day: occurred_at.date_naive(),
            model: model.into(),
            operation: operation.into(),
            input_tokens,
            output_tokens,
            thinking_tokens,
            cost,
            occurred_at,
            contract_id: None,
        }
    }

    pub fn with_contract(mut self, contract_id: impl Into<String>) -> Self {
        self.contract_id = Some(contract_id.into());
        self
    }

    fn total_tokens(&self) -> u64 {
        self.input_tokens + self.output_tokens + self.thinking_tokens
    }
}

/// Per-model slice of a day's aggregate.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelCost {
    pub model: String,
    pub calls: u64,
    pub cost: f64,
    pub tokens: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub thinking_tokens: u64,
}

/// Per-operation slice of a day's aggregate.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OperationCost {
    pub calls: u64,
    pub cost: f64,
}

/// Aggregate for one UTC day (or a summed range of days).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DailyCost {
    pub date: String,
    pub total_calls: u64,
    pub total_cost: f64,
    pub total_tokens: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub thinking_tokens: u64,
    pub by_model: Vec<ModelCost>,
    pub by_operation: HashMap<String, OperationCost>,
}

impl DailyCost {
    fn zeroed(date: NaiveDate) -> Self {
        Self {
            date: date.format("%Y-%m-%d").to_string(),
            ..Default::default()
        }
    }
}

/// Aggregate over an inclusive day range, with the per-day breakdown.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RangeCost {
    pub start_date: String,
    pub end_date: String,
    pub total: DailyCost,
    pub daily_breakdown: Vec<DailyCost>,
}

/// Records per-call cost metrics and serves daily aggregates.
pub struct CostLedger {
    store: Arc<dyn CounterStore>,
    config: LedgerConfig,
    dropped_entries: AtomicU64,
}

impl CostLedger {
    pub fn new(store: Arc<dyn CounterStore>, config: LedgerConfig) -> Self {
        Self {
            store,
            config,
            dropped_entries: AtomicU64::new(0),
        }
    }

    /// Record one model call: raw entry plus daily aggregate increments.
    ///
    /// With `fail_silently` set, backing-store write failures are logged and
    /// counted instead of surfaced.
    pub async fn record(&self, entry: &CostEntry) -> CoreResult<()> {
        match self.write(entry).await {
            Ok(()) => Ok(()),
            Err(err) if self.config.fail_silently => {
                self.dropped_entries.fetch_add(1, Ordering::Relaxed);
                tracing::error!(
                    error = %err,
                    model = %entry.model,
                    operation = %entry.operation,
                    "cost entry dropped"
                );
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    async fn write(&self, entry: &CostEntry) -> CoreResult<()> {
        let date_key = entry.day.format("%Y-%m-%d").to_string();

        // Raw per-call record, short retention, for detailed analysis.
        let call_key = format!(
            "{}{}:{}",
            KEY_PREFIX_CALL,
            date_key,
            entry.occurred_at.timestamp_nanos_opt().unwrap_or_default()
        );
        let mut fields = HashMap::new();
        fields.insert("model".to_string(), entry.model.clone());
        fields.insert("operation".to_string(), entry.operation.clone());
        fields.insert("input_tokens".to_string(), entry.input_tokens.to_string());
        fields.insert("output_tokens".to_string(), entry.output_tokens.to_string());
        fields.insert(
            "thinking_tokens".to_string(),
            entry.thinking_tokens.to_string(),
        );
        fields.insert("total_tokens".to_string(), entry.total_tokens().to_string());
        fields.insert("cost".to_string(), entry.cost.to_string());
        fields.insert("timestamp".to_string(), entry.occurred_at.to_rfc3339());
        if let Some(contract_id) = &entry.contract_id {
            fields.insert("contract_id".to_string(), contract_id.clone());
        }
        self.store.hset(&call_key, fields).await?;
        self.store
            .expire(&call_key, days(self.config.raw_retention_days))
            .await?;

        // Daily aggregates, incremented atomically per day key.
        let daily_key = format!("{}{}", KEY_PREFIX_DAILY, date_key);
        let incr_int: [(&str, u64); 5] = [
            ("total_calls", 1),
            ("total_tokens", entry.total_tokens()),
            ("input_tokens", entry.input_tokens),
            ("output_tokens", entry.output_tokens),
            ("thinking_tokens", entry.thinking_tokens),
        ];
        for (field, delta) in incr_int {
            self.store.hincr(&daily_key, field, delta as i64).await?;
        }
        self.store
            .hincr_float(&daily_key, "total_cost", entry.cost)
            .await?;

        let model = &entry.model;
        self.store
            .hincr(&daily_key, &format!("model:{model}:calls"), 1)
            .await?;
        self.store
            .hincr_float(&daily_key, &format!("model:{model}:cost"), entry.cost)
            .await?;
        self.store
            .hincr(
                &daily_key,
                &format!("model:{model}:tokens"),
                entry.total_tokens() as i64,
            )
            .await?;
        self.store
            .hincr(
                &daily_key,
                &format!("model:{model}:input_tokens"),
                entry.input_tokens as i64,
            )
            .await?;
        self.store
            .hincr(
                &daily_key,
                &format!("model:{model}:output_tokens"),
                entry.output_tokens as i64,
            )
            .await?;
        self.store
            .hincr(
                &daily_key,
                &format!("model:{model}:thinking_tokens"),
                entry.thinking_tokens as i64,
            )
            .await?;

        let operation = &entry.operation;
        self.store
            .hincr(&daily_key, &format!("operation:{operation}:calls"), 1)
            .await?;
        self.store
            .hincr_float(&daily_key, &format!("operation:{operation}:cost"), entry.cost)
            .await?;

        self.store
            .expire(&daily_key, days(self.config.aggregate_retention_days))
            .await?;

        tracing::debug!(
            model = %entry.model,
            operation = %entry.operation,
            tokens = entry.total_tokens(),
            cost = entry.cost,
            "cost entry recorded"
        );
        Ok(())
    }

    /// Aggregate for one UTC day. A day with no data returns a zeroed record.
    pub async fn daily(&self, day: NaiveDate) -> CoreResult<DailyCost> {
        let daily_key = format!("{}{}", KEY_PREFIX_DAILY, day.format("%Y-%m-%d"));
        let data = self.store.hgetall(&daily_key).await?;
        if data.is_empty() {
            return Ok(DailyCost::zeroed(day));
        }
        Ok(parse_daily(day, &data))
    }

    /// Summed aggregate for an inclusive day range, oldest day first.
    pub async fn range(&self, from: NaiveDate, to: NaiveDate) -> CoreResult<RangeCost> {
        if from > to {
            return Err(CoreError::invalid_input(format!(
                "range start {from} is after end {to}"
            )));
        }
        let mut breakdown = Vec::new();
        let mut current = from;
        while current <= to {
            breakdown.push(self.daily(current).await?);
            current += ChronoDuration::days(1);
        }

        let mut total = DailyCost::zeroed(from);
        total.date = format!("{}..{}", from.format("%Y-%m-%d"), to.format("%Y-%m-%d"));
        let mut models: HashMap<String, ModelCost> = HashMap::new();
        for day in &breakdown {
            total.total_calls += day.total_calls;
            total.total_cost += day.total_cost;
            total.total_tokens += day.total_tokens;
            total.input_tokens += day.input_tokens;
            total.output_tokens += day.output_tokens;
            total.thinking_tokens += day.thinking_tokens;
            for model in &day.by_model {
                let slot = models.entry(model.model.clone()).or_insert_with(|| ModelCost {
                    model: model.model.clone(),
                    ..Default::default()
                });
                slot.calls += model.calls;
                slot.cost += model.cost;
                slot.tokens += model.tokens;
                slot.input_tokens += model.input_tokens;
                slot.output_tokens += model.output_tokens;
                slot.thinking_tokens += model.thinking_tokens;
            }
            for (name, op) in &day.by_operation {
                let slot = total.by_operation.entry(name.clone()).or_default();
                slot.calls += op.calls;
                slot.cost += op.cost;
            }
        }
        let mut by_model: Vec<ModelCost> = models.into_values().collect();
        by_model.sort_by(|a, b| a.model.cmp(&b.model));
        total.by_model = by_model;

        Ok(RangeCost {
            start_date: from.format("%Y-%m-%d").to_string(),
            end_date: to.format("%Y-%m-%d").to_string(),
            total,
            daily_breakdown: breakdown,
        })
    }

    /// Entries lost to backing-store failures while running silently.
    pub fn dropped_entries(&self) -> u64 {
        self.dropped_entries.load(Ordering::Relaxed)
    }
}

fn days(count: u32) -> Duration {
    Duration::from_secs(count as u64 * 24 * 60 * 60)
}

/// Rebuild a [`DailyCost`] from the flat counter hash, splitting the
/// `model:{name}:{metric}` and `operation:{name}:{metric}` field encoding.
fn parse_daily(day: NaiveDate, data: &HashMap<String, String>) -> DailyCost {
    let int = |field: &str| -> u64 {
        data.get(field)
            .and_then(|v| v.parse::<f64>().ok())
            .map(|v| v as u64)
            .unwrap_or(0)
    };
    let float = |field: &str| -> f64 {
        data.get(field).and_then(|v| v.parse().ok()).unwrap_or(0.0)
    };

    let mut result = DailyCost::zeroed(day);
    result.total_calls = int("total_calls");
    result.total_cost = float("total_cost");
    result.total_tokens = int("total_tokens");
    result.input_tokens = int("input_tokens");
    result.output_tokens = int("output_tokens");
    result.thinking_tokens = int("thinking_tokens");

    let mut models: HashMap<String, ModelCost> = HashMap::new();
    let mut operations: HashMap<String, OperationCost> = HashMap::new();
    for (field, value) in data {
        if let Some(rest) = field.strip_prefix("model:") {
            // Model names never contain ':'; the final segment is the metric.
            let Some((model, metric)) = rest.rsplit_once(':') else {
                continue;
            };
            let slot = models.entry(model.to_string()).or_insert_with(|| ModelCost {
                model: model.to_string(),
                ..Default::default()
            });
            match metric {
                "calls" => slot.calls = value.parse().unwrap_or(0),
                "cost" => slot.cost = value.parse().unwrap_or(0.0),
                "tokens" => slot.tokens = value.parse().unwrap_or(0),
                "input_tokens" => slot.input_tokens = value.parse().unwrap_or(0),
                "output_tokens" => slot.output_tokens = value.parse().unwrap_or(0),
                "thinking_tokens" => slot.thinking_tokens = value.parse().unwrap_or(0),
                _ => {}
            }
        } else if let Some(rest) = field.strip_prefix("operation:") {
            let Some((operation, metric)) = rest.rsplit_once(':') else {
                continue;
            };
            let slot = operations.entry(operation.to_string()).or_default();
            match metric {
                "calls" => slot.calls = value.parse().unwrap_or(0),
                "cost" => slot.cost = value.parse().unwrap_or(0.0),
                _ => {}
            }
        }
    }

    let mut by_model: Vec<ModelCost> = models.into_values().collect();
    by_model.sort_by(|a, b| a.model.cmp(&b.model));
    result.by_model = by_model;
    result.by_operation = operations;
    result
}

#[cfg(test)]
mod tests {
    use super::store::MemoryCounterStore;
    use super::*;
    use async_trait::async_trait;

    fn ledger() -> CostLedger {
        CostLedger::new(
            Arc::new(MemoryCounterStore::new()),
            LedgerConfig {
                raw_retention_days: 7,
                aggregate_retention_days: 30,
                fail_silently: true,
            },
        )
    }

    fn entry(day: NaiveDate, model: &str, operation: &str, input: u64, output: u64, cost: f64) -> CostEntry {
        CostEntry {
            day,
            model: model.to_string(),
            operation: operation.to_string(),
            input_tokens: input,
            output_tokens: output,
            thinking_tokens: 0,
            cost,
            occurred_at: Utc::now(),
            contract_id: None,
        }
    }

    fn day(text: &str) -> NaiveDate {
        text.parse().unwrap()
    }

    #[tokio::test]
    async fn daily_reflects_recorded_entries() {
        let ledger = ledger();
        let d = day("2025-01-15");
        ledger
            .record(&entry(d, "M1", "analyze", 1000, 500, 0.001))
            .await
            .unwrap();
        ledger
            .record(&entry(d, "M1", "analyze", 1000, 500, 0.001))
            .await
            .unwrap();
        ledger
            .record(&entry(d, "M2", "query", 200, 50, 0.0005))
            .await
            .unwrap();

        let daily = ledger.daily(d).await.unwrap();
        assert_eq!(daily.total_calls, 3);
        assert!((daily.total_cost - 0.0025).abs() < 1e-9);
        assert_eq!(daily.input_tokens, 2200);
        assert_eq!(daily.output_tokens, 1050);
        assert_eq!(daily.total_tokens, 3250);

        let m1 = daily.by_model.iter().find(|m| m.model == "M1").unwrap();
        assert_eq!(m1.calls, 2);
        assert!((m1.cost - 0.002).abs() < 1e-9);
        let m2 = daily.by_model.iter().find(|m| m.model == "M2").unwrap();
        assert_eq!(m2.calls, 1);
        assert!((m2.cost - 0.0005).abs() < 1e-9);

        assert_eq!(daily.by_operation["analyze"].calls, 2);
        assert_eq!(daily.by_operation["query"].calls, 1);
    }

    #[tokio::test]
    async fn missing_day_is_zeroed() {
        let ledger = ledger();
        let daily = ledger.daily(day("2025-03-01")).await.unwrap();
        assert_eq!(daily.total_calls, 0);
        assert_eq!(daily.total_cost, 0.0);
        assert!(daily.by_model.is_empty());
        assert!(daily.by_operation.is_empty());
        assert_eq!(daily.date, "2025-03-01");
    }

    #[tokio::test]
    async fn range_sums_days_inclusively() {
        let ledger = ledger();
        ledger
            .record(&entry(day("2025-01-01"), "M1", "analyze", 100, 10, 0.01))
            .await
            .unwrap();
        ledger
            .record(&entry(day("2025-01-02"), "M1", "query", 100, 10, 0.02))
            .await
            .unwrap();
        ledger
            .record(&entry(day("2025-01-03"), "M2", "query", 100, 10, 0.03))
            .await
            .unwrap();

        let range = ledger.range(day("2025-01-01"), day("2025-01-03")).await.unwrap();
        assert_eq!(range.total.total_calls, 3);
        assert!((range.total.total_cost - 0.06).abs() < 1e-9);
        assert_eq!(range.daily_breakdown.len(), 3);
        assert_eq!(range.total.by_operation["query"].calls, 2);
        let m1 = range.total.by_model.iter().find(|m| m.model == "M1").unwrap();
        assert_eq!(m1.calls, 2);
    }

    #[tokio::test]
    async fn range_rejects_inverted_bounds() {
        let ledger = ledger();
        let err = ledger
            .range(day("2025-01-03"), day("2025-01-01"))
            .await
            .unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::InvalidInput);
    }

    #[tokio::test]
    async fn concurrent_records_lose_no_updates() {
        let ledger = Arc::new(ledger());
        let d = day("2025-02-01");
        let mut handles = Vec::new();
        for _ in 0..16 {
            let ledger = ledger.clone();
            handles.push(tokio::spawn(async move {
                for _ in 0..25 {
                    ledger
                        .record(&entry(d, "M1", "analyze", 10, 5, 0.0001))
                        .await
                        .unwrap();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        let daily = ledger.daily(d).await.unwrap();
        assert_eq!(daily.total_calls, 400);
        assert_eq!(daily.input_tokens, 4000);
        assert!((daily.total_cost - 0.04).abs() < 1e-6);
    }

    struct FailingStore;

    #[async_trait]
    impl CounterStore for FailingStore {
        async fn hincr(&self, _key: &str, _field: &str, _delta: i64) -> CoreResult<()> {
            Err(CoreError::transient("store down"))
        }
        async fn hincr_float(&self, _key: &str, _field: &str, _delta: f64) -> CoreResult<()> {
            Err(CoreError::transient("store down"))
        }
        async fn hset(&self, _key: &str, _fields: HashMap<String, String>) -> CoreResult<()> {
            Err(CoreError::transient("store down"))
        }
        async fn hgetall(&self, _key: &str) -> CoreResult<HashMap<String, String>> {
            Err(CoreError::transient("store down"))
        }
        async fn expire(&self, _key: &str, _ttl: Duration) -> CoreResult<()> {
            Err(CoreError::transient("store down"))
        }
        async fn delete(&self, _key: &str) -> CoreResult<()> {
            Err(CoreError::transient("store down"))
        }
    }

    #[tokio::test]
    async fn silent_mode_swallows_write_errors_and_counts_drops() {
        let ledger = CostLedger::new(
            Arc::new(FailingStore),
            LedgerConfig {
                raw_retention_days: 7,
                aggregate_retention_days: 30,
                fail_silently: true,
            },
        );
        ledger
            .record(&entry(day("2025-01-15"), "M1", "analyze", 1, 1, 0.0))
            .await
            .unwrap();
        assert_eq!(ledger.dropped_entries(), 1);
    }

    #[tokio::test]
    async fn loud_mode_surfaces_write_errors_and_reads_always_surface() {
        let ledger = CostLedger::new(
            Arc::new(FailingStore),
            LedgerConfig {
                raw_retention_days: 7,
                aggregate_retention_days: 30,
                fail_silently: false,
            },
        );
        assert!(ledger
            .record(&entry(day("2025-01-15"), "M1", "analyze", 1, 1, 0.0))
            .await
            .is_err());
        assert!(ledger.daily(day("2025-01-15")).await.is_err());
    }
}
