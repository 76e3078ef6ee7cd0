//! Key-value counter store behind the cost ledger.
//!
//! Models the subset of a Redis-style store the ledger needs: per-key hash
//! fields with atomic increments and key TTLs. Production deployments bind
//! this to an external store; [`MemoryCounterStore`] backs tests and
//! single-process use.

use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::error::{CoreError, CoreResult};

#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Atomically add `delta` to an integer hash field, creating it at zero.
    async fn hincr(&self, key: &str, field: &str, delta: i64) -> CoreResult<()>;

    /// Atomically add `delta` to a float hash field, creating it at zero.
    async fn hincr_float(&self, key: &str, field: &str, delta: f64) -> CoreResult<()>;

    /// Set string fields on a hash, replacing existing values.
    async fn hset(&self, key: &str, fields: HashMap<String, String>) -> CoreResult<()>;

    /// All fields of a hash, stringified. Missing key yields an empty map.
    async fn hgetall(&self, key: &str) -> CoreResult<HashMap<String, String>>;

    /// Set the key's time-to-live, replacing any previous TTL.
    async fn expire(&self, key: &str, ttl: Duration) -> CoreResult<()>;

    async fn delete(&self, key: &str) -> CoreResult<()>;
}

#[derive(Debug, Clone)]
enum FieldValue {
    Int(i64),
    Float(f64),
    Text(String),
}

impl FieldValue {
    fn render(&self) -> String {
        match self {
            FieldValue::Int(v) => v.to_string(),
            FieldValue::Float(v) => v.to_string(),
            FieldValue::Text(v) => v.clone(),
        }
    }
}

#[derive(Debug)]
struct Hash {
    fields: HashMap<String, FieldValue>,
    expires_at: Option<Instant>,
}

impl Hash {
    fn new() -> Self {
        Self {
            fields: HashMap::new(),
            expires_at: None,
        }
    }

    fn expired(&self) -> bool {
        self.expires_at.is_some_and(|at| at <= Instant::now())
    }
}

/// In-memory [`CounterStore`]. Per-key operations are atomic (the map locks
/// the key's shard for the duration of the mutation) and TTLs are honoured
/// lazily on access.
#[derive(Default)]
pub struct MemoryCounterStore {
    hashes: DashMap<String, Hash>,
}

impl MemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_hash<T>(&self, key: &str, op: impl FnOnce(&mut Hash) -> T) -> T {
        let mut entry = self.hashes.entry(key.to_string()).or_insert_with(Hash::new);
        if entry.expired() {
            *entry = Hash::new();
        }
        op(&mut entry)
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn hincr(&self, key: &str, field: &str, delta: i64) -> CoreResult<()> {
        self.with_hash(key, |hash| {
            match hash
                .fields
                .entry(field.to_string())
                .or_insert(FieldValue::Int(0))
            {
                FieldValue::Int(current) => {
                    *current += delta;
                    Ok(())
                }
                _ => Err(CoreError::integrity(format!(
                    "field {field} is not an integer counter"
                ))),
            }
        })
    }

    async fn hincr_float(&self, key: &str, field: &str, delta: f64) -> CoreResult<()> {
        self.with_hash(key, |hash| {
            match hash
                .fields
                .entry(field.to_string())
                .or_insert(FieldValue::Float(0.0))
            {
                FieldValue::Float(current) => {
                    *current += delta;
                    Ok(())
                }
                _ => Err(CoreError::integrity(format!(
                    "field {field} is not a float counter"
                ))),
            }
        })
    }

    async fn hset(&self, key: &str, fields: HashMap<String, String>) -> CoreResult<()> {
        self.with_hash(key, |hash| {
            for (field, value) in fields {
                hash.fields.insert(field, FieldValue::Text(value));
            }
        });
        Ok(())
    }

    async fn hgetall(&self, key: &str) -> CoreResult<HashMap<String, String>> {
        let Some(entry) = self.hashes.get(key) else {
            return Ok(HashMap::new());
        };
        if entry.expired() {
            return Ok(HashMap::new());
        }
        Ok(entry
            .fields
            .iter()
            .map(|(field, value)| (field.clone(), value.render()))
            .collect())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> CoreResult<()> {
        if let Some(mut entry) = self.hashes.get_mut(key) {
            entry.expires_at = Some(Instant::now() + ttl);
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> CoreResult<()> {
        self.hashes.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn increments_accumulate() {
        let store = MemoryCounterStore::new();
        store.hincr("k", "calls", 1).await.unwrap();
        store.hincr("k", "calls", 2).await.unwrap();
        store.hincr_float("k", "cost", 0.5).await.unwrap();
        store.hincr_float("k", "cost", 0.25).await.unwrap();

        let all = store.hgetall("k").await.unwrap();
        assert_eq!(all["calls"], "3");
        assert_eq!(all["cost"], "0.75");
    }

    #[tokio::test]
    async fn missing_key_reads_empty() {
        let store = MemoryCounterStore::new();
        assert!(store.hgetall("nope").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn type_confusion_is_an_integrity_error() {
        let store = MemoryCounterStore::new();
        store.hincr("k", "f", 1).await.unwrap();
        assert!(store.hincr_float("k", "f", 1.0).await.is_err());
    }

    #[tokio::test]
    async fn expired_keys_read_empty_and_reset_on_write() {
        let store = MemoryCounterStore::new();
        store.hincr("k", "calls", 5).await.unwrap();
        store.expire("k", Duration::from_millis(10)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(25)).await;

        assert!(store.hgetall("k").await.unwrap().is_empty());
        // A write after expiry starts a fresh hash.
        store.hincr("k", "calls", 1).await.unwrap();
        assert_eq!(store.hgetall("k").await.unwrap()["calls"], "1");
    }

    #[tokio::test]
    async fn delete_removes_the_key() {
        let store = MemoryCounterStore::new();
        store.hincr("k", "calls", 1).await.unwrap();
        store.delete("k").await.unwrap();
        assert!(store.hgetall("k").await.unwrap().is_empty());
    }
}
