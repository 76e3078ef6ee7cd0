use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::error::ErrorKind;

/// Risk classification bands. Scores 0-3 are low, 4-6 medium, 7-10 high.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    /// Band for a 0-10 risk score.
    pub fn from_score(score: u8) -> Self {
        match score {
            0..=3 => RiskLevel::Low,
            4..=6 => RiskLevel::Medium,
            _ => RiskLevel::High,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "low" => Some(RiskLevel::Low),
            "medium" => Some(RiskLevel::Medium),
            "high" => Some(RiskLevel::High),
            _ => None,
        }
    }
}

/// A clause the model flagged during risk analysis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConcerningClause {
    pub section: String,
    pub concern: String,
    pub risk_level: RiskLevel,
    #[serde(default)]
    pub recommendation: Option<String>,
}

/// Structured output of the risk-analysis stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskReport {
    pub risk_score: u8,
    pub risk_level: RiskLevel,
    #[serde(default)]
    pub concerning_clauses: Vec<ConcerningClause>,
    #[serde(default)]
    pub key_terms: HashMap<String, serde_json::Value>,
}

impl RiskReport {
    /// Clamp the score to 0-10 and force the level into the score's band.
    /// Model output occasionally disagrees with itself; the band wins.
    pub fn normalize(&mut self) {
        if self.risk_score > 10 {
            self.risk_score = 10;
        }
        let banded = RiskLevel::from_score(self.risk_score);
        if self.risk_level != banded {
            tracing::warn!(
                score = self.risk_score,
                reported = self.risk_level.as_str(),
                banded = banded.as_str(),
                "risk_level inconsistent with score, using band"
            );
            self.risk_level = banded;
        }
    }
}

/// One accumulated failure or skip from a pipeline stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEntry {
    pub stage: String,
    /// Absent for stages that were skipped rather than failed.
    pub kind: Option<ErrorKind>,
    pub message: String,
}

impl ErrorEntry {
    pub fn failure(stage: &str, kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            stage: stage.to_string(),
            kind: Some(kind),
            message: message.into(),
        }
    }

    pub fn skip(stage: &str, message: impl Into<String>) -> Self {
        Self {
            stage: stage.to_string(),
            kind: None,
            message: message.into(),
        }
    }
}

/// Cooperative cancellation signal passed down through every public
/// operation. Stages derive per-call timeouts from the remaining budget, so
/// an expired deadline short-circuits the rest of a run.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    at: Instant,
}

impl Deadline {
    pub fn after(budget: Duration) -> Self {
        Self {
            at: Instant::now() + budget,
        }
    }

    /// A deadline so far away it never fires. For callers that cancel by
    /// dropping the future instead.
    pub fn none() -> Self {
        Self::after(Duration::from_secs(86_400))
    }

    pub fn remaining(&self) -> Duration {
        self.at.saturating_duration_since(Instant::now())
    }

    pub fn expired(&self) -> bool {
        self.remaining().is_zero()
    }

    /// The smaller of `wanted` and what is left on this deadline.
    pub fn clamp(&self, wanted: Duration) -> Duration {
        wanted.min(self.remaining())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn score_bands() {
        assert_eq!(RiskLevel::from_score(0), RiskLevel::Low);
        assert_eq!(RiskLevel::from_score(3), RiskLevel::Low);
        assert_eq!(RiskLevel::from_score(4), RiskLevel::Medium);
        assert_eq!(RiskLevel::from_score(6), RiskLevel::Medium);
        assert_eq!(RiskLevel::from_score(7), RiskLevel::High);
        assert_eq!(RiskLevel::from_score(10), RiskLevel::High);
    }

    #[test]
    fn normalize_forces_band_consistency() {
        let mut report = RiskReport {
            risk_score: 9,
            risk_level: RiskLevel::Low,
            concerning_clauses: Vec::new(),
            key_terms: HashMap::new(),
        };
        report.normalize();
        assert_eq!(report.risk_level, RiskLevel::High);
    }

    #[test]
    fn normalize_clamps_score() {
        let mut report = RiskReport {
            risk_score: 42,
            risk_level: RiskLevel::High,
            concerning_clauses: Vec::new(),
            key_terms: HashMap::new(),
        };
        report.normalize();
        assert_eq!(report.risk_score, 10);
        assert_eq!(report.risk_level, RiskLevel::High);
    }

    #[test]
    fn risk_level_serde_is_lowercase() {
        let json = serde_json::to_string(&RiskLevel::Medium).unwrap();
        assert_eq!(json, "\"medium\"");
        let back: RiskLevel = serde_json::from_str("\"high\"").unwrap();
        assert_eq!(back, RiskLevel::High);
    }

    #[test]
    fn deadline_clamps_to_remaining() {
        let deadline = Deadline::after(Duration::from_millis(50));
        let clamped = deadline.clamp(Duration::from_secs(30));
        assert!(clamped <= Duration::from_millis(50));
        assert!(!deadline.expired());
    }
}
