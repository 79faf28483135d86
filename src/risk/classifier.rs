//! Flat-weight scoring over the rule list.

use crate::reconcile::ReconciledRecord;
use crate::risk::rules::{default_rules, RiskRule, RiskThresholds};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Points contributed by each triggered factor.
pub const POINTS_PER_FACTOR: u32 = 20;

/// Severity tier derived from a score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskTier {
    Low,
    Medium,
    High,
}

impl RiskTier {
    pub fn from_score(score: u8) -> Self {
        match score {
            70.. => RiskTier::High,
            40..=69 => RiskTier::Medium,
            _ => RiskTier::Low,
        }
    }
}

impl fmt::Display for RiskTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match self {
            RiskTier::Low => "LOW",
            RiskTier::Medium => "MEDIUM",
            RiskTier::High => "HIGH",
        })
    }
}

/// Classifier output for one session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskAssessment {
    pub session_id: String,
    /// 0 to 100
    pub score: u8,
    /// Triggered factor labels in rule order
    pub factors: Vec<String>,
    pub tier: RiskTier,
}

/// Evaluates every rule against a record and scores the result.
#[derive(Debug, Clone)]
pub struct RiskClassifier {
    rules: Vec<RiskRule>,
    points_per_factor: u32,
}

impl Default for RiskClassifier {
    fn default() -> Self {
        Self::from_thresholds(&RiskThresholds::default())
    }
}

impl RiskClassifier {
    /// A classifier over an explicit rule list.
    pub fn new(rules: Vec<RiskRule>) -> Self {
        Self {
            rules,
            points_per_factor: POINTS_PER_FACTOR,
        }
    }

    /// The built-in rules with the given bounds.
    pub fn from_thresholds(thresholds: &RiskThresholds) -> Self {
        Self::new(default_rules(thresholds))
    }

    pub fn with_rule(mut self, rule: RiskRule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn rules(&self) -> &[RiskRule] {
        &self.rules
    }

    pub fn classify(&self, record: &ReconciledRecord) -> RiskAssessment {
        let mut factors: Vec<String> = Vec::new();
        for rule in &self.rules {
            if rule.triggered(record) && !factors.iter().any(|f| f == rule.label()) {
                factors.push(rule.label().to_string());
            }
        }

        let raw = (factors.len() as u32).saturating_mul(self.points_per_factor);
        let score = raw.min(100) as u8;

        RiskAssessment {
            session_id: record.session_id.clone(),
            score,
            factors,
            tier: RiskTier::from_score(score),
        }
    }
}
