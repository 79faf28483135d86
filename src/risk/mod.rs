//! Threshold-based risk classification.
//!
//! Every point of a score traces back to one named factor: each triggered
//! rule adds a flat 20 points, capped at 100.

mod classifier;
mod rules;

pub use classifier::{RiskAssessment, RiskClassifier, RiskTier, POINTS_PER_FACTOR};
pub use rules::{
    default_rules, RiskRule, RiskThresholds, HIGH_CORRECTIONS, HIGH_MOUSE_VELOCITY,
    LOW_FOCUS_TIME, RAPID_SCROLLING, UNUSUAL_TYPING_SPEED,
};
