//! Risk rules as independent predicate + label pairs.

use crate::reconcile::ReconciledRecord;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

pub const UNUSUAL_TYPING_SPEED: &str = "Unusual typing speed";
pub const HIGH_MOUSE_VELOCITY: &str = "High mouse velocity";
pub const RAPID_SCROLLING: &str = "Rapid scrolling";
pub const LOW_FOCUS_TIME: &str = "Low focus time";
pub const HIGH_CORRECTIONS: &str = "High corrections";

/// Bounds used by the built-in rules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskThresholds {
    /// Typing above this WPM is suspicious
    pub max_wpm: f64,
    /// Typing below this WPM is suspicious
    pub min_wpm: f64,
    /// Pixels per second
    pub max_mouse_velocity: f64,
    /// Pixels per second
    pub max_scroll_speed: f64,
    /// Less total focus than this is suspicious
    pub min_focus_time_ms: u64,
    /// Corrections above this fraction of keystrokes are suspicious
    pub correction_ratio: f64,
}

impl Default for RiskThresholds {
    fn default() -> Self {
        Self {
            max_wpm: 120.0,
            min_wpm: 10.0,
            max_mouse_velocity: 1000.0,
            max_scroll_speed: 500.0,
            min_focus_time_ms: 5000,
            correction_ratio: 0.3,
        }
    }
}

type Predicate = dyn Fn(&ReconciledRecord) -> bool + Send + Sync;

/// A named condition over a reconciled record.
#[derive(Clone)]
pub struct RiskRule {
    label: String,
    predicate: Arc<Predicate>,
}

impl RiskRule {
    pub fn new<F>(label: impl Into<String>, predicate: F) -> Self
    where
        F: Fn(&ReconciledRecord) -> bool + Send + Sync + 'static,
    {
        Self {
            label: label.into(),
            predicate: Arc::new(predicate),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn triggered(&self, record: &ReconciledRecord) -> bool {
        (self.predicate)(record)
    }
}

impl fmt::Debug for RiskRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RiskRule")
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}

/// The five built-in rules.
pub fn default_rules(thresholds: &RiskThresholds) -> Vec<RiskRule> {
    let (max_wpm, min_wpm) = (thresholds.max_wpm, thresholds.min_wpm);
    let max_velocity = thresholds.max_mouse_velocity;
    let max_scroll = thresholds.max_scroll_speed;
    let min_focus = thresholds.min_focus_time_ms;
    let ratio = thresholds.correction_ratio;

    vec![
        RiskRule::new(UNUSUAL_TYPING_SPEED, move |r| {
            r.typing_wpm > max_wpm || r.typing_wpm < min_wpm
        }),
        RiskRule::new(HIGH_MOUSE_VELOCITY, move |r| r.mouse_velocity > max_velocity),
        RiskRule::new(RAPID_SCROLLING, move |r| r.scroll_speed > max_scroll),
        RiskRule::new(LOW_FOCUS_TIME, move |r| r.focus_time < min_focus),
        RiskRule::new(HIGH_CORRECTIONS, move |r| {
            r.typing_corrections as f64 > ratio * r.typing_keystrokes as f64
        }),
    ]
}
