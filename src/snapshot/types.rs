//! Behavioral snapshot types.
//!
//! A snapshot is one timed aggregation of interaction metrics for a session.
//! The capture layer produces them; this crate only carries them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Typing metrics for one emission tick.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TypingMetrics {
    pub words_per_minute: f64,
    pub keystroke_count: u64,
    /// Backspaces and deletes
    pub correction_count: u64,
    /// 0-100
    pub accuracy_percent: f64,
}

/// Pointer metrics for one emission tick.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MouseMetrics {
    pub click_count: u64,
    pub total_distance_pixels: f64,
    pub average_speed_pixels_per_second: f64,
    pub idle_time_ms: u64,
}

/// Scroll metrics for one emission tick.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScrollMetrics {
    /// 0-100
    pub max_depth_percent: f64,
    /// 0-100
    pub current_depth_percent: f64,
    pub total_scroll_distance_pixels: f64,
    pub scroll_speed_pixels_per_second: f64,
}

/// Focus and tab-visibility metrics for one emission tick.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FocusMetrics {
    pub focus_event_count: u64,
    pub blur_event_count: u64,
    pub total_focus_time_ms: u64,
    pub tab_switch_count: u64,
}

/// One observation unit, produced per session per emission tick.
///
/// Missing metric groups and missing numeric fields decode as zero. A missing
/// `createdAt` decodes as the time of decoding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricSnapshot {
    /// Stable identifier of the browsing session
    pub session_id: String,
    #[serde(default)]
    pub typing: TypingMetrics,
    #[serde(default)]
    pub mouse: MouseMetrics,
    #[serde(default)]
    pub scroll: ScrollMetrics,
    #[serde(default)]
    pub focus: FocusMetrics,
    #[serde(default)]
    pub session_duration_ms: u64,
    #[serde(default)]
    pub page_url: String,
    #[serde(default)]
    pub user_agent: String,
    /// Time of emission
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl MetricSnapshot {
    /// Create an empty snapshot for a session, stamped now.
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            typing: TypingMetrics::default(),
            mouse: MouseMetrics::default(),
            scroll: ScrollMetrics::default(),
            focus: FocusMetrics::default(),
            session_duration_ms: 0,
            page_url: String::new(),
            user_agent: String::new(),
            created_at: Utc::now(),
        }
    }

    /// The snapshot a host emits once when a page first loads.
    pub fn page_load(
        session_id: impl Into<String>,
        page_url: impl Into<String>,
        user_agent: impl Into<String>,
    ) -> Self {
        let mut snapshot = Self::new(session_id);
        snapshot.typing.accuracy_percent = 100.0;
        snapshot.page_url = page_url.into();
        snapshot.user_agent = user_agent.into();
        snapshot
    }

    /// Override the emission timestamp.
    pub fn at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }
}
