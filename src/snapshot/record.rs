//! Flat session row as stored by the persistence sink.

use crate::snapshot::types::MetricSnapshot;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Table a row was read from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordSource {
    /// Upserted behavioral row
    #[default]
    Behavior,
    /// Appended shop activity row
    Activity,
}

/// One persisted row, either from the behavioral table (one upserted row per
/// session) or from the activity table (shop actions tagged with a session).
///
/// `created_at` is kept as the raw stored string; it may be missing or
/// malformed and the reconciler decides what to do with it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionRecord {
    pub session_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    pub page_url: String,
    pub user_agent: String,

    pub typing_wpm: f64,
    pub typing_keystrokes: u64,
    pub typing_corrections: u64,

    pub mouse_clicks: u64,
    pub mouse_movements: u64,
    pub mouse_velocity: f64,
    pub mouse_idle_time: u64,

    pub scroll_depth: f64,
    pub scroll_speed: f64,
    pub scroll_events: u64,

    pub focus_changes: u64,
    pub focus_time: u64,
    pub tab_switches: u64,

    pub session_duration: u64,
    pub page_views: u64,
    pub interactions_count: u64,

    pub cart_actions: u64,
    pub wishlist_actions: u64,
    pub category_changes: u64,
    pub searches: u64,
    /// Distinct product ids viewed, in first-seen order
    pub product_views: Vec<u64>,

    /// Score assigned by the server-side login gate, when present
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gate_score: Option<u32>,

    /// Set by the store from the table the row lives in
    pub source: RecordSource,
}

impl SessionRecord {
    /// An empty row for a session, stamped at the given time.
    pub fn new(session_id: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            session_id: session_id.into(),
            created_at: Some(format_timestamp(created_at)),
            ..Self::default()
        }
    }

    /// Parse `created_at`, if present and well-formed.
    pub fn parsed_created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
            .as_deref()
            .and_then(|raw| DateTime::parse_from_rfc3339(raw.trim()).ok())
            .map(|ts| ts.with_timezone(&Utc))
    }
}

impl From<&MetricSnapshot> for SessionRecord {
    fn from(snapshot: &MetricSnapshot) -> Self {
        let scroll_events = (snapshot.scroll.total_scroll_distance_pixels / 100.0).round();

        Self {
            session_id: snapshot.session_id.clone(),
            created_at: Some(format_timestamp(snapshot.created_at)),
            page_url: snapshot.page_url.clone(),
            user_agent: snapshot.user_agent.clone(),
            typing_wpm: snapshot.typing.words_per_minute,
            typing_keystrokes: snapshot.typing.keystroke_count,
            typing_corrections: snapshot.typing.correction_count,
            mouse_clicks: snapshot.mouse.click_count,
            mouse_movements: snapshot.mouse.total_distance_pixels.round().max(0.0) as u64,
            mouse_velocity: snapshot.mouse.average_speed_pixels_per_second,
            mouse_idle_time: snapshot.mouse.idle_time_ms,
            scroll_depth: snapshot.scroll.max_depth_percent,
            scroll_speed: snapshot.scroll.scroll_speed_pixels_per_second,
            scroll_events: scroll_events.max(0.0) as u64,
            focus_changes: snapshot.focus.focus_event_count,
            focus_time: snapshot.focus.total_focus_time_ms,
            tab_switches: snapshot.focus.tab_switch_count,
            session_duration: snapshot.session_duration_ms,
            page_views: 1,
            interactions_count: snapshot
                .mouse
                .click_count
                .saturating_add(snapshot.typing.keystroke_count),
            ..Self::default()
        }
    }
}

impl From<MetricSnapshot> for SessionRecord {
    fn from(snapshot: MetricSnapshot) -> Self {
        Self::from(&snapshot)
    }
}

fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}
