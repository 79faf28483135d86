//! The per-session accumulator and its field merge policy.

use crate::snapshot::{RecordSource, SessionRecord};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One row per session, folded from every surviving record of that session.
///
/// | Policy | Fields |
/// |---|---|
/// | sum | keystrokes, corrections, clicks, movements, scroll events, focus changes, tab switches, page views, interactions, cart/wishlist/category/search actions |
/// | max | scroll depth, focus time, idle time, session duration, `last_seen` |
/// | min | `first_seen` |
/// | latest | typing WPM, mouse velocity, scroll speed, page URL, user agent, gate score |
/// | union | product views (first-seen order) |
///
/// "Latest" prefers dated records over undated ones. The three rates are
/// measured only by behavioral rows, so those also win over activity rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciledRecord {
    pub session_id: String,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
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
    pub product_views: Vec<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub gate_score: Option<u32>,

    /// Number of records folded into this one
    pub source_records: usize,

    /// Precedence of the record the rate fields came from
    #[serde(skip)]
    rates_from: RatePrecedence,
    /// Precedence of the record URL, UA and gate score came from
    #[serde(skip)]
    latest_from: Precedence,
}

/// (dated, effective time)
type Precedence = (bool, DateTime<Utc>);
/// (dated, behavioral, effective time)
type RatePrecedence = (bool, bool, DateTime<Utc>);

fn precedence(record: &SessionRecord, at: DateTime<Utc>, dated: bool) -> (Precedence, RatePrecedence) {
    let behavioral = record.source == RecordSource::Behavior;
    ((dated, at), (dated, behavioral, at))
}

impl ReconciledRecord {
    /// Start an accumulator from a session's first surviving record.
    pub fn from_record(record: &SessionRecord, at: DateTime<Utc>) -> Self {
        Self::start(record, at, true)
    }

    /// `dated` is false when `at` is a stand-in for a missing timestamp.
    pub(crate) fn start(record: &SessionRecord, at: DateTime<Utc>, dated: bool) -> Self {
        let mut product_views = Vec::with_capacity(record.product_views.len());
        union_into(&mut product_views, &record.product_views);
        let (latest_from, rates_from) = precedence(record, at, dated);

        Self {
            session_id: record.session_id.clone(),
            first_seen: at,
            last_seen: at,
            page_url: record.page_url.clone(),
            user_agent: record.user_agent.clone(),
            typing_wpm: record.typing_wpm,
            typing_keystrokes: record.typing_keystrokes,
            typing_corrections: record.typing_corrections,
            mouse_clicks: record.mouse_clicks,
            mouse_movements: record.mouse_movements,
            mouse_velocity: record.mouse_velocity,
            mouse_idle_time: record.mouse_idle_time,
            scroll_depth: record.scroll_depth,
            scroll_speed: record.scroll_speed,
            scroll_events: record.scroll_events,
            focus_changes: record.focus_changes,
            focus_time: record.focus_time,
            tab_switches: record.tab_switches,
            session_duration: record.session_duration,
            page_views: record.page_views,
            interactions_count: record.interactions_count,
            cart_actions: record.cart_actions,
            wishlist_actions: record.wishlist_actions,
            category_changes: record.category_changes,
            searches: record.searches,
            product_views,
            gate_score: record.gate_score,
            source_records: 1,
            rates_from,
            latest_from,
        }
    }

    /// Fold another record of the same session into this one.
    ///
    /// `at` is the record's effective timestamp. Ties on the "latest" fields
    /// go to the record merged last.
    pub fn merge(&mut self, record: &SessionRecord, at: DateTime<Utc>) {
        self.fold(record, at, true)
    }

    /// Like [`merge`](Self::merge). `dated` is false when `at` stands in for
    /// a missing timestamp; such a record never overrides "latest" fields
    /// taken from a dated one.
    pub(crate) fn fold(&mut self, record: &SessionRecord, at: DateTime<Utc>, dated: bool) {
        add(&mut self.typing_keystrokes, record.typing_keystrokes);
        add(&mut self.typing_corrections, record.typing_corrections);
        add(&mut self.mouse_clicks, record.mouse_clicks);
        add(&mut self.mouse_movements, record.mouse_movements);
        add(&mut self.scroll_events, record.scroll_events);
        add(&mut self.focus_changes, record.focus_changes);
        add(&mut self.tab_switches, record.tab_switches);
        add(&mut self.page_views, record.page_views);
        add(&mut self.interactions_count, record.interactions_count);
        add(&mut self.cart_actions, record.cart_actions);
        add(&mut self.wishlist_actions, record.wishlist_actions);
        add(&mut self.category_changes, record.category_changes);
        add(&mut self.searches, record.searches);

        self.scroll_depth = self.scroll_depth.max(record.scroll_depth);
        self.focus_time = self.focus_time.max(record.focus_time);
        self.mouse_idle_time = self.mouse_idle_time.max(record.mouse_idle_time);
        self.session_duration = self.session_duration.max(record.session_duration);

        union_into(&mut self.product_views, &record.product_views);

        let (latest_from, rates_from) = precedence(record, at, dated);
        if rates_from >= self.rates_from {
            self.rates_from = rates_from;
            self.typing_wpm = record.typing_wpm;
            self.mouse_velocity = record.mouse_velocity;
            self.scroll_speed = record.scroll_speed;
        }
        if latest_from >= self.latest_from {
            self.latest_from = latest_from;
            if !record.page_url.is_empty() {
                self.page_url = record.page_url.clone();
            }
            if !record.user_agent.is_empty() {
                self.user_agent = record.user_agent.clone();
            }
            if record.gate_score.is_some() {
                self.gate_score = record.gate_score;
            }
        }

        self.first_seen = self.first_seen.min(at);
        self.last_seen = self.last_seen.max(at);
        self.source_records += 1;
    }
}

/// Counters saturate instead of overflowing.
fn add(total: &mut u64, value: u64) {
    *total = total.saturating_add(value);
}

fn union_into(target: &mut Vec<u64>, items: &[u64]) {
    for item in items {
        if !target.contains(item) {
            target.push(*item);
        }
    }
}
