//! Per-rule suppression after a rule fires.
//!
//! The tracker is created once per process and passed by `&mut` into every
//! cycle. It is never persisted.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};

/// Whether a positive predicate result may fire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CooldownStatus {
    /// No live entry: actions may run.
    Active,
    /// Within the window: the result is recorded as delayed.
    Suppressed {
        /// When the window ends.
        until: DateTime<Utc>,
    },
}

/// Expiry timestamps keyed by rule id.
#[derive(Debug, Default)]
pub struct CooldownTracker {
    expiries: HashMap<String, DateTime<Utc>>,
}

impl CooldownTracker {
    /// An empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Check a rule at `now`, clearing its entry if the window has elapsed.
    pub fn check(&mut self, rule_id: &str, now: DateTime<Utc>) -> CooldownStatus {
        match self.expiries.get(rule_id) {
            Some(&until) if until > now => CooldownStatus::Suppressed { until },
            Some(_) => {
                self.expiries.remove(rule_id);
                CooldownStatus::Active
            }
            None => CooldownStatus::Active,
        }
    }

    /// Start a window of `cooldown` from `fired_at` and return its expiry.
    ///
    /// Windows too large for the calendar saturate at the maximum timestamp.
    pub fn arm(&mut self, rule_id: &str, cooldown: Duration, fired_at: DateTime<Utc>) -> DateTime<Utc> {
        let until = chrono::Duration::from_std(cooldown)
            .ok()
            .and_then(|window| fired_at.checked_add_signed(window))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        self.expiries.insert(rule_id.to_owned(), until);
        until
    }

    /// The stored expiry for a rule, if any. Does not clear stale entries.
    pub fn expiry(&self, rule_id: &str) -> Option<DateTime<Utc>> {
        self.expiries.get(rule_id).copied()
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.expiries.len()
    }

    /// Whether no entries are stored.
    pub fn is_empty(&self) -> bool {
        self.expiries.is_empty()
    }
}
