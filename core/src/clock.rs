//! Run clock — the single injected "now" of a batch run.
//!
//! RULE: Evaluation and reconciliation never read the system clock.
//! The runner fixes `now` once per run and hands it to every component.

use crate::types::{RunId, Timestamp};
use chrono::{Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunClock {
    pub run_id: RunId,
    pub now:    Timestamp,
}

impl RunClock {
    pub fn fixed(run_id: impl Into<RunId>, now: Timestamp) -> Self {
        Self { run_id: run_id.into(), now }
    }

    /// Reads wall-clock time exactly once, at run start.
    pub fn system(run_id: impl Into<RunId>) -> Self {
        Self::fixed(run_id, Utc::now().naive_utc())
    }

    pub fn today(&self) -> NaiveDate {
        self.now.date()
    }
}

/// Inclusive look-back window: `now - days <= at <= now`. A window reaching
/// past the representable calendar covers all of history.
pub fn within_days(at: Timestamp, now: Timestamp, days: i64) -> bool {
    if at > now {
        return false;
    }
    match Duration::try_days(days).and_then(|d| now.checked_sub_signed(d)) {
        Some(start) => at >= start,
        None => true,
    }
}

/// Whole days from `earlier` to `later`.
pub fn days_between(earlier: Timestamp, later: Timestamp) -> i64 {
    (later - earlier).num_days()
}
