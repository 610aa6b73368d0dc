//! Cooldown tracker — answers "may this fire again?" purely from history.
//!
//! RULE: No separate cooldown table exists. The latest `flag_set` (flag
//! cooldown) and `flag_synced_to_shopify` (sync cooldown) events for a rule
//! are the only state consulted. Windows are inclusive at the boundary.

use crate::{
    clock::within_days,
    event::{CustomerEvent, EventType},
    types::Timestamp,
};

#[derive(Debug, Clone, Copy)]
pub struct CooldownTracker<'a> {
    history: &'a [CustomerEvent],
    now:     Timestamp,
}

impl<'a> CooldownTracker<'a> {
    pub fn new(history: &'a [CustomerEvent], now: Timestamp) -> Self {
        Self { history, now }
    }

    /// Most recent `flag_set` for `rule`, optionally scoped to one party.
    pub fn latest_flag_set(&self, rule: &str, scope: Option<&str>) -> Option<&'a CustomerEvent> {
        self.latest(&EventType::FlagSet, rule, scope)
    }

    pub fn latest_sync(&self, rule: &str) -> Option<&'a CustomerEvent> {
        self.latest(&EventType::FlagSyncedToShopify, rule, None)
    }

    /// `None` days means the rule has no flag cooldown.
    pub fn flag_cooldown_allows(&self, rule: &str, scope: Option<&str>, days: Option<i64>) -> bool {
        match days {
            None => true,
            Some(d) => self
                .latest_flag_set(rule, scope)
                .map_or(true, |e| !within_days(e.event_date, self.now, d)),
        }
    }

    pub fn sync_cooldown_allows(&self, rule: &str, days: Option<i64>) -> bool {
        match days {
            None => true,
            Some(d) => self
                .latest_sync(rule)
                .map_or(true, |e| !within_days(e.event_date, self.now, d)),
        }
    }

    fn latest(&self, event_type: &EventType, rule: &str, scope: Option<&str>) -> Option<&'a CustomerEvent> {
        self.history
            .iter()
            .filter(|e| e.is(event_type) && e.event_date <= self.now)
            .filter(|e| e.flag_type() == Some(rule))
            .filter(|e| match scope {
                Some(party) => e.attr_text("party_id").as_deref() == Some(party),
                None        => true,
            })
            .max_by_key(|e| e.event_date)
    }
}
