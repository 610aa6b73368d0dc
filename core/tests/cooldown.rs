//! Cooldown tracker: windows are derived from flag events in history only.

mod common;

use common::*;
use flagsync_core::{cooldown::CooldownTracker, event::CustomerEvent};

/// A rule never flagged has no cooldown to respect.
#[test]
fn empty_history_allows_everything() {
    let history: Vec<CustomerEvent> = vec![];
    let t = CooldownTracker::new(&history, now());
    assert!(t.flag_cooldown_allows("new_member", None, Some(14)));
    assert!(t.sync_cooldown_allows("new_member", Some(14)));
}

/// The window is inclusive: exactly N days ago is still inside it.
#[test]
fn flag_cooldown_boundary_is_inclusive() {
    let inside = vec![flag_set("c-1", "new_member", days_ago(14))];
    let t = CooldownTracker::new(&inside, now());
    assert!(!t.flag_cooldown_allows("new_member", None, Some(14)));

    let outside = vec![flag_set("c-1", "new_member", days_ago(15))];
    let t = CooldownTracker::new(&outside, now());
    assert!(t.flag_cooldown_allows("new_member", None, Some(14)));
}

/// Only the latest flag_set for the same rule counts.
#[test]
fn other_rules_do_not_block() {
    let history = vec![
        flag_set("c-1", "membership_cancelled_winback", days_ago(2)),
        flag_set("c-1", "new_member", days_ago(40)),
        flag_set("c-1", "new_member", days_ago(3)),
    ];
    let t = CooldownTracker::new(&history, now());
    assert!(!t.flag_cooldown_allows("new_member", None, Some(14)));
    assert!(t.flag_cooldown_allows("fifty_percent_offer_sent", None, Some(30)));
    assert_eq!(t.latest_flag_set("new_member", None).unwrap().event_date, days_ago(3));
}

/// Per-party rules key their cooldown on the party id.
#[test]
fn party_scope_isolates_cooldowns() {
    let rule = "birthday_party_host_one_week_out";
    let history = vec![flag_set("c-1", rule, days_ago(2)).with_attr("party_id", "p-1")];
    let t = CooldownTracker::new(&history, now());
    assert!(!t.flag_cooldown_allows(rule, Some("p-1"), Some(7)));
    assert!(t.flag_cooldown_allows(rule, Some("p-2"), Some(7)));
}

/// Sync cooldown reads flag_synced_to_shopify, not flag_set.
#[test]
fn sync_cooldown_uses_sync_events() {
    let history = vec![
        flag_set("c-1", "new_member", days_ago(1)),
        flag_synced("c-1", "new_member", "new-member", days_ago(20)),
    ];
    let t = CooldownTracker::new(&history, now());
    assert!(t.sync_cooldown_allows("new_member", Some(14)));
    assert!(!t.sync_cooldown_allows("new_member", Some(30)));
    assert!(t.sync_cooldown_allows("new_member", None), "no sync cooldown configured");
}

/// Events stamped after `now` are invisible to the tracker.
#[test]
fn future_events_are_ignored() {
    let history = vec![flag_set("c-1", "new_member", days_later(1))];
    let t = CooldownTracker::new(&history, now());
    assert!(t.flag_cooldown_allows("new_member", None, Some(14)));
    assert!(t.latest_flag_set("new_member", None).is_none());
}
