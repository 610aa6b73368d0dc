//! SQLite store: event log, contacts, consent, audit, and a full run on top.

mod common;

use common::*;
use flagsync_core::{
    audit::{AuditAction, AuditRecord},
    clock::RunClock,
    collaborators::{Channel, Collaborators, EventStore},
    config::SyncConfig,
    event::{CustomerEvent, EventType},
    memory::{MemoryTagClient, RecordingSubscriptions},
    store::FlagStore,
    sync::SyncRunner,
};
use serde_json::json;

fn store() -> FlagStore {
    init_logging();
    let s = FlagStore::in_memory().unwrap();
    s.migrate().unwrap();
    s
}

#[test]
fn migrate_is_idempotent() {
    let s = store();
    s.migrate().unwrap();
    s.append_event(&member_checkin("c-1", days_ago(1))).unwrap();
    s.migrate().unwrap();
    assert_eq!(s.event_count("c-1", &EventType::Checkin).unwrap(), 1);
}

// ── Event log ───────────────────────────────────────────────────────────────

/// Events come back oldest first with attributes and unknown types intact.
#[test]
fn events_round_trip_in_date_order() {
    let s = store();
    let booking = party_booking("c-1", days_ago(2), "p-1", &date_in(7));
    let odd = CustomerEvent::new("c-1", EventType::parse("locker_rented"), days_ago(5)).with_attr("locker", 12);
    s.append_event(&booking).unwrap();
    s.append_event(&odd).unwrap();
    s.append_event(&member_checkin("c-2", days_ago(1))).unwrap();

    let history = s.events_for_customer("c-1").unwrap();
    assert_eq!(history, vec![odd.clone(), booking.clone()]);
    assert_eq!(history[0].event_type.as_str(), "locker_rented");
    assert_eq!(history[1].attributes["total_guests"], json!(12));
}

/// Same timestamp: insertion order wins.
#[test]
fn equal_timestamps_keep_insertion_order() {
    let s = store();
    let first = CustomerEvent::new("c-1", EventType::DayPassPurchase, days_ago(1)).with_attr("n", 1);
    let second = CustomerEvent::new("c-1", EventType::DayPassPurchase, days_ago(1)).with_attr("n", 2);
    s.append_event(&first).unwrap();
    s.append_event(&second).unwrap();
    assert_eq!(s.events_for_customer("c-1").unwrap(), vec![first, second]);
}

#[test]
fn customer_ids_are_distinct_and_sorted() {
    let s = store();
    for id in ["c-3", "c-1", "c-3", "c-2"] {
        s.append_event(&member_checkin(id, days_ago(1))).unwrap();
    }
    assert_eq!(EventStore::customer_ids(&s).unwrap(), vec!["c-1", "c-2", "c-3"]);
}

// ── Contacts ────────────────────────────────────────────────────────────────

/// A child with no contact of their own borrows the parent's.
#[test]
fn child_falls_back_to_parent_contact() {
    let s = store();
    s.upsert_contact("parent-1", Some("ava@example.com"), Some("512-555-0100")).unwrap();
    s.upsert_contact("kid-1", None, Some("  ")).unwrap();
    s.link_family("parent-1", "kid-1").unwrap();
    s.link_family("parent-1", "kid-1").unwrap();

    let kid = s.contact_for("kid-1").unwrap();
    assert!(kid.via_parent);
    assert_eq!(kid.email.as_deref(), Some("ava@example.com"));

    let parent = s.contact_for("parent-1").unwrap();
    assert!(!parent.via_parent);

    let stranger = s.contact_for("nobody").unwrap();
    assert_eq!(stranger.email, None);
    assert!(!stranger.via_parent);
}

/// Own details win over the household link.
#[test]
fn own_contact_beats_parent() {
    let s = store();
    s.upsert_contact("parent-1", Some("ava@example.com"), None).unwrap();
    s.upsert_contact("teen-1", Some("zoe@example.com"), None).unwrap();
    s.link_family("parent-1", "teen-1").unwrap();
    let teen = s.contact_for("teen-1").unwrap();
    assert_eq!(teen.email.as_deref(), Some("zoe@example.com"));
    assert!(!teen.via_parent);
}

// ── Consent & audit ─────────────────────────────────────────────────────────

/// Active consent on a channel is recorded once.
#[test]
fn consent_is_recorded_once_per_channel() {
    let s = store();
    assert!(s.record_consent("c-1", Channel::Email, "tag_sync_auto_subscribe", now()).unwrap());
    assert!(!s.record_consent("c-1", Channel::Email, "tag_sync_auto_subscribe", days_later(1)).unwrap());
    assert!(s.record_consent("c-1", Channel::Sms, "tag_sync_auto_subscribe", now()).unwrap());

    let rows = s.consents_for("c-1").unwrap();
    assert_eq!(rows.len(), 2);
    assert!(rows.iter().all(|r| r.status == "active"));
    assert_eq!(rows[0].consent_id.len(), 32);
}

#[test]
fn audit_records_round_trip() {
    let s = store();
    let add = AuditRecord::new("run-1", "c-1", "new_member", "new-member", AuditAction::Add, now());
    let remove = AuditRecord::new("run-2", "c-1", "new_member", "new-member", AuditAction::Remove, days_later(16));
    s.append_audit(&add).unwrap();
    s.append_audit(&remove).unwrap();

    let records = s.audit_for_customer("c-1").unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].id, Some(1));
    assert_eq!(records[0].action, AuditAction::Add);
    assert_eq!(records[1].timestamp, days_later(16));
    assert_eq!(s.audit_count("run-1").unwrap(), 1);
}

// ── Full run ────────────────────────────────────────────────────────────────

/// A run backed by the store persists flag, sync, consent and audit rows,
/// and a repeat run adds nothing.
#[test]
fn sync_run_persists_to_store() {
    let s = store();
    s.upsert_contact("c-1", Some("ben@example.com"), Some("512-555-0105")).unwrap();
    s.append_event(&day_pass_checkin("c-1", days_ago(70))).unwrap();
    s.append_event(&day_pass_checkin("c-1", days_ago(1))).unwrap();

    let tags = MemoryTagClient::new();
    let subscriptions = RecordingSubscriptions::new();
    let collab = Collaborators {
        events: &s,
        tags: &tags,
        subscriptions: &subscriptions,
        consent: &s,
        identity: &s,
        audit: &s,
    };

    let runner = SyncRunner::new(RunClock::fixed("run-1", now()), SyncConfig::default_test(), collab).unwrap();
    let report = runner.run_sync(false);
    assert_eq!(report.added(), 1);
    assert_eq!(s.event_count("c-1", &EventType::FlagSet).unwrap(), 1);
    assert_eq!(s.event_count("c-1", &EventType::FlagSyncedToShopify).unwrap(), 1);
    assert_eq!(s.audit_count("run-1").unwrap(), 1);
    assert_eq!(s.consents_for("c-1").unwrap().len(), 2);

    let again = SyncRunner::new(RunClock::fixed("run-2", now()), SyncConfig::default_test(), collab).unwrap();
    let report = again.run_sync(false);
    assert_eq!(report.added() + report.removed(), 0);
    assert_eq!(s.event_count("c-1", &EventType::FlagSet).unwrap(), 1);
    assert_eq!(s.audit_count("run-2").unwrap(), 0);
}
