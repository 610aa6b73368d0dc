//! End-to-end sync runs against in-memory collaborators.

mod common;

use chrono::Duration;
use common::*;
use flagsync_core::{
    audit::AuditAction,
    collaborators::{Channel, Contact},
    config::{RuleSettings, SyncConfig},
    event::{CustomerEvent, EventType},
    memory::RecordingSubscriptions,
    report::{FailureKind, SuppressionReason},
};

const OFFER_TAG: &str = "first-time-day-pass-2wk-offer";

fn ben() -> Contact {
    Contact::new(Some("ben@example.com"), Some("512-555-0105"))
}

fn returning_visitor(customer: &str) -> Vec<CustomerEvent> {
    vec![
        day_pass_checkin(customer, days_ago(70)),
        day_pass_checkin(customer, now() - Duration::hours(2)),
    ]
}

fn new_member(customer: &str) -> Vec<CustomerEvent> {
    vec![membership(customer, EventType::MembershipStarted, days_ago(1), "m-1", "Monthly")]
}

// ── Happy path ──────────────────────────────────────────────────────────────

/// One triggered flag produces the tag, both subscriptions, consent,
/// the flag_set and sync events, and an audit record.
#[test]
fn full_run_applies_every_side_effect() {
    let h = Harness::new(returning_visitor("c-1")).with_contact("c-1", ben());
    let report = h.runner(now()).run_sync(false);

    let customer = report.customer("c-1").unwrap();
    assert_eq!(customer.applied_tags(AuditAction::Add), vec![OFFER_TAG]);
    assert!(customer.failures.is_empty(), "{:?}", customer.failures);
    assert!(h.tags.tags_of("c-1").contains(OFFER_TAG));

    assert_eq!(h.count("c-1", EventType::FlagSet), 1);
    assert_eq!(h.count("c-1", EventType::FlagSyncedToShopify), 1);

    let audit = h.audit.records();
    assert_eq!(audit.len(), 1);
    assert_eq!(audit[0].action, AuditAction::Add);
    assert_eq!(audit[0].tag_name, OFFER_TAG);
    assert_eq!(audit[0].run_id, report.run_id);

    assert_eq!(
        h.subscriptions.calls(),
        vec![("c-1".to_string(), Channel::Email), ("c-1".to_string(), Channel::Sms)]
    );
    assert_eq!(customer.subscribed, vec![Channel::Email, Channel::Sms]);
    let consent = h.consent.entries();
    assert_eq!(consent.len(), 2);
    assert!(consent.iter().all(|c| c.method == "tag_sync_auto_subscribe" && c.at == now()));
}

/// A second run over the same state changes nothing.
#[test]
fn second_run_is_a_no_op() {
    let h = Harness::new(returning_visitor("c-1")).with_contact("c-1", ben());
    h.runner(now()).run_sync(false);
    let mutations = h.tags.mutation_count();

    let again = h.runner(now()).run_sync(false);
    assert_eq!(again.added(), 0);
    assert_eq!(again.removed(), 0);
    assert_eq!(h.tags.mutation_count(), mutations);
    assert_eq!(h.count("c-1", EventType::FlagSet), 1);
    assert_eq!(h.count("c-1", EventType::FlagSyncedToShopify), 1);
    assert_eq!(h.audit.records().len(), 1);
    assert_eq!(h.subscriptions.calls().len(), 2);
}

/// A dry run plans exactly what a real run applies, and touches nothing.
#[test]
fn dry_run_matches_real_run_without_side_effects() {
    let events = [returning_visitor("c-1"), new_member("c-2")].concat();
    let dry = Harness::new(events.clone())
        .with_contact("c-1", ben())
        .with_tags("c-2", &["fifty-percent-offer-sent"]);
    let real = Harness::new(events)
        .with_contact("c-1", ben())
        .with_tags("c-2", &["fifty-percent-offer-sent"]);

    let planned = dry.runner(now()).run_sync(true);
    let applied = real.runner(now()).run_sync(false);

    assert!(planned.dry_run);
    for id in ["c-1", "c-2"] {
        let p = planned.customer(id).unwrap();
        let a = applied.customer(id).unwrap();
        assert_eq!(p.instances, a.instances);
        assert_eq!(p.tags_to_add, a.tags_to_add);
        assert_eq!(p.tags_to_remove, a.tags_to_remove);
        assert!(p.applied.is_empty());
    }
    assert_eq!(planned.planned_adds(), applied.added());
    assert_eq!(planned.planned_removes(), applied.removed());

    assert_eq!(dry.tags.mutation_count(), 0);
    assert!(dry.audit.records().is_empty());
    assert!(dry.subscriptions.calls().is_empty());
    assert_eq!(dry.count("c-1", EventType::FlagSet), 0);
    assert_eq!(dry.events.all().len(), 3);
}

/// Customers are processed in ascending id order whatever the store order.
#[test]
fn customers_run_in_ascending_order() {
    let events = vec![
        member_checkin("c-3", days_ago(1)),
        member_checkin("c-1", days_ago(1)),
        member_checkin("c-2", days_ago(1)),
    ];
    let h = Harness::new(events);
    let report = h.runner(now()).run_sync(true);
    let ids: Vec<&str> = report.customers.iter().map(|c| c.customer_id.as_str()).collect();
    assert_eq!(ids, vec!["c-1", "c-2", "c-3"]);
}

/// Single-customer evaluation has no side effects.
#[test]
fn evaluate_customer_is_read_only() {
    let h = Harness::new(new_member("c-2"));
    let instances = h.runner(now()).evaluate_customer("c-2").unwrap();

    let names: Vec<&str> = instances.iter().map(|i| i.rule_name.as_str()).collect();
    assert_eq!(names, vec!["new_member", "active_membership"]);
    assert_eq!(h.events.all().len(), 1);
    assert_eq!(h.tags.mutation_count(), 0);
}

/// A cooldown flag keeps its tag until it expires, then loses it.
#[test]
fn retained_tag_stays_until_expiry() {
    let h = Harness::new(new_member("c-2"));

    let first = h.runner(now()).run_sync(false);
    assert_eq!(
        first.customer("c-2").unwrap().applied_tags(AuditAction::Add),
        vec!["new-member", "new-membership", "active-membership"]
    );

    let mid = h.runner(days_later(10)).run_sync(false);
    assert_eq!(mid.added() + mid.removed(), 0);
    assert!(h.tags.tags_of("c-2").contains("new-member"));

    let late = h.runner(days_later(16)).run_sync(false);
    assert_eq!(
        late.customer("c-2").unwrap().applied_tags(AuditAction::Remove),
        vec!["new-member", "new-membership"]
    );
    let remaining: Vec<String> = h.tags.tags_of("c-2").into_iter().collect();
    assert_eq!(remaining, vec!["active-membership".to_string()]);
    assert_eq!(
        h.audit.records().iter().filter(|r| r.action == AuditAction::Remove).count(),
        2
    );
}

// ── Failures ────────────────────────────────────────────────────────────────

/// One customer's tag store failure leaves the others untouched.
#[test]
fn tag_store_failure_is_isolated() {
    let events = [returning_visitor("c-1"), new_member("c-2")].concat();
    let h = Harness::new(events).with_contact("c-1", ben());
    h.tags.fail_for("c-1");

    let report = h.runner(now()).run_sync(false);

    let failed = report.customer("c-1").unwrap();
    assert!(failed.applied.is_empty());
    assert_eq!(failed.failures.len(), 1);
    assert_eq!(failed.failures[0].kind, FailureKind::Collaborator);
    assert_eq!(failed.failures[0].collaborator.as_deref(), Some("tag_client"));
    assert_eq!(failed.failures[0].tag_name.as_deref(), Some(OFFER_TAG));
    assert_eq!(h.count("c-1", EventType::FlagSyncedToShopify), 0);
    assert!(h.subscriptions.calls().is_empty());

    let ok = report.customer("c-2").unwrap();
    assert_eq!(ok.applied.len(), 3);
    assert!(ok.failures.is_empty());
    assert_eq!(h.audit.records().len(), 3);
    assert!(h.audit.records().iter().all(|r| r.customer_id == "c-2"));
}

/// An audit write failure is reported; the next run sees the tag and does
/// not add it again.
#[test]
fn audit_failure_is_reported_and_not_retried() {
    let h = Harness::new(new_member("c-2"));
    h.audit.set_rejecting(true);

    let report = h.runner(now()).run_sync(false);
    let customer = report.customer("c-2").unwrap();
    assert_eq!(customer.applied.len(), 3);
    assert_eq!(customer.failures.len(), 3);
    assert!(customer.failures.iter().all(|f| f.kind == FailureKind::AuditWrite));

    h.audit.set_rejecting(false);
    let again = h.runner(now()).run_sync(false);
    assert_eq!(again.added(), 0);
    assert!(h.audit.records().is_empty());
}

/// By default a failed mutation does not stop the rest; with halting on,
/// the first failure ends that customer's mutations.
#[test]
fn halt_on_failure_stops_remaining_mutations() {
    let continuing = Harness::new(new_member("c-2")).with_tags("c-2", &["fifty-percent-offer-sent"]);
    continuing.tags.fail_for("c-2");
    let report = continuing.runner(now()).run_sync(false);
    assert_eq!(report.customer("c-2").unwrap().failures.len(), 4);

    let mut config = SyncConfig::default_test();
    config.halt_customer_on_failure = true;
    let halting = Harness::new(new_member("c-2")).with_tags("c-2", &["fifty-percent-offer-sent"]);
    halting.tags.fail_for("c-2");
    let report = halting.runner_with(now(), config).run_sync(false);
    let customer = report.customer("c-2").unwrap();
    assert_eq!(customer.failures.len(), 1);
    assert_eq!(customer.failures[0].tag_name.as_deref(), Some("new-member"));
}

/// A "never again" cooldown reaching past the calendar blocks the rule and
/// the run still completes.
#[test]
fn oversized_cooldown_blocks_without_aborting_the_run() {
    let mut config = SyncConfig::default_test();
    config.rules.insert(
        "new_member".into(),
        RuleSettings { flag_cooldown_days: Some(Some(999_999_999)), ..Default::default() },
    );
    let mut events = new_member("c-2");
    events.push(flag_set("c-2", "new_member", days_ago(400)));
    let h = Harness::new(events);

    let report = h.runner_with(now(), config).run_sync(true);
    let customer = report.customer("c-2").unwrap();
    assert!(customer.failures.is_empty(), "{:?}", customer.failures);
    assert!(customer.instances.iter().all(|i| i.rule_name != "new_member"));
    assert!(customer.suppressed.iter().any(|s| s.rule_name == "new_member"
        && s.reason == SuppressionReason::FlagCooldown { last_flagged: days_ago(400) }));
}

/// Rejected subscriptions are reported; the tag, sync event and audit stand.
#[test]
fn subscription_rejection_keeps_the_tag() {
    let mut h = Harness::new(returning_visitor("c-1")).with_contact("c-1", ben());
    h.subscriptions = RecordingSubscriptions::rejecting();

    let report = h.runner(now()).run_sync(false);
    let customer = report.customer("c-1").unwrap();

    assert_eq!(customer.applied_tags(AuditAction::Add), vec![OFFER_TAG]);
    assert!(customer.subscribed.is_empty());
    assert_eq!(customer.failures.len(), 2);
    assert!(customer
        .failures
        .iter()
        .all(|f| f.collaborator.as_deref() == Some("subscriptions")));
    assert!(h.consent.entries().is_empty());
    assert_eq!(h.count("c-1", EventType::FlagSyncedToShopify), 1);
    assert_eq!(h.audit.records().len(), 1);
}

/// No email or phone: the tag is added without subscribing anyone.
#[test]
fn unreachable_customer_is_not_subscribed() {
    let h = Harness::new(returning_visitor("c-1"));
    let report = h.runner(now()).run_sync(false);
    assert_eq!(report.customer("c-1").unwrap().applied_tags(AuditAction::Add), vec![OFFER_TAG]);
    assert!(h.subscriptions.calls().is_empty());
    assert!(h.consent.entries().is_empty());
}
