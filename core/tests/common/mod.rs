#![allow(dead_code)]

use chrono::{Duration, NaiveDate, NaiveDateTime};
use flagsync_core::{
    clock::RunClock,
    collaborators::{Collaborators, Contact},
    config::SyncConfig,
    event::{CustomerEvent, EventType},
    memory::{
        MemoryAuditLog, MemoryConsentLedger, MemoryEventStore, MemoryIdentity, MemoryTagClient,
        RecordingSubscriptions,
    },
    sync::SyncRunner,
};

/// Routes engine logs to the test harness; `RUST_LOG=debug` to see them.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

// ── Time ────────────────────────────────────────────────────────────────────

/// Fixed evaluation instant shared by every test.
pub fn now() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2026, 3, 10)
        .unwrap()
        .and_hms_opt(12, 0, 0)
        .unwrap()
}

pub fn days_ago(days: i64) -> NaiveDateTime {
    now() - Duration::days(days)
}

pub fn days_later(days: i64) -> NaiveDateTime {
    now() + Duration::days(days)
}

pub fn date_in(days: i64) -> String {
    days_later(days).date().format("%Y-%m-%d").to_string()
}

// ── Events ──────────────────────────────────────────────────────────────────

pub fn day_pass_checkin(customer: &str, at: NaiveDateTime) -> CustomerEvent {
    CustomerEvent::new(customer, EventType::Checkin, at).with_attr("entry_method_description", "Day Pass - Adult")
}

pub fn member_checkin(customer: &str, at: NaiveDateTime) -> CustomerEvent {
    CustomerEvent::new(customer, EventType::Checkin, at).with_attr("entry_method_description", "Membership")
}

pub fn membership(customer: &str, event_type: EventType, at: NaiveDateTime, id: &str, name: &str) -> CustomerEvent {
    CustomerEvent::new(customer, event_type, at)
        .with_attr("membership_id", id)
        .with_attr("membership_name", name)
}

pub fn flag_set(customer: &str, rule: &str, at: NaiveDateTime) -> CustomerEvent {
    CustomerEvent::new(customer, EventType::FlagSet, at).with_attr("flag_type", rule)
}

pub fn flag_synced(customer: &str, rule: &str, tag: &str, at: NaiveDateTime) -> CustomerEvent {
    CustomerEvent::new(customer, EventType::FlagSyncedToShopify, at)
        .with_attr("flag_type", rule)
        .with_attr("tag_name", tag)
}

pub fn party_booking(customer: &str, at: NaiveDateTime, party_id: &str, party_date: &str) -> CustomerEvent {
    CustomerEvent::new(customer, EventType::BirthdayPartyBooked, at)
        .with_attr("party_id", party_id)
        .with_attr("party_date", party_date)
        .with_attr("child_name", "Milo")
        .with_attr("party_time", "14:00")
        .with_attr("total_guests", 12)
}

// ── Harness ─────────────────────────────────────────────────────────────────

/// In-memory collaborator set for whole-run tests.
pub struct Harness {
    pub events:        MemoryEventStore,
    pub tags:          MemoryTagClient,
    pub subscriptions: RecordingSubscriptions,
    pub consent:       MemoryConsentLedger,
    pub identity:      MemoryIdentity,
    pub audit:         MemoryAuditLog,
}

impl Harness {
    pub fn new(events: Vec<CustomerEvent>) -> Self {
        init_logging();
        Self {
            events: MemoryEventStore::with_events(events),
            tags: MemoryTagClient::new(),
            subscriptions: RecordingSubscriptions::new(),
            consent: MemoryConsentLedger::new(),
            identity: MemoryIdentity::new(),
            audit: MemoryAuditLog::new(),
        }
    }

    pub fn with_contact(mut self, customer: &str, contact: Contact) -> Self {
        self.identity = std::mem::take(&mut self.identity).with(customer, contact);
        self
    }

    pub fn with_tags(mut self, customer: &str, tags: &[&str]) -> Self {
        self.tags = std::mem::take(&mut self.tags).with_tags(customer, tags);
        self
    }

    pub fn collab(&self) -> Collaborators<'_> {
        Collaborators {
            events: &self.events,
            tags: &self.tags,
            subscriptions: &self.subscriptions,
            consent: &self.consent,
            identity: &self.identity,
            audit: &self.audit,
        }
    }

    pub fn runner(&self, at: NaiveDateTime) -> SyncRunner<'_> {
        self.runner_with(at, SyncConfig::default_test())
    }

    pub fn runner_with(&self, at: NaiveDateTime, config: SyncConfig) -> SyncRunner<'_> {
        SyncRunner::new(RunClock::fixed(format!("run-{at}"), at), config, self.collab()).unwrap()
    }

    pub fn count(&self, customer: &str, event_type: EventType) -> usize {
        self.events
            .all()
            .iter()
            .filter(|e| e.customer_id == customer && e.event_type == event_type)
            .count()
    }
}
