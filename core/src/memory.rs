//! In-memory collaborators for tests, dry tooling and local runs.
//!
//! Single-threaded (RefCell); the batch runner processes customers
//! sequentially, so no locking is needed.

use crate::{
    audit::AuditRecord,
    collaborators::{AuditLog, Channel, ConsentLedger, Contact, EventStore, IdentityLookup, SubscriptionClient, TagClient},
    error::CollaboratorError,
    event::{sort_history, CustomerEvent},
    types::{CustomerId, Timestamp},
};
use std::{
    cell::{Cell, RefCell},
    collections::{BTreeMap, BTreeSet},
};

/// Tag store keyed by customer. Failures can be injected per customer.
#[derive(Debug, Default)]
pub struct MemoryTagClient {
    tags:      RefCell<BTreeMap<CustomerId, BTreeSet<String>>>,
    failing:   RefCell<BTreeSet<CustomerId>>,
    mutations: Cell<usize>,
}

impl MemoryTagClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshot(snapshot: BTreeMap<CustomerId, BTreeSet<String>>) -> Self {
        Self {
            tags: RefCell::new(snapshot),
            ..Self::default()
        }
    }

    pub fn with_tags(self, customer_id: &str, tags: &[&str]) -> Self {
        self.tags
            .borrow_mut()
            .entry(customer_id.to_string())
            .or_default()
            .extend(tags.iter().map(|t| t.to_string()));
        self
    }

    /// Every add/remove for this customer fails until cleared.
    pub fn fail_for(&self, customer_id: &str) {
        self.failing.borrow_mut().insert(customer_id.to_string());
    }

    pub fn clear_failures(&self) {
        self.failing.borrow_mut().clear();
    }

    pub fn tags_of(&self, customer_id: &str) -> BTreeSet<String> {
        self.tags.borrow().get(customer_id).cloned().unwrap_or_default()
    }

    pub fn snapshot(&self) -> BTreeMap<CustomerId, BTreeSet<String>> {
        self.tags.borrow().clone()
    }

    /// Successful add/remove calls that changed state.
    pub fn mutation_count(&self) -> usize {
        self.mutations.get()
    }

    fn check(&self, customer_id: &str, op: &str) -> Result<(), CollaboratorError> {
        if self.failing.borrow().contains(customer_id) {
            return Err(CollaboratorError::new("tag_client", format!("{op} rejected for {customer_id}")));
        }
        Ok(())
    }
}

impl TagClient for MemoryTagClient {
    fn read_tags(&self, customer_id: &str) -> Result<BTreeSet<String>, CollaboratorError> {
        Ok(self.tags_of(customer_id))
    }

    fn add_tag(&self, customer_id: &str, tag: &str) -> Result<(), CollaboratorError> {
        self.check(customer_id, "add")?;
        let inserted = self
            .tags
            .borrow_mut()
            .entry(customer_id.to_string())
            .or_default()
            .insert(tag.to_string());
        if inserted {
            self.mutations.set(self.mutations.get() + 1);
        }
        Ok(())
    }

    fn remove_tag(&self, customer_id: &str, tag: &str) -> Result<(), CollaboratorError> {
        self.check(customer_id, "remove")?;
        let removed = self
            .tags
            .borrow_mut()
            .get_mut(customer_id)
            .map_or(false, |tags| tags.remove(tag));
        if removed {
            self.mutations.set(self.mutations.get() + 1);
        }
        Ok(())
    }
}

/// Records subscribe calls; optionally rejects them all.
#[derive(Debug, Default)]
pub struct RecordingSubscriptions {
    calls:  RefCell<Vec<(CustomerId, Channel)>>,
    reject: Cell<bool>,
}

impl RecordingSubscriptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rejecting() -> Self {
        let s = Self::default();
        s.reject.set(true);
        s
    }

    pub fn calls(&self) -> Vec<(CustomerId, Channel)> {
        self.calls.borrow().clone()
    }
}

impl SubscriptionClient for RecordingSubscriptions {
    fn subscribe(&self, customer_id: &str, channel: Channel) -> Result<(), CollaboratorError> {
        if self.reject.get() {
            return Err(CollaboratorError::new("subscriptions", "subscribe rejected"));
        }
        self.calls.borrow_mut().push((customer_id.to_string(), channel));
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsentEntry {
    pub customer_id: CustomerId,
    pub channel:     Channel,
    pub method:      String,
    pub at:          Timestamp,
}

#[derive(Debug, Default)]
pub struct MemoryConsentLedger {
    entries: RefCell<Vec<ConsentEntry>>,
}

impl MemoryConsentLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<ConsentEntry> {
        self.entries.borrow().clone()
    }
}

impl ConsentLedger for MemoryConsentLedger {
    fn record(&self, customer_id: &str, channel: Channel, method: &str, at: Timestamp) -> Result<(), CollaboratorError> {
        self.entries.borrow_mut().push(ConsentEntry {
            customer_id: customer_id.to_string(),
            channel,
            method: method.to_string(),
            at,
        });
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MemoryIdentity {
    contacts: BTreeMap<CustomerId, Contact>,
}

impl MemoryIdentity {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, customer_id: &str, contact: Contact) -> Self {
        self.contacts.insert(customer_id.to_string(), contact);
        self
    }
}

impl IdentityLookup for MemoryIdentity {
    /// Unknown customers have no contact details; that is not an error.
    fn lookup(&self, customer_id: &str) -> Result<Contact, CollaboratorError> {
        Ok(self.contacts.get(customer_id).cloned().unwrap_or_default())
    }
}

#[derive(Debug, Default)]
pub struct MemoryEventStore {
    events: RefCell<Vec<CustomerEvent>>,
}

impl MemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_events(events: impl IntoIterator<Item = CustomerEvent>) -> Self {
        Self { events: RefCell::new(events.into_iter().collect()) }
    }

    pub fn all(&self) -> Vec<CustomerEvent> {
        self.events.borrow().clone()
    }
}

impl EventStore for MemoryEventStore {
    fn read(&self, customer_id: &str) -> Result<Vec<CustomerEvent>, CollaboratorError> {
        let mut history: Vec<CustomerEvent> = self
            .events
            .borrow()
            .iter()
            .filter(|e| e.customer_id == customer_id)
            .cloned()
            .collect();
        sort_history(&mut history);
        Ok(history)
    }

    fn append(&self, event: &CustomerEvent) -> Result<(), CollaboratorError> {
        self.events.borrow_mut().push(event.clone());
        Ok(())
    }

    fn customer_ids(&self) -> Result<Vec<CustomerId>, CollaboratorError> {
        let ids: BTreeSet<CustomerId> = self.events.borrow().iter().map(|e| e.customer_id.clone()).collect();
        Ok(ids.into_iter().collect())
    }
}

#[derive(Debug, Default)]
pub struct MemoryAuditLog {
    records: RefCell<Vec<AuditRecord>>,
    reject:  Cell<bool>,
}

impl MemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every append fails until switched back.
    pub fn set_rejecting(&self, reject: bool) {
        self.reject.set(reject);
    }

    pub fn records(&self) -> Vec<AuditRecord> {
        self.records.borrow().clone()
    }
}

impl AuditLog for MemoryAuditLog {
    fn append(&self, record: &AuditRecord) -> Result<(), CollaboratorError> {
        if self.reject.get() {
            return Err(CollaboratorError::new("audit_log", "audit store unavailable"));
        }
        let mut records = self.records.borrow_mut();
        let mut stored = record.clone();
        stored.id = Some(records.len() as i64 + 1);
        records.push(stored);
        Ok(())
    }

    fn records_for(&self, customer_id: &str) -> Result<Vec<AuditRecord>, CollaboratorError> {
        Ok(self
            .records
            .borrow()
            .iter()
            .filter(|r| r.customer_id == customer_id)
            .cloned()
            .collect())
    }
}
