//! Collaborator contracts — everything the engine reads from or writes to.
//!
//! RULE: Every call is a single synchronous succeed/fail. Timeouts and
//! retries are the implementation's concern. A failure is reported against
//! the one action that made the call, never against the batch.

use crate::{
    audit::AuditRecord,
    error::CollaboratorError,
    event::CustomerEvent,
    types::{CustomerId, Timestamp},
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Contact identity used for A/B hashing and subscriptions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    pub email:      Option<String>,
    pub phone:      Option<String>,
    /// Filled from a parent's record because the customer has none of their own.
    #[serde(default)]
    pub via_parent: bool,
}

impl Contact {
    pub fn new(email: Option<&str>, phone: Option<&str>) -> Self {
        Self {
            email: email.map(str::to_string),
            phone: phone.map(str::to_string),
            via_parent: false,
        }
    }

    pub fn email(email: &str) -> Self {
        Self::new(Some(email), None)
    }

    pub fn has_email(&self) -> bool {
        self.email.as_deref().map_or(false, |e| !e.trim().is_empty())
    }

    pub fn has_phone(&self) -> bool {
        self.phone.as_deref().map_or(false, |p| p.chars().any(|c| c.is_ascii_digit()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Email,
    Sms,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Email => "email",
            Channel::Sms   => "sms",
        }
    }
}

pub trait EventStore {
    /// Full history for one customer, ascending by `event_date`.
    fn read(&self, customer_id: &str) -> Result<Vec<CustomerEvent>, CollaboratorError>;

    fn append(&self, event: &CustomerEvent) -> Result<(), CollaboratorError>;

    /// Every customer with at least one event, ascending.
    fn customer_ids(&self) -> Result<Vec<CustomerId>, CollaboratorError>;
}

pub trait TagClient {
    fn read_tags(&self, customer_id: &str) -> Result<BTreeSet<String>, CollaboratorError>;

    /// Adding a tag already present is a no-op, not an error.
    fn add_tag(&self, customer_id: &str, tag: &str) -> Result<(), CollaboratorError>;

    /// Removing a tag that is absent is a no-op, not an error.
    fn remove_tag(&self, customer_id: &str, tag: &str) -> Result<(), CollaboratorError>;
}

pub trait SubscriptionClient {
    fn subscribe(&self, customer_id: &str, channel: Channel) -> Result<(), CollaboratorError>;
}

pub trait ConsentLedger {
    fn record(
        &self,
        customer_id: &str,
        channel: Channel,
        method: &str,
        at: Timestamp,
    ) -> Result<(), CollaboratorError>;
}

pub trait IdentityLookup {
    fn lookup(&self, customer_id: &str) -> Result<Contact, CollaboratorError>;
}

pub trait AuditLog {
    fn append(&self, record: &AuditRecord) -> Result<(), CollaboratorError>;

    fn records_for(&self, customer_id: &str) -> Result<Vec<AuditRecord>, CollaboratorError>;
}

/// The collaborator set one sync run is wired against.
#[derive(Clone, Copy)]
pub struct Collaborators<'a> {
    pub events:        &'a dyn EventStore,
    pub tags:          &'a dyn TagClient,
    pub subscriptions: &'a dyn SubscriptionClient,
    pub consent:       &'a dyn ConsentLedger,
    pub identity:      &'a dyn IdentityLookup,
    pub audit:         &'a dyn AuditLog,
}
