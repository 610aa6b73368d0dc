//! Side-effect dispatcher — turns a reconciliation plan into external calls.
//!
//! ACTION ORDER (per customer, fixed):
//!   1. Adds, in plan order (canonical tag before its aliases)
//!        -> auto-subscribe + consent     (canonical add, auto-subscribe rules)
//!        -> flag_synced_to_shopify event (canonical add)
//!        -> audit record
//!   2. Removes, in plan order
//!        -> audit record
//!
//! RULES:
//!   - The audit record and sync event are written only after the tag store
//!     accepted the mutation.
//!   - An audit or sync-event write failure is reported, never retried here.
//!     The next run sees the tag present and does not re-add it.
//!   - A failed mutation is reported; with `halt_on_failure` it also stops the
//!     customer's remaining mutations.

use crate::{
    audit::{AuditAction, AuditRecord},
    catalogue::Catalogue,
    clock::RunClock,
    collaborators::{Channel, Collaborators, Contact},
    event::CustomerEvent,
    reconcile::{ReconciliationPlan, TagAction},
    report::{AppliedAction, Failure},
};

#[derive(Debug, Default, Clone, PartialEq)]
pub struct DispatchOutcome {
    pub applied:    Vec<AppliedAction>,
    pub subscribed: Vec<Channel>,
    pub failures:   Vec<Failure>,
    /// True when a failure stopped the remaining mutations.
    pub halted:     bool,
}

pub struct Dispatcher<'a> {
    collab:          Collaborators<'a>,
    catalogue:       &'a Catalogue,
    clock:           &'a RunClock,
    consent_method:  &'a str,
    halt_on_failure: bool,
}

impl<'a> Dispatcher<'a> {
    pub fn new(
        collab: Collaborators<'a>,
        catalogue: &'a Catalogue,
        clock: &'a RunClock,
        consent_method: &'a str,
        halt_on_failure: bool,
    ) -> Self {
        Self { collab, catalogue, clock, consent_method, halt_on_failure }
    }

    pub fn dispatch(&self, plan: &ReconciliationPlan, contact: &Contact) -> DispatchOutcome {
        let mut outcome = DispatchOutcome::default();

        for action in &plan.tags_to_add {
            if !self.add(action, contact, &mut outcome) && self.halt_on_failure {
                outcome.halted = true;
                return outcome;
            }
        }
        for action in &plan.tags_to_remove {
            if !self.remove(action, &mut outcome) && self.halt_on_failure {
                outcome.halted = true;
                return outcome;
            }
        }
        outcome
    }

    /// Returns false when the tag store rejected the add.
    fn add(&self, action: &TagAction, contact: &Contact, outcome: &mut DispatchOutcome) -> bool {
        let customer = action.customer_id.as_str();
        if let Err(err) = self.collab.tags.add_tag(customer, &action.tag_name) {
            log::warn!("run={} customer={customer} add {} failed: {err}", self.clock.run_id, action.tag_name);
            outcome
                .failures
                .push(Failure::collaborator(Some(customer), &err).on_tag(&action.rule_name, &action.tag_name));
            return false;
        }
        log::info!("run={} customer={customer} added tag {}", self.clock.run_id, action.tag_name);
        outcome.applied.push(AppliedAction {
            rule_name: action.rule_name.clone(),
            tag_name: action.tag_name.clone(),
            action: AuditAction::Add,
        });

        if !action.alias {
            let auto_subscribe = self
                .catalogue
                .params(&action.rule_name)
                .map_or(false, |p| p.auto_subscribe);
            if auto_subscribe {
                self.subscribe(action, contact, outcome);
            }

            let synced = CustomerEvent::flag_synced(
                customer,
                &action.rule_name,
                &action.tag_name,
                action.party_id.as_deref(),
                self.clock.now,
            );
            if let Err(err) = self.collab.events.append(&synced) {
                log::warn!("run={} customer={customer} sync event write failed: {err}", self.clock.run_id);
                outcome
                    .failures
                    .push(Failure::audit_write(customer, &err).on_tag(&action.rule_name, &action.tag_name));
            }
        }

        self.audit(action, AuditAction::Add, outcome);
        true
    }

    fn remove(&self, action: &TagAction, outcome: &mut DispatchOutcome) -> bool {
        let customer = action.customer_id.as_str();
        if let Err(err) = self.collab.tags.remove_tag(customer, &action.tag_name) {
            log::warn!("run={} customer={customer} remove {} failed: {err}", self.clock.run_id, action.tag_name);
            outcome
                .failures
                .push(Failure::collaborator(Some(customer), &err).on_tag(&action.rule_name, &action.tag_name));
            return false;
        }
        log::info!("run={} customer={customer} removed tag {}", self.clock.run_id, action.tag_name);
        outcome.applied.push(AppliedAction {
            rule_name: action.rule_name.clone(),
            tag_name: action.tag_name.clone(),
            action: AuditAction::Remove,
        });
        self.audit(action, AuditAction::Remove, outcome);
        true
    }

    /// Subscription failures never undo the tag add.
    fn subscribe(&self, action: &TagAction, contact: &Contact, outcome: &mut DispatchOutcome) {
        let customer = action.customer_id.as_str();
        let channels = [
            (Channel::Email, contact.has_email()),
            (Channel::Sms, contact.has_phone()),
        ];
        for (channel, reachable) in channels {
            if !reachable {
                continue;
            }
            if let Err(err) = self.collab.subscriptions.subscribe(customer, channel) {
                log::warn!("run={} customer={customer} subscribe {} failed: {err}", self.clock.run_id, channel.as_str());
                outcome
                    .failures
                    .push(Failure::collaborator(Some(customer), &err).on_tag(&action.rule_name, &action.tag_name));
                continue;
            }
            outcome.subscribed.push(channel);
            if let Err(err) = self
                .collab
                .consent
                .record(customer, channel, self.consent_method, self.clock.now)
            {
                log::warn!("run={} customer={customer} consent record failed: {err}", self.clock.run_id);
                outcome
                    .failures
                    .push(Failure::collaborator(Some(customer), &err).on_tag(&action.rule_name, &action.tag_name));
            }
        }
    }

    fn audit(&self, action: &TagAction, kind: AuditAction, outcome: &mut DispatchOutcome) {
        let record = AuditRecord::new(
            &self.clock.run_id,
            &action.customer_id,
            &action.rule_name,
            &action.tag_name,
            kind,
            self.clock.now,
        );
        if let Err(err) = self.collab.audit.append(&record) {
            log::warn!(
                "run={} customer={} audit write failed for {}: {err}",
                self.clock.run_id,
                action.customer_id,
                action.tag_name
            );
            outcome
                .failures
                .push(Failure::audit_write(&action.customer_id, &err).on_tag(&action.rule_name, &action.tag_name));
        }
    }
}
