//! Batch sync runner — drives the per-customer pipeline for one run.
//!
//! PER CUSTOMER (strictly sequential):
//!   1. read history + contact
//!   2. evaluate            (FlagEngine)
//!   3. append flag_set     (triggered instances, non-dry runs only)
//!   4. read external tags
//!   5. reconcile           (TagReconciler)
//!   6. dispatch + audit    (non-dry runs only)
//!
//! RULES:
//!   - Customers run in ascending id order and never share mutable state.
//!   - A dry run reads exactly what a real run reads and reaches the same
//!     decisions; it only skips steps 3 and 6.
//!   - Any single customer's failure is recorded and the batch continues.

use crate::{
    clock::RunClock,
    collaborators::Collaborators,
    config::SyncConfig,
    dispatch::Dispatcher,
    engine::{FlagEngine, FlagInstance},
    error::{FlagError, FlagResult},
    event::CustomerEvent,
    reconcile::TagReconciler,
    report::{CustomerReport, Failure, RunReport},
};

pub struct SyncRunner<'a> {
    clock:  RunClock,
    config: SyncConfig,
    engine: FlagEngine,
    collab: Collaborators<'a>,
}

impl<'a> SyncRunner<'a> {
    /// Fails only if the configured catalogue is invalid.
    pub fn new(clock: RunClock, config: SyncConfig, collab: Collaborators<'a>) -> FlagResult<Self> {
        let engine = FlagEngine::from_config(&config)?;
        Ok(Self { clock, config, engine, collab })
    }

    pub fn clock(&self) -> &RunClock {
        &self.clock
    }

    pub fn engine(&self) -> &FlagEngine {
        &self.engine
    }

    /// Evaluate one customer without side effects.
    pub fn evaluate_customer(&self, customer_id: &str) -> FlagResult<Vec<FlagInstance>> {
        let history = self.collab.events.read(customer_id).map_err(FlagError::from)?;
        let contact = self.collab.identity.lookup(customer_id).map_err(FlagError::from)?;
        let evaluation = self.engine.evaluate(customer_id, &history, &contact, self.clock.now);
        Ok(evaluation.instances)
    }

    pub fn run_sync(&self, dry_run: bool) -> RunReport {
        let mut report = RunReport::new(&self.clock.run_id, self.clock.now, dry_run);
        log::info!(
            "run={} sync start now={} dry_run={dry_run} rules={}",
            self.clock.run_id,
            self.clock.now,
            self.engine.catalogue().len()
        );

        let mut customers = match self.collab.events.customer_ids() {
            Ok(ids) => ids,
            Err(err) => {
                log::error!("run={} cannot list customers: {err}", self.clock.run_id);
                report.failures.push(Failure::collaborator(None, &err));
                return report;
            }
        };
        customers.sort();
        customers.dedup();

        for customer_id in &customers {
            report.customers.push(self.sync_customer(customer_id, dry_run));
        }

        log::info!(
            "run={} sync done: customers={} added={} removed={} suppressed={} failed={}",
            self.clock.run_id,
            report.customers.len(),
            if dry_run { report.planned_adds() } else { report.added() },
            if dry_run { report.planned_removes() } else { report.removed() },
            report.suppressed(),
            report.failed()
        );
        report
    }

    pub fn sync_customer(&self, customer_id: &str, dry_run: bool) -> CustomerReport {
        let mut report = CustomerReport::new(customer_id);

        let history = match self.collab.events.read(customer_id) {
            Ok(h) => h,
            Err(err) => {
                log::warn!("run={} customer={customer_id} history read failed: {err}", self.clock.run_id);
                report.failures.push(Failure::collaborator(Some(customer_id), &err));
                return report;
            }
        };
        let contact = match self.collab.identity.lookup(customer_id) {
            Ok(c) => c,
            Err(err) => {
                log::warn!("run={} customer={customer_id} contact lookup failed: {err}", self.clock.run_id);
                report.failures.push(Failure::collaborator(Some(customer_id), &err));
                return report;
            }
        };

        let evaluation = self.engine.evaluate(customer_id, &history, &contact, self.clock.now);
        report.ab_group = Some(evaluation.ab_group);
        report.suppressed.extend(evaluation.skipped.iter().cloned());
        report.failures.extend(evaluation.failures.iter().cloned());

        if !dry_run {
            for instance in evaluation.triggered() {
                if let Err(err) = self.collab.events.append(&CustomerEvent::flag_set(instance)) {
                    log::warn!(
                        "run={} customer={customer_id} flag_set write failed for {}: {err}",
                        self.clock.run_id,
                        instance.rule_name
                    );
                    report
                        .failures
                        .push(Failure::audit_write(customer_id, &err).on_tag(&instance.rule_name, &instance.tag_name()));
                }
            }
        }
        report.instances = evaluation.instances;

        let current_tags = match self.collab.tags.read_tags(customer_id) {
            Ok(tags) => tags,
            Err(err) => {
                log::warn!("run={} customer={customer_id} tag read failed: {err}", self.clock.run_id);
                report.failures.push(Failure::collaborator(Some(customer_id), &err));
                return report;
            }
        };

        let plan = TagReconciler::new(self.engine.catalogue(), self.clock.now).reconcile(
            customer_id,
            &report.instances,
            &current_tags,
            &history,
        );
        report.suppressed.extend(plan.suppressed.iter().cloned());
        report.tags_to_add = plan.tags_to_add.clone();
        report.tags_to_remove = plan.tags_to_remove.clone();

        if dry_run || plan.is_empty() {
            return report;
        }

        let dispatcher = Dispatcher::new(
            self.collab,
            self.engine.catalogue(),
            &self.clock,
            &self.config.consent_method,
            self.config.halt_customer_on_failure,
        );
        let outcome = dispatcher.dispatch(&plan, &contact);
        report.applied = outcome.applied;
        report.subscribed = outcome.subscribed;
        report.failures.extend(outcome.failures);
        report
    }
}
