//! Flag evaluation engine — the decision core.
//!
//! EVALUATION ORDER (per customer, fixed):
//!   1. Drop events later than `now`, sort the rest by `event_date`.
//!   2. Assign the A/B group from the customer's contact identity.
//!   3. Walk the catalogue in priority order:
//!        disabled          -> ignored
//!        group mismatch    -> skipped (reported, never an instance)
//!        condition + cooldown -> triggered / retained / standing / blocked
//!   4. Collect malformed-event notes and rule failures.
//!
//! RULES:
//!   - Evaluation is pure: same history, contact and `now` give the same result.
//!   - A failing rule is isolated; the remaining rules still run.
//!   - At most one instance per rule per evaluation.

use crate::{
    ab_group::{AbAssigner, AbGroup},
    catalogue::{tag_for, Catalogue, CatalogueEntry, Priority, RuleContext, RuleMatch, RuleParams, CHILD_SUFFIX},
    clock::within_days,
    collaborators::Contact,
    config::SyncConfig,
    error::FlagResult,
    event::{format_timestamp, sort_history, Attributes, CustomerEvent, RESERVED_FLAG_KEYS},
    report::{Failure, Suppression, SuppressionReason},
    types::{CustomerId, Timestamp},
};
use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceOrigin {
    /// Condition matched and the flag cooldown allowed a new emission.
    Triggered,
    /// Still inside `expires_after_days` of the latest `flag_set`.
    Retained,
    /// No flag cooldown; exists exactly while the condition holds.
    Standing,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlagInstance {
    pub customer_id: CustomerId,
    pub rule_name:   String,
    /// Rule name, suffixed with `_child` when contact comes from a parent.
    pub flag_type:   String,
    pub priority:    Priority,
    pub matched_at:  Timestamp,
    pub output_data: Attributes,
    pub ab_group:    Option<AbGroup>,
    pub party_id:    Option<String>,
    pub origin:      InstanceOrigin,
}

impl FlagInstance {
    pub fn tag_name(&self) -> String {
        tag_for(&self.flag_type)
    }

    /// Only triggered instances write a `flag_set` event.
    pub fn is_new(&self) -> bool {
        self.origin == InstanceOrigin::Triggered
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Evaluation {
    pub customer_id: CustomerId,
    pub ab_group:    AbGroup,
    /// Priority order, high first; ties keep catalogue order.
    pub instances:   Vec<FlagInstance>,
    pub skipped:     Vec<Suppression>,
    pub failures:    Vec<Failure>,
}

impl Evaluation {
    pub fn instance(&self, rule: &str) -> Option<&FlagInstance> {
        self.instances.iter().find(|i| i.rule_name == rule)
    }

    pub fn triggered(&self) -> impl Iterator<Item = &FlagInstance> {
        self.instances.iter().filter(|i| i.is_new())
    }
}

enum RuleOutcome {
    Instance(FlagInstance),
    Blocked { last_flagged: Timestamp },
    Absent,
}

pub struct FlagEngine {
    catalogue:     Catalogue,
    assigner:      AbAssigner,
    experiment_id: String,
}

impl FlagEngine {
    pub fn new(catalogue: Catalogue, assigner: AbAssigner, experiment_id: impl Into<String>) -> Self {
        Self {
            catalogue,
            assigner,
            experiment_id: experiment_id.into(),
        }
    }

    /// Standard catalogue, overrides and experiment from config.
    pub fn from_config(config: &SyncConfig) -> FlagResult<Self> {
        Ok(Self::new(
            Catalogue::standard(config)?,
            AbAssigner::from_config(config),
            config.experiment_id.clone(),
        ))
    }

    pub fn catalogue(&self) -> &Catalogue {
        &self.catalogue
    }

    pub fn assign_group(&self, customer_id: &str, contact: &Contact) -> AbGroup {
        self.assigner
            .assign(customer_id, contact.email.as_deref(), contact.phone.as_deref())
    }

    pub fn evaluate(
        &self,
        customer_id: &str,
        history: &[CustomerEvent],
        contact: &Contact,
        now: Timestamp,
    ) -> Evaluation {
        let mut visible: Vec<CustomerEvent> = history
            .iter()
            .filter(|e| e.event_date <= now)
            .cloned()
            .collect();
        sort_history(&mut visible);

        let ab_group = self.assign_group(customer_id, contact);
        let ctx = RuleContext::new(customer_id, &visible, now, ab_group);
        let mut evaluation = Evaluation {
            customer_id: customer_id.to_string(),
            ab_group,
            instances: Vec::new(),
            skipped: Vec::new(),
            failures: Vec::new(),
        };

        for entry in self.catalogue.entries() {
            let p = &entry.params;
            if !p.enabled {
                continue;
            }
            if let Some(required) = p.ab_group_required {
                if required != ab_group {
                    log::debug!("customer={customer_id} rule={} skipped: group {ab_group} != {required}", p.name);
                    evaluation.skipped.push(Suppression::new(
                        p.name,
                        None,
                        SuppressionReason::GroupMismatch { required, assigned: ab_group },
                    ));
                    continue;
                }
            }
            match self.evaluate_rule(&ctx, entry, contact) {
                Ok(RuleOutcome::Instance(instance)) => {
                    log::debug!(
                        "customer={customer_id} rule={} origin={:?} tag={}",
                        p.name,
                        instance.origin,
                        instance.tag_name()
                    );
                    evaluation.instances.push(instance);
                }
                Ok(RuleOutcome::Blocked { last_flagged }) => {
                    evaluation.skipped.push(Suppression::new(
                        p.name,
                        None,
                        SuppressionReason::FlagCooldown { last_flagged },
                    ));
                }
                Ok(RuleOutcome::Absent) => {}
                Err(err) => {
                    log::warn!("customer={customer_id} rule={} failed: {err}", p.name);
                    evaluation.failures.push(Failure::from_rule(customer_id, p.name, &err));
                }
            }
        }

        for (rule, err) in ctx.take_malformed() {
            evaluation.failures.push(Failure::from_rule(customer_id, &rule, &err));
        }
        evaluation
    }

    fn evaluate_rule(
        &self,
        ctx: &RuleContext<'_>,
        entry: &CatalogueEntry,
        contact: &Contact,
    ) -> FlagResult<RuleOutcome> {
        let p = &entry.params;
        let Some(matched) = entry.rule().condition(ctx)? else {
            return Ok(self.retained(ctx, p, contact).map_or(RuleOutcome::Absent, RuleOutcome::Instance));
        };

        if p.flag_cooldown_days.is_none() {
            return self
                .fresh(ctx, entry, contact, &matched, InstanceOrigin::Standing)
                .map(RuleOutcome::Instance);
        }

        let scope = matched.party_id.as_deref();
        if ctx.cooldown.flag_cooldown_allows(p.name, scope, p.flag_cooldown_days) {
            return self
                .fresh(ctx, entry, contact, &matched, InstanceOrigin::Triggered)
                .map(RuleOutcome::Instance);
        }

        if let Some(instance) = self.retained(ctx, p, contact) {
            return Ok(RuleOutcome::Instance(instance));
        }
        let last_flagged = ctx
            .cooldown
            .latest_flag_set(p.name, scope)
            .map_or(ctx.now, |e| e.event_date);
        Ok(RuleOutcome::Blocked { last_flagged })
    }

    fn fresh(
        &self,
        ctx: &RuleContext<'_>,
        entry: &CatalogueEntry,
        contact: &Contact,
        matched: &RuleMatch,
        origin: InstanceOrigin,
    ) -> FlagResult<FlagInstance> {
        let output = entry.rule().build_output(ctx, matched)?;
        Ok(self.instance(ctx, &entry.params, contact, output, matched.party_id.clone(), origin))
    }

    /// A cooldown rule whose latest `flag_set` is still inside its expiry window.
    fn retained(&self, ctx: &RuleContext<'_>, p: &RuleParams, contact: &Contact) -> Option<FlagInstance> {
        p.flag_cooldown_days?;
        let expires = p.expires_after_days?;
        let last = ctx.cooldown.latest_flag_set(p.name, None)?;
        if !within_days(last.event_date, ctx.now, expires) {
            return None;
        }

        let mut output = last.attributes.clone();
        for key in RESERVED_FLAG_KEYS {
            output.remove(key);
        }
        output.insert("flagged_at".into(), Value::String(format_timestamp(&last.event_date)));
        let party_id = last.attr_text("party_id");
        Some(self.instance(ctx, p, contact, output, party_id, InstanceOrigin::Retained))
    }

    fn instance(
        &self,
        ctx: &RuleContext<'_>,
        p: &RuleParams,
        contact: &Contact,
        mut output: Attributes,
        party_id: Option<String>,
        origin: InstanceOrigin,
    ) -> FlagInstance {
        output.insert("description".into(), Value::String(p.description.to_string()));
        let ab_group = p.experiment.then_some(ctx.ab_group);
        if let Some(group) = ab_group {
            output.insert("experiment_id".into(), Value::String(self.experiment_id.clone()));
            output.insert("ab_group".into(), Value::String(group.as_str().to_string()));
        }
        let flag_type = if contact.via_parent {
            format!("{}{CHILD_SUFFIX}", p.name)
        } else {
            p.name.to_string()
        };

        FlagInstance {
            customer_id: ctx.customer_id.to_string(),
            rule_name: p.name.to_string(),
            flag_type,
            priority: p.priority,
            matched_at: ctx.now,
            output_data: output,
            ab_group,
            party_id,
            origin,
        }
    }
}
