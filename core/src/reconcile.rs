//! Tag reconciliation — diffs desired flag state against external tags.
//!
//! RULES:
//!   - Pure: no I/O, no clock. The same inputs always yield the same plan.
//!   - Only managed tags are ever removed. Unmanaged tags and acknowledgement
//!     (`-sent`) tags belong to someone else.
//!   - A managed tag stays only while an eligible instance produces it. A
//!     superseded variant of an eligible rule (`-child` after the customer
//!     gets their own contact, or the reverse) is removed.
//!   - A tag missing externally is re-added unless its rule's sync cooldown
//!     is still running, which stops a mid-flow customer being messaged twice.

use crate::{
    catalogue::Catalogue,
    cooldown::CooldownTracker,
    engine::FlagInstance,
    event::CustomerEvent,
    report::{Suppression, SuppressionReason},
    types::{CustomerId, Timestamp},
};
use serde::Serialize;
use std::collections::BTreeSet;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TagAction {
    pub customer_id: CustomerId,
    pub rule_name:   String,
    pub tag_name:    String,
    pub party_id:    Option<String>,
    /// Extra tag configured alongside the rule's canonical tag.
    pub alias:       bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReconciliationPlan {
    pub customer_id:    CustomerId,
    /// Instance priority order; canonical tag before its aliases.
    pub tags_to_add:    Vec<TagAction>,
    /// Ascending tag order.
    pub tags_to_remove: Vec<TagAction>,
    pub suppressed:     Vec<Suppression>,
}

impl ReconciliationPlan {
    pub fn is_empty(&self) -> bool {
        self.tags_to_add.is_empty() && self.tags_to_remove.is_empty()
    }

    pub fn adds(&self) -> Vec<&str> {
        self.tags_to_add.iter().map(|a| a.tag_name.as_str()).collect()
    }

    pub fn removes(&self) -> Vec<&str> {
        self.tags_to_remove.iter().map(|a| a.tag_name.as_str()).collect()
    }
}

pub struct TagReconciler<'a> {
    catalogue: &'a Catalogue,
    now:       Timestamp,
}

impl<'a> TagReconciler<'a> {
    pub fn new(catalogue: &'a Catalogue, now: Timestamp) -> Self {
        Self { catalogue, now }
    }

    /// `sync_history` is the customer's event history; only its
    /// `flag_synced_to_shopify` events are consulted.
    pub fn reconcile(
        &self,
        customer_id: &str,
        eligible: &[FlagInstance],
        current_tags: &BTreeSet<String>,
        sync_history: &[CustomerEvent],
    ) -> ReconciliationPlan {
        let tracker = CooldownTracker::new(sync_history, self.now);
        let mut plan = ReconciliationPlan {
            customer_id: customer_id.to_string(),
            tags_to_add: Vec::new(),
            tags_to_remove: Vec::new(),
            suppressed: Vec::new(),
        };

        let mut eligible_rules = BTreeSet::new();
        let mut desired = BTreeSet::new();
        for instance in eligible {
            if !eligible_rules.insert(instance.rule_name.as_str()) {
                continue;
            }
            let sync_days = self
                .catalogue
                .params(&instance.rule_name)
                .and_then(|p| p.sync_cooldown_days);

            let tags = self.catalogue.tags_for(&instance.rule_name, &instance.flag_type);
            desired.extend(tags.iter().cloned());
            for (i, tag) in tags.iter().enumerate() {
                if current_tags.contains(tag) {
                    plan.suppressed.push(Suppression::new(
                        &instance.rule_name,
                        Some(tag),
                        SuppressionReason::AlreadyPresent,
                    ));
                    continue;
                }
                if !tracker.sync_cooldown_allows(&instance.rule_name, sync_days) {
                    let last_synced = tracker
                        .latest_sync(&instance.rule_name)
                        .map_or(self.now, |e| e.event_date);
                    plan.suppressed.push(Suppression::new(
                        &instance.rule_name,
                        Some(tag),
                        SuppressionReason::SyncCooldown { last_synced },
                    ));
                    continue;
                }
                plan.tags_to_add.push(TagAction {
                    customer_id: customer_id.to_string(),
                    rule_name: instance.rule_name.clone(),
                    tag_name: tag.clone(),
                    party_id: instance.party_id.clone(),
                    alias: i > 0,
                });
            }
        }

        for tag in current_tags {
            let Some(rule) = self.catalogue.rule_for_tag(tag) else { continue };
            if desired.contains(tag) {
                continue;
            }
            plan.tags_to_remove.push(TagAction {
                customer_id: customer_id.to_string(),
                rule_name: rule.to_string(),
                tag_name: tag.clone(),
                party_id: None,
                alias: self.catalogue.is_alias(tag),
            });
        }

        log::debug!(
            "customer={customer_id} plan: +{} -{} suppressed={}",
            plan.tags_to_add.len(),
            plan.tags_to_remove.len(),
            plan.suppressed.len()
        );
        plan
    }
}
