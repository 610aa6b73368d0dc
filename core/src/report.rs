//! Run reports — what a sync run decided, did, skipped and failed at.
//!
//! RULE: Nothing is dropped silently. Every suppression carries a reason and
//! every failure names its kind and, where one was involved, its collaborator.

use crate::{
    ab_group::AbGroup,
    audit::AuditAction,
    collaborators::Channel,
    engine::FlagInstance,
    error::{CollaboratorError, FlagError},
    reconcile::TagAction,
    types::{CustomerId, RunId, Timestamp},
};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SuppressionReason {
    GroupMismatch { required: AbGroup, assigned: AbGroup },
    FlagCooldown { last_flagged: Timestamp },
    SyncCooldown { last_synced: Timestamp },
    AlreadyPresent,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Suppression {
    pub rule_name: String,
    pub tag_name:  Option<String>,
    #[serde(flatten)]
    pub reason:    SuppressionReason,
}

impl Suppression {
    pub fn new(rule_name: &str, tag_name: Option<&str>, reason: SuppressionReason) -> Self {
        Self {
            rule_name: rule_name.to_string(),
            tag_name: tag_name.map(str::to_string),
            reason,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    MalformedEvent,
    RuleEvaluation,
    Collaborator,
    AuditWrite,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Failure {
    pub kind:         FailureKind,
    pub customer_id:  Option<CustomerId>,
    pub rule_name:    Option<String>,
    pub tag_name:     Option<String>,
    pub collaborator: Option<String>,
    pub reason:       String,
}

impl Failure {
    pub fn from_rule(customer_id: &str, rule: &str, err: &FlagError) -> Self {
        let kind = match err {
            FlagError::MalformedEvent { .. } => FailureKind::MalformedEvent,
            _ => FailureKind::RuleEvaluation,
        };
        Self {
            kind,
            customer_id: Some(customer_id.to_string()),
            rule_name: Some(rule.to_string()),
            tag_name: None,
            collaborator: None,
            reason: err.to_string(),
        }
    }

    pub fn collaborator(customer_id: Option<&str>, err: &CollaboratorError) -> Self {
        Self {
            kind: FailureKind::Collaborator,
            customer_id: customer_id.map(str::to_string),
            rule_name: None,
            tag_name: None,
            collaborator: Some(err.collaborator.clone()),
            reason: err.reason.clone(),
        }
    }

    pub fn audit_write(customer_id: &str, err: &CollaboratorError) -> Self {
        Self {
            kind: FailureKind::AuditWrite,
            ..Self::collaborator(Some(customer_id), err)
        }
    }

    pub fn on_tag(mut self, rule: &str, tag: &str) -> Self {
        self.rule_name = Some(rule.to_string());
        self.tag_name = Some(tag.to_string());
        self
    }
}

/// A mutation that the tag store accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppliedAction {
    pub rule_name: String,
    pub tag_name:  String,
    pub action:    AuditAction,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CustomerReport {
    pub customer_id:    CustomerId,
    pub ab_group:       Option<AbGroup>,
    pub instances:      Vec<FlagInstance>,
    pub tags_to_add:    Vec<TagAction>,
    pub tags_to_remove: Vec<TagAction>,
    pub suppressed:     Vec<Suppression>,
    pub applied:        Vec<AppliedAction>,
    pub subscribed:     Vec<Channel>,
    pub failures:       Vec<Failure>,
}

impl CustomerReport {
    pub fn new(customer_id: &str) -> Self {
        Self {
            customer_id: customer_id.to_string(),
            ab_group: None,
            instances: Vec::new(),
            tags_to_add: Vec::new(),
            tags_to_remove: Vec::new(),
            suppressed: Vec::new(),
            applied: Vec::new(),
            subscribed: Vec::new(),
            failures: Vec::new(),
        }
    }

    pub fn applied_tags(&self, action: AuditAction) -> Vec<&str> {
        self.applied
            .iter()
            .filter(|a| a.action == action)
            .map(|a| a.tag_name.as_str())
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    pub run_id:    RunId,
    pub now:       Timestamp,
    pub dry_run:   bool,
    /// Ascending by customer id.
    pub customers: Vec<CustomerReport>,
    /// Failures not tied to one customer (e.g. listing customers).
    pub failures:  Vec<Failure>,
}

impl RunReport {
    pub fn new(run_id: &str, now: Timestamp, dry_run: bool) -> Self {
        Self {
            run_id: run_id.to_string(),
            now,
            dry_run,
            customers: Vec::new(),
            failures: Vec::new(),
        }
    }

    pub fn customer(&self, customer_id: &str) -> Option<&CustomerReport> {
        self.customers.iter().find(|c| c.customer_id == customer_id)
    }

    pub fn added(&self) -> usize {
        self.count_applied(AuditAction::Add)
    }

    pub fn removed(&self) -> usize {
        self.count_applied(AuditAction::Remove)
    }

    pub fn planned_adds(&self) -> usize {
        self.customers.iter().map(|c| c.tags_to_add.len()).sum()
    }

    pub fn planned_removes(&self) -> usize {
        self.customers.iter().map(|c| c.tags_to_remove.len()).sum()
    }

    pub fn suppressed(&self) -> usize {
        self.customers.iter().map(|c| c.suppressed.len()).sum()
    }

    pub fn failed(&self) -> usize {
        self.failures.len() + self.customers.iter().map(|c| c.failures.len()).sum::<usize>()
    }

    pub fn all_failures(&self) -> impl Iterator<Item = &Failure> {
        self.failures
            .iter()
            .chain(self.customers.iter().flat_map(|c| c.failures.iter()))
    }

    fn count_applied(&self, action: AuditAction) -> usize {
        self.customers
            .iter()
            .flat_map(|c| c.applied.iter())
            .filter(|a| a.action == action)
            .count()
    }
}
