//! Audit trail of every tag mutation.
//!
//! RULE: Append-only. A record is written only after the mutation it
//! describes succeeded, so the log never claims an action that did not happen.

use crate::types::{CustomerId, RunId, Timestamp};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditAction {
    Add,
    Remove,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Add    => "add",
            AuditAction::Remove => "remove",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "add" | "added"      => Some(AuditAction::Add),
            "remove" | "removed" => Some(AuditAction::Remove),
            _                    => None,
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRecord {
    /// Store-assigned; None until persisted.
    pub id:          Option<i64>,
    pub run_id:      RunId,
    pub customer_id: CustomerId,
    pub rule_name:   String,
    pub tag_name:    String,
    pub action:      AuditAction,
    pub timestamp:   Timestamp,
}

impl AuditRecord {
    pub fn new(
        run_id: &str,
        customer_id: &str,
        rule_name: &str,
        tag_name: &str,
        action: AuditAction,
        timestamp: Timestamp,
    ) -> Self {
        Self {
            id: None,
            run_id: run_id.to_string(),
            customer_id: customer_id.to_string(),
            rule_name: rule_name.to_string(),
            tag_name: tag_name.to_string(),
            action,
            timestamp,
        }
    }
}
