//! flagsync-core: marketing-flag evaluation and tag synchronization.
//!
//! PIPELINE (fixed, per customer, never reordered):
//!   1. Event store read      (the only source of truth)
//!   2. Flag evaluation       (rule catalogue + A/B assigner + cooldown tracker)
//!   3. Tag reconciliation    (pure decision: add / remove / suppress)
//!   4. Side-effect dispatch  (tag mutations, subscriptions, consent)
//!   5. Audit append          (strictly after the mutation it records)
//!
//! RULES:
//!   - Evaluation and reconciliation never read the system clock.
//!   - Nothing but the store module issues SQL.
//!   - No single customer's or rule's failure aborts a batch.

pub mod ab_group;
pub mod audit;
pub mod catalogue;
pub mod clock;
pub mod collaborators;
pub mod config;
pub mod cooldown;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod event;
pub mod memory;
pub mod reconcile;
pub mod report;
pub mod rules;
pub mod store;
pub mod sync;
pub mod types;
