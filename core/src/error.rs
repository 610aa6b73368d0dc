use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FlagError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Malformed {event_type} event for customer '{customer_id}': {reason}")]
    MalformedEvent {
        customer_id: String,
        event_type:  String,
        reason:      String,
    },

    #[error("Rule '{rule}' failed: {reason}")]
    RuleEvaluation { rule: String, reason: String },

    #[error("Invalid rule catalogue: {0}")]
    InvalidCatalogue(String),

    #[error(transparent)]
    Collaborator(#[from] CollaboratorError),

    #[error("Audit write failed: {0}")]
    AuditWrite(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type FlagResult<T> = Result<T, FlagError>;

/// A single failed call to an external collaborator.
/// Collaborator failures are recorded per action, never raised for a batch.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[error("{collaborator} failed: {reason}")]
pub struct CollaboratorError {
    pub collaborator: String,
    pub reason:       String,
}

impl CollaboratorError {
    pub fn new(collaborator: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            collaborator: collaborator.into(),
            reason:       reason.into(),
        }
    }

    /// Wrap a store-side error as a collaborator failure.
    pub fn from_store(collaborator: &str, err: FlagError) -> Self {
        Self::new(collaborator, err.to_string())
    }
}
