//! Shared primitive types used across the engine.

/// A stable customer identifier, as written by ingestion.
pub type CustomerId = String;

/// The canonical batch-run identifier.
pub type RunId = String;

/// Event timestamps are naive and UTC by convention.
pub type Timestamp = chrono::NaiveDateTime;
