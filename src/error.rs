// 🚨 Error taxonomy for reconciliation runs
//
// Fatal errors (configuration, candidate query) propagate to main.
// Per-record errors are caught at the record boundary by the engine.
// Quota exhaustion, "not found" and transient geocode failures are
// outcomes, not errors (see HaltReason and GeocodeOutcome).

use thiserror::Error;

/// Result type for library operations
pub type Result<T> = std::result::Result<T, ReconcileError>;

#[derive(Error, Debug)]
pub enum ReconcileError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Data source error: {0}")]
    DataSource(#[from] rusqlite::Error),

    #[error("Unexpected error for record {id}: {reason}")]
    UnexpectedRecord { id: String, reason: String },

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

impl ReconcileError {
    pub fn config(message: impl Into<String>) -> Self {
        ReconcileError::Configuration(message.into())
    }
}
