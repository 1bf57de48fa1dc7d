//! Unified error types for the sluice ecosystem.
//!
//! This module provides a common error type [`SluiceError`] that can represent
//! errors from any part of the system. Domain-specific error types convert to
//! `SluiceError` for uniform handling at API boundaries; an outer surface maps
//! each variant to a status category in one place.
//!
//! Solver non-convergence is deliberately NOT an error: the hydraulic solver
//! returns a convergence report and callers decide whether partial results
//! are usable.

use thiserror::Error;

/// Unified error type for all sluice operations.
#[derive(Error, Debug)]
pub enum SluiceError {
    /// I/O errors (file access, etc.)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Parsing/deserialization errors
    #[error("Parse error: {0}")]
    Parse(String),

    /// Topology/data validation errors (fatal at load time)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Caller supplied an out-of-domain value (week out of range, negative
    /// demand, unknown mode)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Referenced entity does not exist
    #[error("{kind} '{id}' not found")]
    NotFound { kind: &'static str, id: String },

    /// A state machine rejected the requested transition; carries the
    /// offending current state
    #[error("invalid {entity} transition: {from} -> {to}")]
    StateConflict {
        entity: &'static str,
        from: String,
        to: String,
    },

    /// Hydraulic infeasibility that could not be recovered locally
    #[error("hydraulically infeasible: {0}")]
    Infeasible(String),

    /// Collaborator service timeout or failure after retries
    #[error("external service '{service}' unavailable: {reason}")]
    External { service: String, reason: String },

    /// Optimization did not finish within its budget and no feasible
    /// incumbent existed
    #[error("solver timed out: {0}")]
    SolverTimeout(String),

    /// Generic errors (for wrapping external errors)
    #[error("{0}")]
    Other(String),
}

impl SluiceError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        SluiceError::NotFound {
            kind,
            id: id.into(),
        }
    }

    pub fn state_conflict(
        entity: &'static str,
        from: impl std::fmt::Display,
        to: impl std::fmt::Display,
    ) -> Self {
        SluiceError::StateConflict {
            entity,
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    /// Whether the error is the caller's fault (4xx-equivalent category).
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            SluiceError::InvalidInput(_)
                | SluiceError::NotFound { .. }
                | SluiceError::StateConflict { .. }
        )
    }
}

/// Convenience type alias for Results using SluiceError.
pub type SluiceResult<T> = Result<T, SluiceError>;

// Conversion from anyhow::Error
impl From<anyhow::Error> for SluiceError {
    fn from(err: anyhow::Error) -> Self {
        SluiceError::Other(err.to_string())
    }
}

impl From<String> for SluiceError {
    fn from(s: String) -> Self {
        SluiceError::Other(s)
    }
}

impl From<&str> for SluiceError {
    fn from(s: &str) -> Self {
        SluiceError::Other(s.to_string())
    }
}

impl From<serde_json::Error> for SluiceError {
    fn from(err: serde_json::Error) -> Self {
        SluiceError::Parse(err.to_string())
    }
}
