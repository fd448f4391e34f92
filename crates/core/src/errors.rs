use thiserror::Error;

/// Rejected values at the edge of the domain model.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("Invalid phase: {0}")]
    InvalidPhase(String),
    #[error("Invalid status: {0}")]
    InvalidStatus(String),
    #[error("Invalid risk level: {0}")]
    InvalidRiskLevel(String),
    #[error("domain invariant violation: {0}")]
    InvariantViolation(String),
}
