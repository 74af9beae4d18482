//! Error model for the ledger services and their storage.

use thiserror::Error;
use uuid::Uuid;

use stockledger_core::DomainError;

/// Result type returned by ledger services.
pub type LedgerResult<T> = Result<T, LedgerError>;

/// Repository operation error.
///
/// These are **infrastructure errors** (storage, concurrency, uniqueness) as
/// opposed to domain errors, except for `Domain`, which carries a domain rule
/// rejected while a row was being modified under its lock.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Compare-and-swap on a part's quantity failed (`quantity_before` is stale).
    #[error("optimistic concurrency check failed: {0}")]
    Concurrency(String),

    /// A uniqueness constraint was violated (part number, po number, serial).
    #[error("duplicate key: {0}")]
    Duplicate(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// A row precondition did not hold (e.g. releasing a deducted allocation).
    #[error("conflict: {0}")]
    Conflict(String),

    #[error(transparent)]
    Domain(#[from] DomainError),

    /// Lock poisoning, database or driver failures.
    #[error("storage backend failure: {0}")]
    Backend(String),
}

/// One failed line of a batch operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedLine {
    pub line: Uuid,
    pub error: String,
}

/// Error surfaced by ledger services.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// Unknown references, non-positive inputs, negative-stock rejection, duplicates.
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// `quantity_before` kept changing underneath the append; re-read and retry.
    #[error("concurrency conflict: {0}")]
    ConcurrencyConflict(String),

    /// Some lines of a batch committed and others failed.
    #[error(
        "partial failure: {} line(s) succeeded, {} line(s) failed",
        succeeded.len(),
        failed.len()
    )]
    PartialFailure {
        succeeded: Vec<Uuid>,
        failed: Vec<FailedLine>,
    },

    #[error("invalid transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("storage failure: {0}")]
    Storage(String),
}

impl LedgerError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }
}

impl From<DomainError> for LedgerError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::Validation(msg) => LedgerError::Validation(msg),
            DomainError::InvariantViolation(msg) => LedgerError::Validation(msg),
            DomainError::InvalidId(msg) => LedgerError::Validation(msg),
            DomainError::NotFound(what) => LedgerError::NotFound(what),
            DomainError::InvalidTransition { from, to } => {
                LedgerError::InvalidTransition { from, to }
            }
        }
    }
}

impl From<StoreError> for LedgerError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::Concurrency(msg) => LedgerError::ConcurrencyConflict(msg),
            StoreError::Duplicate(msg) => LedgerError::Validation(format!("duplicate {msg}")),
            StoreError::NotFound(what) => LedgerError::NotFound(what),
            StoreError::Conflict(msg) => LedgerError::Validation(msg),
            StoreError::Domain(err) => err.into(),
            StoreError::Backend(msg) => LedgerError::Storage(msg),
        }
    }
}
