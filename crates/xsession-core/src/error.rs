//! Error types for xsession-core

use thiserror::Error;

use crate::models::{FileId, SessionState, XSessionId};

/// Result type alias using xsession-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Illegal lease transitions. Reported synchronously, never retried.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LeaseError {
    #[error("{x_session_id} does not hold the edit session for {file_id}")]
    NotHolder {
        file_id: FileId,
        x_session_id: XSessionId,
    },

    #[error("No edit session found for {file_id}")]
    SessionNotFound { file_id: FileId },

    #[error("No applicant is queued for {file_id}")]
    NoApplicant { file_id: FileId },

    #[error("Edit session for {file_id} is {actual}, caller expected {expected}")]
    StateMismatch {
        file_id: FileId,
        expected: SessionState,
        actual: SessionState,
    },
}

impl LeaseError {
    /// Stable identifier surfaced to gateway callers
    pub const fn code(&self) -> &'static str {
        match self {
            Self::NotHolder { .. } => "NotHolder",
            Self::SessionNotFound { .. } => "SessionNotFound",
            Self::NoApplicant { .. } => "NoApplicant",
            Self::StateMismatch { .. } => "StateMismatch",
        }
    }
}

/// Errors that can occur in xsession-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Lease violation
    #[error(transparent)]
    Lease(#[from] LeaseError),

    /// Ledger backend failure
    #[error("Ledger error: {0}")]
    Ledger(String),

    /// libSQL error
    #[error("libSQL error: {0}")]
    LibSql(#[from] libsql::Error),

    /// Version store unreachable or rejected the call
    #[error("Version store error: {0}")]
    VersionStore(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Stable identifier surfaced to gateway callers
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Lease(error) => error.code(),
            Self::InvalidInput(_) => "InvalidInput",
            Self::Ledger(_)
            | Self::LibSql(_)
            | Self::VersionStore(_)
            | Self::Serialization(_)
            | Self::Io(_) => "InternalError",
        }
    }

    /// Infrastructure failures leave the ledger untouched and are safe to retry
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Ledger(_) | Self::LibSql(_) | Self::VersionStore(_) | Self::Io(_)
        )
    }
}
