use thiserror::Error;

use branchledger_auth::AuthzError;
use branchledger_core::DomainError;

/// Failures raised by the storage layer itself.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// A unique (possibly partial) index rejected the write.
    #[error("unique constraint violated: {constraint}")]
    UniqueViolation { constraint: &'static str },

    #[error("{entity} not found")]
    NotFound { entity: &'static str },

    /// Compare-and-swap on a versioned row failed.
    #[error("stale {entity}: expected version {expected}, found {actual}")]
    StaleVersion {
        entity: &'static str,
        expected: u64,
        actual: u64,
    },

    /// Serialization failure or deadlock; the transaction was rolled back.
    #[error("{operation}: concurrent update, retry")]
    Contention { operation: &'static str },

    #[error("{operation} failed: {message}")]
    Backend {
        operation: &'static str,
        message: String,
    },
}

/// Error returned by every infrastructure service.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ServiceError {
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Authz(#[from] AuthzError),
}

impl ServiceError {
    pub fn domain(&self) -> Option<&DomainError> {
        match self {
            ServiceError::Domain(e) => Some(e),
            _ => None,
        }
    }

    /// Whether the caller (or a remote platform) may simply try again.
    pub fn is_retryable(&self) -> bool {
        match self {
            ServiceError::Storage(StorageError::UniqueViolation { .. })
            | ServiceError::Storage(StorageError::StaleVersion { .. })
            | ServiceError::Storage(StorageError::Contention { .. }) => true,
            ServiceError::Domain(DomainError::SyncUnavailable(_))
            | ServiceError::Domain(DomainError::Conflict(_)) => true,
            _ => false,
        }
    }

    pub fn is_unique_violation(&self) -> bool {
        matches!(self, ServiceError::Storage(StorageError::UniqueViolation { .. }))
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;
