//! Domain error model.

use rust_decimal::Decimal;
use thiserror::Error;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Deterministic business failures only. Storage and transport failures are
/// modelled by the infrastructure crate and wrap this type.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A value failed validation (e.g. malformed input).
    #[error("validation failed: {0}")]
    Validation(String),

    /// A domain invariant was violated.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// A requested resource was not found (domain-level).
    #[error("not found")]
    NotFound,

    /// A conflict occurred (e.g. stale version / optimistic concurrency).
    #[error("conflict: {0}")]
    Conflict(String),

    /// Authorization failure at the domain boundary.
    #[error("unauthorized")]
    Unauthorized,

    /// A non-positive (or negative) quantity was submitted.
    #[error("invalid quantity: {0}")]
    InvalidQuantity(String),

    /// An outbound movement would take stock below zero while the tenant
    /// disallows negative stock.
    #[error("insufficient stock: available {available}, requested {requested}")]
    InsufficientStock { available: Decimal, requested: Decimal },

    /// The movement was already posted for this reference. Callers treat this
    /// as a successful no-op.
    #[error("duplicate movement for reference {0}")]
    DuplicateMovement(String),

    /// The acting user may not read or write data of the given branch.
    #[error("cross-branch access denied")]
    CrossBranchAccessDenied,

    /// Webhook signature did not match the raw body.
    #[error("invalid webhook signature")]
    InvalidSignature,

    /// Store does not exist, is inactive, or its platform does not match.
    #[error("unknown or inactive store")]
    UnknownStoreOrInactive,

    /// A product/store mapping could not be created or updated after retry.
    #[error("product mapping conflict: {0}")]
    MappingConflict(String),

    /// Illegal stock-transfer transition.
    #[error("illegal transfer transition: {0}")]
    TransferStateError(String),

    /// The initiator of a workflow attempted to decide on it.
    #[error("self-approval is not allowed")]
    SelfApprovalError,

    /// The approval record was already approved or rejected.
    #[error("approval already decided")]
    AlreadyDecided,

    /// The approval record does not belong to the instance's current stage.
    #[error("stage mismatch: approval is for '{approval_stage}', instance is at '{current_stage}'")]
    StageMismatch {
        approval_stage: String,
        current_stage: String,
    },

    /// An external sync dependency timed out or was unreachable; retryable.
    #[error("sync unavailable: {0}")]
    SyncUnavailable(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn not_found() -> Self {
        Self::NotFound
    }

    pub fn invalid_quantity(msg: impl Into<String>) -> Self {
        Self::InvalidQuantity(msg.into())
    }

    pub fn transfer_state(msg: impl Into<String>) -> Self {
        Self::TransferStateError(msg.into())
    }

    /// Errors the caller is expected to fix before resubmitting.
    pub fn is_user_correctable(&self) -> bool {
        matches!(
            self,
            Self::Validation(_)
                | Self::InvalidQuantity(_)
                | Self::InsufficientStock { .. }
                | Self::TransferStateError(_)
                | Self::StageMismatch { .. }
                | Self::SelfApprovalError
        )
    }
}
