use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use branchledger_core::DomainError;
use branchledger_infra::{ServiceError, StorageError};

/// Map a service failure onto the webhook HTTP contract.
///
/// Platforms only distinguish 200 from everything else and redeliver on the
/// rest, so the status set is small: 401 for a bad signature, 404 when the
/// target store cannot be resolved, 500 for any other failure. The `error`
/// code in the body keeps the finer classification for operators.
pub fn service_error_to_response(err: ServiceError) -> Response {
    let message = err.to_string();
    match err {
        ServiceError::Domain(DomainError::InvalidSignature) => {
            json_error(StatusCode::UNAUTHORIZED, "invalid_signature", message)
        }
        ServiceError::Domain(DomainError::UnknownStoreOrInactive) => {
            json_error(StatusCode::NOT_FOUND, "unknown_store", message)
        }
        other => json_error(StatusCode::INTERNAL_SERVER_ERROR, error_code(&other), message),
    }
}

fn error_code(err: &ServiceError) -> &'static str {
    match err {
        ServiceError::Domain(domain) => match domain {
            DomainError::SyncUnavailable(_) => "sync_unavailable",
            DomainError::Conflict(_) | DomainError::MappingConflict(_) => "conflict",
            DomainError::Validation(_) | DomainError::InvalidId(_) => "validation_error",
            DomainError::InvalidQuantity(_) => "invalid_quantity",
            DomainError::InsufficientStock { .. } => "insufficient_stock",
            DomainError::NotFound => "not_found",
            DomainError::Unauthorized | DomainError::CrossBranchAccessDenied => "unauthorized",
            _ => "internal_error",
        },
        ServiceError::Storage(StorageError::NotFound { .. }) => "not_found",
        ServiceError::Storage(_) if err.is_retryable() => "storage_contention",
        ServiceError::Storage(_) => "storage_error",
        ServiceError::Authz(_) => "unauthorized",
    }
}

pub fn json_error(status: StatusCode, code: &'static str, message: impl Into<String>) -> Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}
