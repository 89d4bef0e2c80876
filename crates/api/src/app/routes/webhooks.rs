//! `POST /webhooks/:platform/:store_id`.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Bytes,
    extract::{Extension, Path},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::warn;

use branchledger_core::DomainError;
use branchledger_infra::services::{Cancellation, WebhookRequest};
use branchledger_infra::{ServiceError, ServiceResult};
use branchledger_sync::{StoreId, StoreKind};

use crate::app::errors::service_error_to_response;
use crate::app::services::AppServices;

pub async fn receive(
    Extension(services): Extension<Arc<AppServices>>,
    Path((platform, store_id)): Path<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    // Unknown platforms and malformed ids are indistinguishable from an
    // unknown store to the caller.
    let Some(kind) = StoreKind::from_platform(&platform) else {
        return service_error_to_response(DomainError::UnknownStoreOrInactive.into());
    };
    let Ok(store_id) = store_id.parse::<StoreId>() else {
        return service_error_to_response(DomainError::UnknownStoreOrInactive.into());
    };

    let cancellation = Cancellation::new();
    let request = WebhookRequest {
        signature: header(&headers, kind.signature_header()),
        topic: kind.topic_header().and_then(|name| header(&headers, name)),
        body: body.to_vec(),
        cancellation: cancellation.clone(),
    };

    let sync = services.sync.clone();
    let handled = within(services.webhook_timeout, cancellation, move || {
        sync.handle_webhook(kind, store_id, &request)
    })
    .await;

    match handled {
        Ok(outcome) => (StatusCode::OK, Json(json!({ "success": true, "result": outcome }))).into_response(),
        Err(err) => service_error_to_response(err),
    }
}

fn header(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned)
}

/// Run blocking service work off the async runtime, cancelling it after
/// `timeout`.
///
/// Work that is past its last cancellation check still commits, so on timeout
/// this waits for the real outcome instead of guessing: either the work saw
/// the flag and rolled back (`SyncUnavailable`), or it committed and its
/// result is reported as is.
pub(crate) async fn within<T, F>(timeout: Duration, cancellation: Cancellation, work: F) -> ServiceResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> ServiceResult<T> + Send + 'static,
{
    let mut task = tokio::task::spawn_blocking(work);
    let joined = match tokio::time::timeout(timeout, &mut task).await {
        Ok(joined) => joined,
        Err(_) => {
            warn!(timeout_ms = timeout.as_millis() as u64, "webhook processing timed out, cancelling");
            cancellation.cancel();
            task.await
        }
    };
    match joined {
        Ok(result) => result,
        Err(join) => {
            warn!(error = %join, "webhook handler did not complete");
            Err(ServiceError::from(DomainError::invariant("webhook handler aborted")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn timed_out_work_that_checks_the_flag_is_cancelled() {
        let cancellation = Cancellation::new();
        let seen = cancellation.clone();
        let result: ServiceResult<()> = within(Duration::from_millis(20), cancellation, move || {
            std::thread::sleep(Duration::from_millis(200));
            seen.check()
        })
        .await;

        assert!(matches!(
            result,
            Err(ServiceError::Domain(DomainError::SyncUnavailable(_)))
        ));
    }

    #[tokio::test]
    async fn timed_out_work_past_its_check_reports_what_it_did() {
        let cancellation = Cancellation::new();
        let seen = cancellation.clone();
        let result = within(Duration::from_millis(20), cancellation, move || {
            seen.check()?;
            std::thread::sleep(Duration::from_millis(200));
            Ok(7)
        })
        .await;

        assert_eq!(result, Ok(7));
    }

    #[tokio::test]
    async fn fast_work_passes_its_result_through() {
        let result = within(Duration::from_secs(5), Cancellation::new(), || Ok(7)).await;
        assert_eq!(result, Ok(7));
    }
}
