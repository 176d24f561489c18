use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use chrono::Utc;
use serde_json::{Value, json};
use taskwire_core::WebhookPayload;
use tracing::instrument;

use super::webhook::{SIGNATURE_HEADER, TIMESTAMP_HEADER, WebhookError, WebhookManager};

/// Build the axum router that receives agent webhook notifications.
pub fn webhook_router(manager: Arc<WebhookManager>) -> Router {
    Router::new()
        .route("/webhooks/{task_type}/{operation_id}", post(webhook_handler))
        .with_state(manager)
}

fn error_response(status: StatusCode, error: &WebhookError) -> Response {
    (status, Json(json!({ "error": error.to_string() }))).into_response()
}

/// POST /webhooks/{task_type}/{operation_id}
#[instrument(skip(manager, headers, body))]
async fn webhook_handler(
    State(manager): State<Arc<WebhookManager>>,
    Path((task_type, operation_id)): Path<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let header = |name: &str| headers.get(name).and_then(|value| value.to_str().ok());
    if let Err(err) = manager.verify_signature(
        header(TIMESTAMP_HEADER),
        header(SIGNATURE_HEADER),
        &body,
        Utc::now(),
    ) {
        tracing::warn!(%operation_id, error = %err, "rejected webhook");
        return error_response(StatusCode::UNAUTHORIZED, &err);
    }

    let payload = match parse_payload(&body, &task_type, &operation_id) {
        Ok(payload) => payload,
        Err(err) => return error_response(StatusCode::BAD_REQUEST, &err),
    };

    let delivery = manager.handle(payload).await;
    (
        StatusCode::OK,
        Json(json!({ "received": true, "matched": delivery.matched })),
    )
        .into_response()
}

/// The path identifies the operation; body fields may omit it.
fn parse_payload(body: &[u8], task_type: &str, operation_id: &str) -> Result<WebhookPayload, WebhookError> {
    let mut value: Value =
        serde_json::from_slice(body).map_err(|err| WebhookError::InvalidPayload(err.to_string()))?;
    let object = value
        .as_object_mut()
        .ok_or_else(|| WebhookError::InvalidPayload("expected a JSON object".into()))?;
    object
        .entry("operation_id")
        .or_insert_with(|| Value::String(operation_id.to_string()));
    object
        .entry("task_type")
        .or_insert_with(|| Value::String(task_type.to_string()));
    object
        .entry("timestamp")
        .or_insert_with(|| Value::String(Utc::now().to_rfc3339()));
    serde_json::from_value(value).map_err(|err| WebhookError::InvalidPayload(err.to_string()))
}
