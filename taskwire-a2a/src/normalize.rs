//! Reading A2A JSON-RPC responses into the canonical response shape.
//!
//! The last artifact in `result.artifacts` is authoritative: agents that
//! stream progress emit superseding artifacts, and only the final one holds
//! the answer.

use serde_json::Value;
use taskwire_core::response::{attach_message, string_field};
use taskwire_core::{NormalizeError, NormalizedResponse, StatusScan, TaskStatus};

use crate::types::A2aTaskState;

/// Whether `raw` carries the A2A result/error envelope fingerprint.
pub fn has_fingerprint(raw: &Value) -> bool {
    let result_envelope = raw.get("result").is_some_and(|result| {
        result.is_object()
            && ["artifacts", "status", "error", "kind"]
                .iter()
                .any(|key| result.get(*key).is_some())
    });
    result_envelope || raw.get("error").is_some_and(Value::is_object)
}

/// Extract a completed payload or an error from a terminal A2A response.
pub fn extract(raw: &Value) -> Result<NormalizedResponse, NormalizeError> {
    if let Some(message) = error_envelope(raw) {
        return Ok(NormalizedResponse::failed(TaskStatus::Failed, message));
    }

    let result = result_of(raw);
    for status in [state_of(raw), state_of(result)].into_iter().flatten() {
        match TaskStatus::parse(&status) {
            Some(parsed) if parsed.is_intermediate() => {
                return Err(NormalizeError::IntermediateStatus(status));
            }
            Some(parsed) if parsed.is_failure() => {
                let message = status_text(result).unwrap_or_else(|| format!("Task {status}"));
                return Ok(NormalizedResponse::failed(parsed, message).with_task_id(task_id_of(result)));
            }
            _ => {}
        }
    }

    if let Some(message) = result.get("error").and_then(error_message) {
        return Ok(NormalizedResponse::failed(TaskStatus::Failed, message));
    }

    let (artifact_index, parts) = authoritative_parts(result)?;
    let data = parts
        .iter()
        .find(|part| part_kind(part) == Some("data"))
        .and_then(|part| part.get("data"))
        .ok_or(NormalizeError::NoDataPart { artifact_index })?;

    let mut payload = unwrap_response(data);
    attach_message(&mut payload, joined_text(parts));

    Ok(NormalizedResponse::completed(payload)
        .with_task_id(task_id_of(result))
        .with_context_id(string_field(result, &["contextId", "context_id"])))
}

/// Read status-level facts from an A2A response without touching artifacts.
pub fn scan_status(raw: &Value) -> StatusScan {
    if let Some(message) = error_envelope(raw) {
        return StatusScan {
            status: Some(TaskStatus::Failed.as_str().to_string()),
            error: Some(message),
            ..StatusScan::default()
        };
    }

    let result = result_of(raw);
    let status = state_of(result).or_else(|| state_of(raw)).map(|state| {
        // auth-required surfaces to callers as an input request.
        match serde_json::from_value::<A2aTaskState>(Value::String(state.clone())) {
            Ok(A2aTaskState::AuthRequired) => TaskStatus::InputRequired.as_str().to_string(),
            _ => state,
        }
    });

    let field_source = status_message_data(result).unwrap_or(Value::Null);
    let message = status_text(result)
        .or_else(|| string_field(&field_source, &["question", "message"]));

    StatusScan {
        status,
        task_id: task_id_of(result),
        context_id: string_field(result, &["contextId", "context_id"]),
        webhook_url: string_field(&field_source, &["webhook_url", "webhookUrl"]),
        message,
        field: string_field(&field_source, &["field"]),
        suggestions: field_source
            .get("suggestions")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default(),
        error: result.get("error").and_then(error_message),
    }
}

fn result_of(raw: &Value) -> &Value {
    raw.get("result").filter(|result| result.is_object()).unwrap_or(raw)
}

fn error_envelope(raw: &Value) -> Option<String> {
    raw.get("error")
        .filter(|error| error.is_object())
        .and_then(error_message)
}

fn error_message(error: &Value) -> Option<String> {
    match error {
        Value::String(message) => Some(message.clone()),
        Value::Object(envelope) => Some(
            envelope
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| Value::Object(envelope.clone()).to_string()),
        ),
        _ => None,
    }
}

/// `status` as a bare string, or `status.state` of a task object.
fn state_of(value: &Value) -> Option<String> {
    match value.get("status")? {
        Value::String(state) => Some(state.clone()),
        Value::Object(status) => status.get("state").and_then(Value::as_str).map(str::to_string),
        _ => None,
    }
}

fn task_id_of(result: &Value) -> Option<String> {
    if result.get("kind").and_then(Value::as_str) == Some("task") {
        if let Some(id) = result.get("id").and_then(Value::as_str) {
            return Some(id.to_string());
        }
    }
    string_field(result, &["taskId", "task_id"])
}

fn status_parts(result: &Value) -> Option<&Vec<Value>> {
    result
        .get("status")?
        .get("message")?
        .get("parts")?
        .as_array()
}

fn status_text(result: &Value) -> Option<String> {
    status_parts(result).and_then(|parts| joined_text(parts))
}

fn status_message_data(result: &Value) -> Option<Value> {
    status_parts(result)?
        .iter()
        .find(|part| part_kind(part) == Some("data"))
        .and_then(|part| part.get("data"))
        .cloned()
}

/// Parts of the last artifact, or of the result itself when the agent
/// answered with a bare message.
fn authoritative_parts(result: &Value) -> Result<(usize, &Vec<Value>), NormalizeError> {
    let artifacts = match result.get("artifacts").and_then(Value::as_array) {
        Some(artifacts) => artifacts,
        None if result.get("kind").and_then(Value::as_str) == Some("message") => {
            let parts = result
                .get("parts")
                .and_then(Value::as_array)
                .ok_or(NormalizeError::NoDataPart { artifact_index: 0 })?;
            return Ok((0, parts));
        }
        None => return Err(NormalizeError::MissingArtifacts),
    };

    let artifact_index = artifacts.len().checked_sub(1).ok_or(NormalizeError::EmptyArtifacts)?;
    let parts = artifacts[artifact_index]
        .get("parts")
        .and_then(Value::as_array)
        .ok_or(NormalizeError::NoDataPart { artifact_index })?;
    Ok((artifact_index, parts))
}

fn part_kind(part: &Value) -> Option<&str> {
    part.get("kind")
        .or_else(|| part.get("type"))
        .and_then(Value::as_str)
}

fn joined_text(parts: &[Value]) -> Option<String> {
    let texts: Vec<&str> = parts
        .iter()
        .filter(|part| part_kind(part) == Some("text"))
        .filter_map(|part| part.get("text").and_then(Value::as_str))
        .collect();
    if texts.is_empty() {
        None
    } else {
        Some(texts.join("\n"))
    }
}

/// Framework envelopes wrap tool output as `{ "response": { ... } }`.
fn unwrap_response(data: &Value) -> Value {
    match data.get("response") {
        Some(inner) if inner.is_object() => inner.clone(),
        _ => data.clone(),
    }
}
