//! Reading MCP `tools/call` results into the canonical response shape.

use serde_json::Value;
use taskwire_core::response::{attach_message, string_field};
use taskwire_core::{NormalizeError, NormalizedResponse, StatusScan, TaskStatus};

use crate::protocol::ToolCallResult;

const PREVIEW_CHARS: usize = 100;

/// Whether `raw` carries the MCP structured-payload fingerprint.
pub fn has_fingerprint(raw: &Value) -> bool {
    raw.get("structuredContent").is_some() || raw.get("content").is_some_and(Value::is_array)
}

/// Extract a completed payload or an error from a terminal MCP result.
pub fn extract(raw: &Value) -> Result<NormalizedResponse, NormalizeError> {
    let result = parse_result(raw)?;

    if result.is_error {
        let message = result
            .joined_text()
            .unwrap_or_else(|| "Unknown error".to_string());
        return Ok(NormalizedResponse::failed(TaskStatus::Failed, message));
    }

    if let Some(structured) = result.structured_content.as_ref().filter(|v| !v.is_null()) {
        let mut payload = structured.clone();
        attach_message(&mut payload, result.joined_text());
        return Ok(NormalizedResponse::completed(payload));
    }

    let first = result.content.first().ok_or(NormalizeError::EmptyContent)?;
    let text = first.text.as_deref().ok_or_else(|| {
        NormalizeError::UnrecognizedShape(format!(
            "MCP content[0] has type '{}' and no text",
            first.content_type
        ))
    })?;
    let payload = serde_json::from_str::<Value>(text).map_err(|_| NormalizeError::InvalidJsonText {
        preview: preview(text),
    })?;
    Ok(NormalizedResponse::completed(payload))
}

/// Read status-level facts from an MCP result without extracting the payload.
///
/// The status lives inside the structured payload (or the JSON text fallback),
/// next to the task, context and webhook identifiers.
pub fn scan_status(raw: &Value) -> StatusScan {
    let Ok(result) = parse_result(raw) else {
        return StatusScan::default();
    };

    if result.is_error {
        return StatusScan {
            status: Some(TaskStatus::Failed.as_str().to_string()),
            error: Some(
                result
                    .joined_text()
                    .unwrap_or_else(|| "Unknown error".to_string()),
            ),
            ..StatusScan::default()
        };
    }

    let body = match result.structured_content.filter(|v| v.is_object()) {
        Some(structured) => structured,
        None => result
            .content
            .first()
            .and_then(|part| part.text.as_deref())
            .and_then(|text| serde_json::from_str::<Value>(text).ok())
            .filter(Value::is_object)
            .or_else(|| raw.get("status").map(|_| raw.clone()))
            .unwrap_or(Value::Null),
    };
    scan_object(&body)
}

/// Status fields shared by MCP payloads and canonical responses.
pub fn scan_object(body: &Value) -> StatusScan {
    StatusScan {
        status: string_field(body, &["status"]),
        task_id: string_field(body, &["task_id", "taskId"]),
        context_id: string_field(body, &["context_id", "contextId"]),
        webhook_url: string_field(body, &["webhook_url", "webhookUrl"]),
        message: string_field(body, &["question", "message"]),
        field: string_field(body, &["field"]),
        suggestions: body
            .get("suggestions")
            .or_else(|| body.get("options"))
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default(),
        error: match body.get("error") {
            Some(Value::String(message)) => Some(message.clone()),
            Some(Value::Object(envelope)) => envelope
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string),
            _ => None,
        },
    }
}

fn parse_result(raw: &Value) -> Result<ToolCallResult, NormalizeError> {
    serde_json::from_value::<ToolCallResult>(raw.clone())
        .map_err(|err| NormalizeError::UnrecognizedShape(format!("malformed MCP result: {err}")))
}

fn preview(text: &str) -> String {
    if text.chars().count() <= PREVIEW_CHARS {
        return text.to_string();
    }
    let head: String = text.chars().take(PREVIEW_CHARS).collect();
    format!("{head}...")
}
