//! Protocol-independent response normalization.
//!
//! `normalize` turns a terminal response into a payload or an error and
//! validates payloads against output contracts. `interpret` reads the live
//! status first so the executor can branch on intermediate states before any
//! payload extraction happens.

use serde_json::{Map, Value, json};
use taskwire_core::response::string_field;
use taskwire_core::{
    InputRequest, NormalizeError, NormalizedResponse, ResponseShape, StatusScan, TaskStatus,
    TaskwireError,
};

use crate::contracts::OutputContracts;

#[derive(Debug, Default)]
pub struct ResponseNormalizer {
    contracts: OutputContracts,
}

impl ResponseNormalizer {
    pub fn new(contracts: OutputContracts) -> Self {
        Self { contracts }
    }

    pub fn contracts(&self) -> &OutputContracts {
        &self.contracts
    }

    /// Normalize a terminal response into the canonical shape.
    ///
    /// Without a hint the shape is sniffed; an MCP fingerprint wins over an
    /// A2A one when both are present.
    pub fn normalize(
        &self,
        raw: &Value,
        tool_name: &str,
        hint: Option<ResponseShape>,
    ) -> Result<NormalizedResponse, NormalizeError> {
        let shape = match hint {
            Some(shape) => shape,
            None => detect_shape(raw)?,
        };
        let response = match shape {
            ResponseShape::Mcp => taskwire_mcp::normalize::extract(raw)?,
            ResponseShape::A2a => taskwire_a2a::normalize::extract(raw)?,
            ResponseShape::Canonical => extract_canonical(raw)?,
        };
        if response.status == TaskStatus::Completed {
            if let Some(payload) = response.payload() {
                self.contracts.validate(tool_name, payload)?;
            }
        }
        Ok(response)
    }

    /// Read the live status of `raw` and produce the response the task state
    /// machine acts on. Only completed (or status-less) responses go through
    /// payload extraction and contract validation.
    pub fn interpret(
        &self,
        raw: &Value,
        tool_name: &str,
        shape: ResponseShape,
    ) -> Result<NormalizedResponse, TaskwireError> {
        let scan = scan_raw(raw, shape);
        let status = scan.status.clone();
        let with_ids = |response: NormalizedResponse| {
            response
                .with_task_id(scan.task_id.clone())
                .with_context_id(scan.context_id.clone())
                .with_webhook_url(scan.webhook_url.clone())
        };

        let Some(raw_status) = status else {
            return Ok(with_ids(self.normalize(raw, tool_name, Some(shape))?));
        };

        let response = match TaskStatus::parse(&raw_status) {
            Some(TaskStatus::Completed) => self.normalize(raw, tool_name, Some(shape))?,
            Some(status @ (TaskStatus::Working | TaskStatus::Submitted | TaskStatus::Deferred)) => {
                NormalizedResponse::pending(status)
            }
            Some(TaskStatus::InputRequired) => NormalizedResponse::input_required(scan.input_request()),
            Some(status) => {
                let message = scan
                    .error
                    .clone()
                    .or_else(|| scan.message.clone())
                    .unwrap_or_else(|| format!("Task {raw_status}"));
                NormalizedResponse::failed(status, message)
            }
            None => match self.normalize(raw, tool_name, Some(shape)) {
                Ok(response) => {
                    tracing::debug!(status = %raw_status, tool_name, "unknown status with payload, treating as completed");
                    response
                }
                Err(_) => return Err(TaskwireError::UnknownStatus(raw_status)),
            },
        };
        Ok(with_ids(response))
    }

    /// Interpret a `tasks/get` poll result. A `{task: {status, result?}}`
    /// body is read as a canonical response; anything else goes through
    /// `interpret` with the agent's shape.
    pub fn interpret_poll(
        &self,
        raw: &Value,
        tool_name: &str,
        shape: ResponseShape,
    ) -> Result<NormalizedResponse, TaskwireError> {
        match poll_task(raw) {
            Some(task) => self.interpret(&task_to_canonical(task), tool_name, ResponseShape::Canonical),
            None => self.interpret(raw, tool_name, shape),
        }
    }
}

/// Sniff the wire shape of a hint-less response.
pub fn detect_shape(raw: &Value) -> Result<ResponseShape, NormalizeError> {
    if taskwire_mcp::normalize::has_fingerprint(raw) {
        Ok(ResponseShape::Mcp)
    } else if taskwire_a2a::normalize::has_fingerprint(raw) {
        Ok(ResponseShape::A2a)
    } else if is_canonical(raw) {
        Ok(ResponseShape::Canonical)
    } else {
        Err(NormalizeError::UnrecognizedShape(preview(raw)))
    }
}

fn is_canonical(raw: &Value) -> bool {
    raw.get("data").is_some()
        || (raw.get("status").is_some_and(Value::is_string)
            && raw.get("error").is_some_and(Value::is_string))
}

fn extract_canonical(raw: &Value) -> Result<NormalizedResponse, NormalizeError> {
    let status = match string_field(raw, &["status"]) {
        Some(status) => TaskStatus::parse(&status)
            .ok_or_else(|| NormalizeError::UnrecognizedShape(format!("unknown status '{status}'")))?,
        None => TaskStatus::Completed,
    };
    if status.is_intermediate() {
        return Err(NormalizeError::IntermediateStatus(status.as_str().to_string()));
    }

    let response = match (raw.get("error").and_then(Value::as_str), raw.get("data")) {
        (Some(message), _) => {
            let status = if status.is_failure() { status } else { TaskStatus::Failed };
            NormalizedResponse::failed(status, message)
        }
        (None, _) if status.is_failure() => NormalizedResponse::failed(status, format!("Task {status}")),
        (None, Some(data)) => NormalizedResponse::completed(data.clone()),
        (None, None) => return Err(NormalizeError::UnrecognizedShape(preview(raw))),
    };
    Ok(response
        .with_task_id(string_field(raw, &["task_id"]))
        .with_context_id(string_field(raw, &["context_id"]))
        .with_webhook_url(string_field(raw, &["webhook_url"])))
}

fn scan_raw(raw: &Value, shape: ResponseShape) -> StatusScan {
    match shape {
        ResponseShape::Mcp => taskwire_mcp::normalize::scan_status(raw),
        ResponseShape::A2a => taskwire_a2a::normalize::scan_status(raw),
        ResponseShape::Canonical => {
            let mut scan = taskwire_mcp::normalize::scan_object(raw);
            if let Some(request) = raw
                .get("input_request")
                .and_then(|value| serde_json::from_value::<InputRequest>(value.clone()).ok())
            {
                scan.message = Some(request.question);
                scan.field = request.field.or(scan.field);
                scan.suggestions = request.suggestions;
                scan.context_id = request.context_id.or(scan.context_id);
            }
            scan
        }
    }
}

fn poll_task(raw: &Value) -> Option<&Value> {
    raw.get("task")
        .or_else(|| raw.get("structuredContent").and_then(|sc| sc.get("task")))
        .filter(|task| task.is_object())
}

fn task_to_canonical(task: &Value) -> Value {
    let mut out = Map::new();
    let status = task
        .get("status")
        .map(|status| match status {
            Value::Object(_) => status.get("state").cloned().unwrap_or(Value::Null),
            other => other.clone(),
        })
        .unwrap_or_else(|| json!(TaskStatus::Working.as_str()));
    out.insert("status".into(), status);
    if let Some(result) = task.get("result").filter(|result| !result.is_null()) {
        out.insert("data".into(), result.clone());
    }
    match task.get("error") {
        Some(Value::String(message)) => {
            out.insert("error".into(), Value::String(message.clone()));
        }
        Some(Value::Object(envelope)) => {
            if let Some(message) = envelope.get("message") {
                out.insert("error".into(), message.clone());
            }
        }
        _ => {}
    }
    for (key, aliases) in [
        ("task_id", ["task_id", "id"]),
        ("context_id", ["context_id", "contextId"]),
    ] {
        if let Some(value) = string_field(task, &aliases) {
            out.insert(key.into(), Value::String(value));
        }
    }
    for key in ["question", "field", "suggestions", "input_request"] {
        if let Some(value) = task.get(key) {
            out.insert(key.into(), value.clone());
        }
    }
    Value::Object(out)
}

fn preview(raw: &Value) -> String {
    let text = raw.to_string();
    if text.chars().count() <= 100 {
        return text;
    }
    let head: String = text.chars().take(100).collect();
    format!("{head}...")
}
