//! Built-in clarification handlers.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;
use taskwire_core::{HandlerContext, HandlerDecision, HandlerError, InputHandler};

/// Answers with the first suggestion the agent offered, or `true`.
#[derive(Debug, Clone, Copy, Default)]
pub struct AutoApproveHandler;

#[async_trait]
impl InputHandler for AutoApproveHandler {
    async fn handle(&self, ctx: HandlerContext) -> Result<HandlerDecision, HandlerError> {
        let answer = ctx
            .input_request
            .suggestions
            .first()
            .map(|suggestion| Value::String(suggestion.clone()))
            .unwrap_or(Value::Bool(true));
        Ok(HandlerDecision::Answer(answer))
    }
}

/// Parks every question for a human under a fresh token.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeferAllHandler;

#[async_trait]
impl InputHandler for DeferAllHandler {
    async fn handle(&self, ctx: HandlerContext) -> Result<HandlerDecision, HandlerError> {
        Ok(ctx.defer_to_human(uuid::Uuid::new_v4().to_string()))
    }
}

/// What a [`FieldHandler`] does with a field it has no value for.
#[derive(Debug, Clone, Default)]
pub enum FieldFallback {
    #[default]
    Defer,
    Abort,
    Answer(Value),
}

/// Answers from a fixed field → value table.
///
/// Once the attempt budget is spent the handler aborts instead of answering
/// the same question again.
#[derive(Debug, Clone, Default)]
pub struct FieldHandler {
    values: HashMap<String, Value>,
    fallback: FieldFallback,
}

impl FieldHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_value(mut self, field: impl Into<String>, value: Value) -> Self {
        self.values.insert(field.into(), value);
        self
    }

    pub fn with_fallback(mut self, fallback: FieldFallback) -> Self {
        self.fallback = fallback;
        self
    }
}

#[async_trait]
impl InputHandler for FieldHandler {
    async fn handle(&self, ctx: HandlerContext) -> Result<HandlerDecision, HandlerError> {
        let field = ctx.input_request.field.as_deref();
        if let Some(value) = field.and_then(|field| self.values.get(field)) {
            let repeated = field.is_some_and(|field| ctx.previous_response(field) == Some(value));
            if repeated && ctx.attempt > ctx.max_attempts {
                return Ok(ctx.abort(format!(
                    "agent keeps asking for '{}' after {} rounds",
                    field.unwrap_or_default(),
                    ctx.max_attempts
                )));
            }
            return Ok(HandlerDecision::Answer(value.clone()));
        }

        Ok(match &self.fallback {
            FieldFallback::Defer => ctx.defer_to_human(uuid::Uuid::new_v4().to_string()),
            FieldFallback::Abort => ctx.abort(format!(
                "no answer configured for: {}",
                ctx.input_request.question
            )),
            FieldFallback::Answer(value) => HandlerDecision::Answer(value.clone()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use taskwire_core::{AgentDescriptor, ConversationLedger, InputRequest, Protocol};

    fn ctx(field: Option<&str>, suggestions: &[&str], attempt: u32, ledger: &ConversationLedger) -> HandlerContext {
        HandlerContext {
            task_id: "t-1".into(),
            task_name: "create_media_buy".into(),
            agent: AgentDescriptor::new("sales", "Sales", "http://s.invalid", Protocol::Mcp),
            attempt,
            max_attempts: 3,
            messages: ledger.messages().to_vec(),
            input_request: InputRequest {
                question: "Need more".into(),
                field: field.map(str::to_string),
                suggestions: suggestions.iter().map(|s| s.to_string()).collect(),
                context_id: None,
            },
        }
    }

    #[tokio::test]
    async fn auto_approve_picks_first_suggestion() {
        let ledger = ConversationLedger::new();
        let decision = AutoApproveHandler
            .handle(ctx(None, &["yes", "no"], 1, &ledger))
            .await
            .expect("decision");
        assert_eq!(decision, HandlerDecision::Answer(json!("yes")));

        let decision = AutoApproveHandler.handle(ctx(None, &[], 1, &ledger)).await.expect("decision");
        assert_eq!(decision, HandlerDecision::Answer(json!(true)));
    }

    #[tokio::test]
    async fn defer_all_issues_fresh_tokens() {
        let ledger = ConversationLedger::new();
        let first = DeferAllHandler.handle(ctx(None, &[], 1, &ledger)).await.expect("decision");
        let second = DeferAllHandler.handle(ctx(None, &[], 1, &ledger)).await.expect("decision");
        assert!(matches!(first, HandlerDecision::Defer { .. }));
        assert_ne!(first, second);
    }

    #[tokio::test]
    async fn field_handler_answers_known_fields_and_falls_back() {
        let handler = FieldHandler::new()
            .with_value("budget", json!(75000))
            .with_fallback(FieldFallback::Abort);
        let ledger = ConversationLedger::new();

        let known = handler.handle(ctx(Some("budget"), &[], 1, &ledger)).await.expect("decision");
        assert_eq!(known, HandlerDecision::Answer(json!(75000)));

        let unknown = handler.handle(ctx(Some("start_date"), &[], 1, &ledger)).await.expect("decision");
        assert!(matches!(unknown, HandlerDecision::Abort { .. }));
    }

    #[tokio::test]
    async fn field_handler_stops_repeating_past_budget() {
        let handler = FieldHandler::new().with_value("budget", json!(75000));
        let mut ledger = ConversationLedger::new();
        ledger.push_input_response("create_media_buy", Some("budget".into()), json!(75000));

        let decision = handler.handle(ctx(Some("budget"), &[], 4, &ledger)).await.expect("decision");
        assert!(matches!(decision, HandlerDecision::Abort { .. }));
    }
}
