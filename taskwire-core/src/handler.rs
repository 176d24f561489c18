use std::future::Future;

use async_trait::async_trait;
use serde_json::Value;

use crate::agent::AgentDescriptor;
use crate::conversation::{ConversationMessage, MessageKind, MessageRole};
use crate::error::HandlerError;
use crate::response::InputRequest;

/// What a clarification handler decided to do with an input request.
#[derive(Debug, Clone, PartialEq)]
pub enum HandlerDecision {
    /// Send this value back to the agent as the requested input.
    Answer(Value),
    /// Park the question under `token` for a later resume.
    Defer { token: String },
    /// Stop the execution.
    Abort { reason: String },
}

/// Everything a handler sees when the agent asks for input.
#[derive(Debug, Clone)]
pub struct HandlerContext {
    pub task_id: String,
    pub task_name: String,
    pub agent: AgentDescriptor,
    /// 1-based clarification round.
    pub attempt: u32,
    pub max_attempts: u32,
    pub messages: Vec<ConversationMessage>,
    pub input_request: InputRequest,
}

impl HandlerContext {
    pub fn was_field_discussed(&self, field: &str) -> bool {
        self.answers_for(field).next().is_some()
    }

    /// Most recent answer given for `field` in an earlier round.
    pub fn previous_response(&self, field: &str) -> Option<&Value> {
        self.answers_for(field).last().map(|message| &message.content)
    }

    pub fn is_final_attempt(&self) -> bool {
        self.attempt >= self.max_attempts
    }

    /// One line per message, oldest first.
    pub fn summary(&self) -> String {
        let mut lines = vec![format!(
            "{} on {} (round {}/{})",
            self.task_name, self.agent.name, self.attempt, self.max_attempts
        )];
        for message in &self.messages {
            let role = match message.role {
                MessageRole::User => "user",
                MessageRole::Agent => "agent",
            };
            let kind = match message.metadata.kind {
                MessageKind::Request => "request",
                MessageKind::Response => "response",
                MessageKind::InputResponse => "input",
            };
            lines.push(format!("{role} {kind}: {}", truncate(&message.content.to_string(), 120)));
        }
        lines.push(format!("pending question: {}", self.input_request.question));
        lines.join("\n")
    }

    pub fn defer_to_human(&self, token: impl Into<String>) -> HandlerDecision {
        HandlerDecision::Defer {
            token: token.into(),
        }
    }

    pub fn abort(&self, reason: impl Into<String>) -> HandlerDecision {
        HandlerDecision::Abort {
            reason: reason.into(),
        }
    }

    /// Input responses for `field`, oldest first. Borrows only `self`.
    fn answers_for<'a>(&'a self, field: &str) -> impl Iterator<Item = &'a ConversationMessage> + use<'a> {
        let field = field.to_string();
        self.messages.iter().filter(move |message| {
            message.metadata.kind == MessageKind::InputResponse
                && message.metadata.field.as_deref() == Some(field.as_str())
        })
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let head: String = text.chars().take(max_chars).collect();
    format!("{head}...")
}

/// Caller-supplied logic that answers, defers or aborts an input request.
#[async_trait]
pub trait InputHandler: Send + Sync {
    async fn handle(&self, ctx: HandlerContext) -> Result<HandlerDecision, HandlerError>;
}

/// Adapter turning an async closure into an [`InputHandler`].
pub struct FnHandler<F> {
    f: F,
}

pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F>
where
    F: Fn(HandlerContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<HandlerDecision, HandlerError>> + Send,
{
    FnHandler { f }
}

#[async_trait]
impl<F, Fut> InputHandler for FnHandler<F>
where
    F: Fn(HandlerContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<HandlerDecision, HandlerError>> + Send,
{
    async fn handle(&self, ctx: HandlerContext) -> Result<HandlerDecision, HandlerError> {
        (self.f)(ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::Protocol;
    use crate::conversation::ConversationLedger;
    use serde_json::json;

    fn context(ledger: &ConversationLedger) -> HandlerContext {
        HandlerContext {
            task_id: "task-1".into(),
            task_name: "create_media_buy".into(),
            agent: AgentDescriptor::new("sales", "Sales", "https://sales.example", Protocol::A2a),
            attempt: 2,
            max_attempts: 3,
            messages: ledger.messages().to_vec(),
            input_request: InputRequest {
                question: "Confirm budget?".into(),
                field: Some("budget".into()),
                suggestions: vec![],
                context_id: None,
            },
        }
    }

    #[test]
    fn field_history_helpers() {
        let mut ledger = ConversationLedger::new();
        ledger.push_request("create_media_buy", json!({}));
        ledger.push_input_response("create_media_buy", Some("budget".into()), json!(50000));
        ledger.push_input_response("create_media_buy", Some("budget".into()), json!(75000));
        let ctx = context(&ledger);

        assert!(ctx.was_field_discussed("budget"));
        assert!(!ctx.was_field_discussed("start_date"));
        assert_eq!(ctx.previous_response("budget"), Some(&json!(75000)));
        assert!(!ctx.is_final_attempt());
    }

    #[test]
    fn previous_response_outlives_the_field_name() {
        let mut ledger = ConversationLedger::new();
        ledger.push_input_response("create_media_buy", Some("start_date".into()), json!("2025-01-01"));
        let ctx = context(&ledger);

        let answer = {
            let field = String::from("start_date");
            ctx.previous_response(&field)
        };
        assert_eq!(answer, Some(&json!("2025-01-01")));
        assert_eq!(ctx.previous_response("budget"), None);
    }

    #[test]
    fn summary_lists_messages_and_question() {
        let mut ledger = ConversationLedger::new();
        ledger.push_request("create_media_buy", json!({"brief": "shoes"}));
        let summary = context(&ledger).summary();
        assert!(summary.starts_with("create_media_buy on Sales (round 2/3)"));
        assert!(summary.contains("user request: {\"brief\":\"shoes\"}"));
        assert!(summary.ends_with("pending question: Confirm budget?"));
    }

    #[tokio::test]
    async fn closures_act_as_handlers() {
        let handler = handler_fn(|ctx: HandlerContext| async move {
            Ok(ctx.defer_to_human("T"))
        });
        let decision = handler.handle(context(&ConversationLedger::new())).await.expect("handle");
        assert_eq!(decision, HandlerDecision::Defer { token: "T".into() });
    }
}
