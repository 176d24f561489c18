//! Completion of tasks an agent accepted for later processing.
//!
//! A submitted task resolves either through a `tasks/get` poll or through a
//! webhook notification, whichever lands first. Both are interpreted exactly
//! like a live response.

mod router;
mod webhook;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use taskwire_core::transport::poll_params;
use taskwire_core::{
    AgentDescriptor, ConversationLedger, ErrorKind, NormalizedResponse, ResponseBody,
    ResponseShape, SubmittedHandle, TASKS_GET, TaskResult, TaskSnapshot, TaskStatus,
    TaskwireError, ToolTransport, WebhookPayload,
};
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::circuit_breaker::CircuitBreakerRegistry;
use crate::normalizer::ResponseNormalizer;

pub use router::webhook_router;
pub use webhook::{
    SIGNATURE_HEADER, TIMESTAMP_HEADER, WebhookCallback, WebhookDelivery, WebhookError,
    WebhookManager, WebhookRegistration, sign,
};

pub struct AsyncCompletionManager {
    transport: Arc<dyn ToolTransport>,
    normalizer: Arc<ResponseNormalizer>,
    breakers: Arc<CircuitBreakerRegistry>,
    webhooks: Option<Arc<WebhookManager>>,
}

impl AsyncCompletionManager {
    pub fn new(
        transport: Arc<dyn ToolTransport>,
        normalizer: Arc<ResponseNormalizer>,
        breakers: Arc<CircuitBreakerRegistry>,
        webhooks: Option<Arc<WebhookManager>>,
    ) -> Self {
        Self {
            transport,
            normalizer,
            breakers,
            webhooks,
        }
    }

    pub fn webhooks(&self) -> Option<&Arc<WebhookManager>> {
        self.webhooks.as_ref()
    }

    /// Allocate a callback URL before a call that may be answered asynchronously.
    pub async fn prepare_webhook(&self, agent: &AgentDescriptor, task_name: &str) -> Option<WebhookRegistration> {
        match &self.webhooks {
            Some(webhooks) => Some(webhooks.register(&agent.id, task_name).await),
            None => None,
        }
    }

    /// Drop a callback registration that turned out not to be needed.
    pub async fn release(&self, registration: &WebhookRegistration) {
        if let Some(webhooks) = &self.webhooks {
            webhooks.unregister(&registration.operation_id).await;
        }
    }

    /// Build the continuation handle for a `submitted` response.
    pub fn register_submitted(
        &self,
        agent: &AgentDescriptor,
        task_name: &str,
        response: &NormalizedResponse,
        registration: Option<&WebhookRegistration>,
    ) -> SubmittedHandle {
        let task_id = response
            .task_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let operation_id = registration
            .map(|registration| registration.operation_id.clone())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let webhook_url = response
            .webhook_url
            .clone()
            .or_else(|| registration.map(|registration| registration.url.clone()));

        tracing::info!(
            agent_id = %agent.id,
            task_name,
            task_id = %task_id,
            operation_id = %operation_id,
            webhook = webhook_url.is_some(),
            "task submitted for async completion"
        );
        SubmittedHandle {
            task_id,
            operation_id,
            webhook_url,
        }
    }

    pub async fn continuation(
        &self,
        agent: &AgentDescriptor,
        task_name: &str,
        handle: SubmittedHandle,
    ) -> SubmittedContinuation {
        let webhook = match &self.webhooks {
            Some(webhooks) => webhooks.subscribe(&handle.operation_id).await,
            None => None,
        };
        SubmittedContinuation {
            transport: self.transport.clone(),
            normalizer: self.normalizer.clone(),
            breakers: self.breakers.clone(),
            webhooks: self.webhooks.clone(),
            agent: agent.clone(),
            task_name: task_name.to_string(),
            handle,
            registered: webhook.is_some(),
            webhook,
        }
    }
}

/// Follow-up operations on one submitted task.
///
/// Owns the task's webhook registration: it is released once the task is
/// seen to settle, or when the continuation is dropped unless
/// [`detach`](Self::detach) handed it back to the caller's handle.
pub struct SubmittedContinuation {
    transport: Arc<dyn ToolTransport>,
    normalizer: Arc<ResponseNormalizer>,
    breakers: Arc<CircuitBreakerRegistry>,
    webhooks: Option<Arc<WebhookManager>>,
    agent: AgentDescriptor,
    task_name: String,
    handle: SubmittedHandle,
    webhook: Option<watch::Receiver<Option<WebhookPayload>>>,
    /// The webhook registration is still ours to release.
    registered: bool,
}

impl SubmittedContinuation {
    pub fn handle(&self) -> &SubmittedHandle {
        &self.handle
    }

    /// Keep the webhook registration alive past this continuation, so a
    /// later continuation for the same handle still receives notifications.
    pub fn detach(&mut self) {
        self.registered = false;
    }

    /// One `tasks/get` round trip. A settled status releases the webhook registration.
    pub async fn track(&mut self) -> Result<TaskSnapshot, TaskwireError> {
        let raw = self.poll().await?;
        let response =
            self.normalizer
                .interpret_poll(&raw, &self.task_name, ResponseShape::from(self.agent.protocol))?;
        if is_settled(response.status) {
            self.release().await;
        }
        let task = raw
            .get("task")
            .or_else(|| raw.get("result"))
            .unwrap_or(&raw);
        Ok(TaskSnapshot {
            task_id: response.task_id.unwrap_or_else(|| self.handle.task_id.clone()),
            status: response.status,
            task_type: Some(self.task_name.clone()),
            created_at: timestamp(task, &["created_at", "createdAt"]),
            updated_at: timestamp(task, &["updated_at", "updatedAt", "timestamp"]),
        })
    }

    /// Wait until the task leaves `working`/`submitted`, returning the raw
    /// response that settled it alongside its interpretation.
    ///
    /// There is no internal time limit; callers bound the wait with `cancel`
    /// or an outer timeout.
    pub async fn wait_for_response(
        &mut self,
        poll_interval: Duration,
        cancel: &CancellationToken,
    ) -> Result<(Value, NormalizedResponse), TaskwireError> {
        let shape = ResponseShape::from(self.agent.protocol);

        let early = self
            .webhook
            .as_mut()
            .and_then(|receiver| receiver.borrow_and_update().clone());
        if let Some(payload) = early {
            if let Some(settled) = self.settle_webhook(&payload)? {
                self.release().await;
                return Ok(settled);
            }
        }

        let mut ticker = tokio::time::interval(poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(TaskwireError::Cancelled),
                payload = next_webhook(&mut self.webhook) => {
                    if let Some(settled) = self.settle_webhook(&payload)? {
                        self.release().await;
                        return Ok(settled);
                    }
                }
                _ = ticker.tick() => {
                    let raw = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(TaskwireError::Cancelled),
                        raw = self.poll() => raw?,
                    };
                    let response = self.normalizer.interpret_poll(&raw, &self.task_name, shape)?;
                    if is_settled(response.status) {
                        tracing::debug!(task_id = %self.handle.task_id, status = %response.status, "poll settled task");
                        self.release().await;
                        return Ok((raw, response));
                    }
                    tracing::trace!(task_id = %self.handle.task_id, status = %response.status, "task still pending");
                }
            }
        }
    }

    /// Wait for the task to settle and report it as a [`TaskResult`].
    /// Only cancellation is returned as an error.
    pub async fn wait_for_completion(
        mut self,
        poll_interval: Duration,
        cancel: CancellationToken,
    ) -> Result<TaskResult, TaskwireError> {
        let started = Instant::now();
        let mut ledger = ConversationLedger::new();
        let outcome = self.wait_for_response(poll_interval, &cancel).await;

        let mut result = match outcome {
            Err(err) if err.is_cancelled() => return Err(err),
            Err(err) => TaskResult::new(TaskStatus::Failed, &self.agent, &self.task_name, self.handle.task_id.clone())
                .with_error(err.to_string(), err.kind()),
            Ok((raw, response)) => {
                ledger.push_response(&self.task_name, raw);
                let task_id = response.task_id.clone().unwrap_or_else(|| self.handle.task_id.clone());
                settle_result(
                    TaskResult::new(response.status, &self.agent, &self.task_name, task_id),
                    &response,
                )
            }
        };
        result.metadata.response_time_ms = started.elapsed().as_millis() as u64;
        result.conversation = ledger.into_messages();
        Ok(result)
    }

    fn settle_webhook(&self, payload: &WebhookPayload) -> Result<Option<(Value, NormalizedResponse)>, TaskwireError> {
        let raw = payload.to_canonical();
        let response = self
            .normalizer
            .interpret(&raw, &self.task_name, ResponseShape::Canonical)?;
        tracing::debug!(
            task_id = %self.handle.task_id,
            operation_id = %payload.operation_id,
            status = %response.status,
            "webhook notification"
        );
        Ok(is_settled(response.status).then_some((raw, response)))
    }

    async fn poll(&self) -> Result<Value, TaskwireError> {
        let params = poll_params(&self.handle.task_id);
        self.breakers
            .call(&self.agent.id, || async {
                self.transport
                    .send_tool_call(&self.agent, TASKS_GET, params)
                    .await
                    .map_err(TaskwireError::from)
            })
            .await
    }

    async fn release(&mut self) {
        if !std::mem::take(&mut self.registered) {
            return;
        }
        if let Some(webhooks) = &self.webhooks {
            webhooks.unregister(&self.handle.operation_id).await;
        }
    }
}

impl Drop for SubmittedContinuation {
    fn drop(&mut self) {
        if !self.registered {
            return;
        }
        let (Some(webhooks), Ok(runtime)) = (self.webhooks.clone(), tokio::runtime::Handle::try_current()) else {
            return;
        };
        let operation_id = self.handle.operation_id.clone();
        runtime.spawn(async move {
            webhooks.unregister(&operation_id).await;
            tracing::debug!(operation_id = %operation_id, "released webhook of dropped continuation");
        });
    }
}

/// Resolves with the next notification; pends forever without a receiver.
async fn next_webhook(webhook: &mut Option<watch::Receiver<Option<WebhookPayload>>>) -> WebhookPayload {
    loop {
        let Some(receiver) = webhook.as_mut() else {
            return std::future::pending().await;
        };
        if receiver.changed().await.is_err() {
            *webhook = None;
            continue;
        }
        if let Some(payload) = receiver.borrow_and_update().clone() {
            return payload;
        }
    }
}

fn is_settled(status: TaskStatus) -> bool {
    !matches!(status, TaskStatus::Working | TaskStatus::Submitted)
}

fn timestamp(value: &Value, keys: &[&str]) -> Option<DateTime<Utc>> {
    keys.iter()
        .find_map(|key| value.get(*key).and_then(Value::as_str))
        .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
        .map(|parsed| parsed.with_timezone(&Utc))
}

/// Copy a normalized response body onto a result built for its status.
pub(crate) fn settle_result(mut result: TaskResult, response: &NormalizedResponse) -> TaskResult {
    match &response.body {
        ResponseBody::Payload(payload) => result.with_data(payload.clone()),
        ResponseBody::Error(message) => result.with_error(message.clone(), ErrorKind::Agent),
        ResponseBody::InputRequest(request) => {
            result.input_request = Some(request.clone());
            result
        }
        ResponseBody::Pending => result,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedTransport;
    use serde_json::json;
    use taskwire_core::Protocol;
    use taskwire_core::config::{CircuitBreakerConfig, WebhookConfig};

    fn agent() -> AgentDescriptor {
        AgentDescriptor::new("sales", "Sales Agent", "http://agent.invalid/mcp", Protocol::Mcp)
    }

    fn manager(transport: Arc<ScriptedTransport>, webhooks: Option<Arc<WebhookManager>>) -> AsyncCompletionManager {
        AsyncCompletionManager::new(
            transport,
            Arc::new(ResponseNormalizer::default()),
            Arc::new(CircuitBreakerRegistry::new(CircuitBreakerConfig::default())),
            webhooks,
        )
    }

    fn webhooks() -> Arc<WebhookManager> {
        Arc::new(WebhookManager::new(&WebhookConfig {
            url_template: "http://localhost/webhooks/{task_type}/{operation_id}".into(),
            secret: None,
            signature_tolerance: Duration::from_secs(300),
        }))
    }

    async fn released(webhooks: &WebhookManager, operation_id: &str) -> bool {
        for _ in 0..50 {
            if !webhooks.is_registered(operation_id).await {
                return true;
            }
            tokio::task::yield_now().await;
        }
        false
    }

    fn handle(task_id: &str, operation_id: &str) -> SubmittedHandle {
        SubmittedHandle {
            task_id: task_id.into(),
            operation_id: operation_id.into(),
            webhook_url: None,
        }
    }

    #[test]
    fn register_submitted_prefers_agent_identifiers() {
        let transport = Arc::new(ScriptedTransport::new(vec![]));
        let manager = manager(transport, None);
        let response = NormalizedResponse::pending(TaskStatus::Submitted)
            .with_task_id(Some("t-42".into()))
            .with_webhook_url(Some("https://agent-supplied/cb".into()));
        let registration = WebhookRegistration {
            operation_id: "op-1".into(),
            url: "https://ours/cb".into(),
        };

        let handle = manager.register_submitted(&agent(), "create_media_buy", &response, Some(&registration));
        assert_eq!(handle.task_id, "t-42");
        assert_eq!(handle.operation_id, "op-1");
        assert_eq!(handle.webhook_url.as_deref(), Some("https://agent-supplied/cb"));
    }

    #[tokio::test(start_paused = true)]
    async fn polls_until_terminal() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            Ok(json!({"task": {"id": "t-1", "status": "working"}})),
            Ok(json!({"task": {"id": "t-1", "status": "working"}})),
            Ok(json!({"task": {"id": "t-1", "status": "completed", "result": {"media_buy_id": "mb-1"}}})),
        ]));
        let manager = manager(transport.clone(), None);
        let continuation = manager
            .continuation(&agent(), "create_media_buy", handle("t-1", "op-1"))
            .await;

        let result = continuation
            .wait_for_completion(Duration::from_secs(5), CancellationToken::new())
            .await
            .expect("completion");
        assert!(result.success);
        assert_eq!(result.status, TaskStatus::Completed);
        assert_eq!(result.data, Some(json!({"media_buy_id": "mb-1"})));

        let calls = transport.calls();
        assert_eq!(calls.len(), 3);
        assert!(calls.iter().all(|call| call.task_name == TASKS_GET));
        assert_eq!(calls[0].params, json!({"task_id": "t-1"}));
    }

    #[tokio::test(start_paused = true)]
    async fn webhook_beats_polling() {
        let transport = Arc::new(ScriptedTransport::repeating(json!({"task": {"id": "t-1", "status": "working"}})));
        let webhooks = webhooks();
        let manager = manager(transport.clone(), Some(webhooks.clone()));
        let registration = manager.prepare_webhook(&agent(), "create_media_buy").await.expect("webhooks on");
        let continuation = manager
            .continuation(&agent(), "create_media_buy", handle("t-1", &registration.operation_id))
            .await;

        let waiter = tokio::spawn(continuation.wait_for_completion(Duration::from_secs(30), CancellationToken::new()));
        tokio::time::sleep(Duration::from_secs(45)).await;

        webhooks
            .handle(WebhookPayload {
                operation_id: registration.operation_id.clone(),
                task_type: "create_media_buy".into(),
                status: "completed".into(),
                result: Some(json!({"media_buy_id": "mb-7"})),
                error: None,
                context_id: None,
                task_id: Some("t-1".into()),
                timestamp: Utc::now(),
            })
            .await;

        let result = waiter.await.expect("join").expect("completion");
        assert_eq!(result.data, Some(json!({"media_buy_id": "mb-7"})));
        assert_eq!(transport.calls().len(), 2, "polled at t=0 and t=30 only");
        assert!(!webhooks.is_registered(&registration.operation_id).await);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_stops_waiting() {
        let transport = Arc::new(ScriptedTransport::repeating(json!({"task": {"id": "t-1", "status": "working"}})));
        let manager = manager(transport, None);
        let continuation = manager
            .continuation(&agent(), "create_media_buy", handle("t-1", "op-1"))
            .await;
        let cancel = CancellationToken::new();

        let waiter = tokio::spawn(continuation.wait_for_completion(Duration::from_secs(5), cancel.clone()));
        tokio::time::sleep(Duration::from_secs(12)).await;
        cancel.cancel();

        let err = waiter.await.expect("join").unwrap_err();
        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn track_reports_snapshot() {
        let transport = Arc::new(ScriptedTransport::new(vec![Ok(json!({
            "task": {
                "id": "t-1",
                "status": "working",
                "created_at": "2025-01-02T03:04:05Z"
            }
        }))]));
        let manager = manager(transport, None);
        let mut continuation = manager
            .continuation(&agent(), "create_media_buy", handle("t-1", "op-1"))
            .await;

        let snapshot = continuation.track().await.expect("track");
        assert_eq!(snapshot.task_id, "t-1");
        assert_eq!(snapshot.status, TaskStatus::Working);
        assert_eq!(snapshot.task_type.as_deref(), Some("create_media_buy"));
        assert!(snapshot.created_at.is_some());
        assert!(snapshot.updated_at.is_none());
    }

    #[tokio::test]
    async fn track_releases_registration_once_settled() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            Ok(json!({"task": {"id": "t-1", "status": "working"}})),
            Ok(json!({"task": {"id": "t-1", "status": "completed", "result": {}}})),
        ]));
        let webhooks = webhooks();
        let manager = manager(transport, Some(webhooks.clone()));
        let registration = manager.prepare_webhook(&agent(), "create_media_buy").await.expect("webhooks on");
        let mut continuation = manager
            .continuation(&agent(), "create_media_buy", handle("t-1", &registration.operation_id))
            .await;

        let first = continuation.track().await.expect("track");
        assert_eq!(first.status, TaskStatus::Working);
        assert!(webhooks.is_registered(&registration.operation_id).await);

        let second = continuation.track().await.expect("track");
        assert_eq!(second.status, TaskStatus::Completed);
        assert!(!webhooks.is_registered(&registration.operation_id).await);
    }

    #[tokio::test]
    async fn dropped_continuation_releases_registration() {
        let transport = Arc::new(ScriptedTransport::new(vec![]));
        let webhooks = webhooks();
        let manager = manager(transport, Some(webhooks.clone()));
        let registration = manager.prepare_webhook(&agent(), "create_media_buy").await.expect("webhooks on");
        let continuation = manager
            .continuation(&agent(), "create_media_buy", handle("t-1", &registration.operation_id))
            .await;

        drop(continuation);
        assert!(released(&webhooks, &registration.operation_id).await);
    }

    #[tokio::test]
    async fn detached_continuation_keeps_registration() {
        let transport = Arc::new(ScriptedTransport::new(vec![]));
        let webhooks = webhooks();
        let manager = manager(transport, Some(webhooks.clone()));
        let registration = manager.prepare_webhook(&agent(), "create_media_buy").await.expect("webhooks on");
        let mut continuation = manager
            .continuation(&agent(), "create_media_buy", handle("t-1", &registration.operation_id))
            .await;

        continuation.detach();
        drop(continuation);
        assert!(!released(&webhooks, &registration.operation_id).await);
    }
}
