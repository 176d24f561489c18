use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Value, json};
use taskwire_a2a::PUSH_NOTIFICATION_KEY;
use taskwire_core::config::ExecutorConfig;
use taskwire_core::transport::continuation_params;
use taskwire_core::{
    AgentDescriptor, AgentId, CONTINUE_TASK, ConversationLedger, DeferredHandle, DeferredState,
    DeferredTaskStore, ErrorKind, HandlerContext, HandlerDecision, InputHandler, InputRequest,
    MessageKind, NormalizedResponse, ResponseShape, SubmittedHandle, TaskResult, TaskStatus,
    TaskwireError, ToolTransport,
};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::async_completion::{
    AsyncCompletionManager, SubmittedContinuation, WebhookRegistration, settle_result,
};
use crate::circuit_breaker::CircuitBreakerRegistry;
use crate::normalizer::ResponseNormalizer;

/// Per-call overrides for [`TaskExecutor::execute_task_with`].
#[derive(Debug, Clone, Default)]
pub struct ExecuteOptions {
    /// Honored at transport calls and while waiting on a working task.
    pub cancel: Option<CancellationToken>,
    /// Upper bound on the whole execution, clarification rounds included.
    pub deadline: Option<Duration>,
    /// Overrides `executor.throw_on_input_required`.
    pub throw_on_input_required: Option<bool>,
}

/// Live view of one in-flight execution.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActiveTaskInfo {
    pub execution_id: String,
    pub task_id: Option<String>,
    pub agent_id: AgentId,
    pub task_name: String,
    pub status: Option<TaskStatus>,
    pub clarification_rounds: u32,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Default)]
struct ActiveTasks {
    inner: Arc<Mutex<HashMap<String, ActiveTaskInfo>>>,
}

impl ActiveTasks {
    fn track(&self, info: ActiveTaskInfo) -> ActiveTaskGuard {
        let execution_id = info.execution_id.clone();
        self.lock().insert(execution_id.clone(), info);
        ActiveTaskGuard {
            tasks: self.clone(),
            execution_id,
        }
    }

    fn update(&self, execution_id: &str, f: impl FnOnce(&mut ActiveTaskInfo)) {
        if let Some(info) = self.lock().get_mut(execution_id) {
            f(info);
            info.updated_at = Utc::now();
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, ActiveTaskInfo>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Removes the execution from the active registry however it ends.
struct ActiveTaskGuard {
    tasks: ActiveTasks,
    execution_id: String,
}

impl Drop for ActiveTaskGuard {
    fn drop(&mut self) {
        self.tasks.lock().remove(&self.execution_id);
    }
}

/// State carried across the transitions of one execution.
struct Execution {
    execution_id: String,
    agent: AgentDescriptor,
    task_name: String,
    params: Value,
    task_id: Option<String>,
    context_id: Option<String>,
    ledger: ConversationLedger,
    rounds: u32,
    started: Instant,
    cancel: CancellationToken,
    throw_on_input_required: bool,
    registration: Option<WebhookRegistration>,
    _guard: ActiveTaskGuard,
}

impl Execution {
    fn task_id(&self) -> String {
        self.task_id
            .clone()
            .unwrap_or_else(|| self.execution_id.clone())
    }

    fn result(&self, status: TaskStatus) -> TaskResult {
        let mut result = TaskResult::new(status, &self.agent, &self.task_name, self.task_id());
        result.metadata.clarification_rounds = self.rounds;
        result.metadata.response_time_ms = self.started.elapsed().as_millis() as u64;
        result.conversation = self.ledger.messages().to_vec();
        result
    }
}

/// Drives task calls against remote agents through the task state machine.
pub struct TaskExecutor {
    pub(crate) transport: Arc<dyn ToolTransport>,
    pub(crate) normalizer: Arc<ResponseNormalizer>,
    pub(crate) breakers: Arc<CircuitBreakerRegistry>,
    pub(crate) store: Arc<dyn DeferredTaskStore>,
    pub(crate) completions: AsyncCompletionManager,
    pub(crate) config: ExecutorConfig,
    agents: HashMap<AgentId, AgentDescriptor>,
    active: ActiveTasks,
}

impl TaskExecutor {
    pub(crate) fn from_parts(
        transport: Arc<dyn ToolTransport>,
        normalizer: Arc<ResponseNormalizer>,
        breakers: Arc<CircuitBreakerRegistry>,
        store: Arc<dyn DeferredTaskStore>,
        completions: AsyncCompletionManager,
        agents: HashMap<AgentId, AgentDescriptor>,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            transport,
            normalizer,
            breakers,
            store,
            completions,
            config,
            agents,
            active: ActiveTasks::default(),
        }
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    pub fn breakers(&self) -> &Arc<CircuitBreakerRegistry> {
        &self.breakers
    }

    pub fn normalizer(&self) -> &ResponseNormalizer {
        &self.normalizer
    }

    pub fn completions(&self) -> &AsyncCompletionManager {
        &self.completions
    }

    /// The registered descriptor for `agent_id`, if the executor was built with one.
    pub fn agent(&self, agent_id: &str) -> Option<&AgentDescriptor> {
        self.agents.get(agent_id)
    }

    pub fn active_tasks(&self) -> Vec<ActiveTaskInfo> {
        let mut tasks: Vec<ActiveTaskInfo> = self.active.lock().values().cloned().collect();
        tasks.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        tasks
    }

    pub fn task_info(&self, execution_id: &str) -> Option<ActiveTaskInfo> {
        self.active.lock().get(execution_id).cloned()
    }

    /// Follow up on a task that came back `submitted`.
    pub async fn continuation(
        &self,
        agent: &AgentDescriptor,
        task_name: &str,
        handle: SubmittedHandle,
    ) -> SubmittedContinuation {
        self.completions.continuation(agent, task_name, handle).await
    }

    pub async fn execute_task(
        &self,
        agent: &AgentDescriptor,
        task_name: &str,
        params: Value,
        handler: Option<&dyn InputHandler>,
    ) -> Result<TaskResult, TaskwireError> {
        self.execute_task_with(agent, task_name, params, handler, ExecuteOptions::default())
            .await
    }

    /// Call `task_name` on `agent` and drive the response to a result.
    ///
    /// Agent, transport and normalization failures come back as a failed
    /// [`TaskResult`]. Only cancellation, the caller's deadline and
    /// throw-on-pause are returned as errors.
    #[instrument(skip(self, agent, params, handler, options), fields(agent_id = %agent.id, task_name = %task_name))]
    pub async fn execute_task_with(
        &self,
        agent: &AgentDescriptor,
        task_name: &str,
        params: Value,
        handler: Option<&dyn InputHandler>,
        options: ExecuteOptions,
    ) -> Result<TaskResult, TaskwireError> {
        let mut exec = self.begin(agent, task_name, params, &options, ConversationLedger::new());
        let outcome = bounded(options.deadline, self.run(&mut exec, handler)).await;
        self.release_unused_webhook(&mut exec, &outcome).await;
        outcome
    }

    pub async fn resume(
        &self,
        token: &str,
        value: Value,
        handler: Option<&dyn InputHandler>,
    ) -> Result<TaskResult, TaskwireError> {
        self.resume_with(token, value, handler, ExecuteOptions::default())
            .await
    }

    /// Answer a deferred clarification and carry the task on from there.
    ///
    /// The token is deleted once the agent has accepted the answer; a failed
    /// or cancelled continuation call leaves it in place for another attempt.
    /// Credentials come from the registered agent of the same id, since
    /// deferred state is stored without them.
    #[instrument(skip(self, value, handler, options))]
    pub async fn resume_with(
        &self,
        token: &str,
        value: Value,
        handler: Option<&dyn InputHandler>,
        options: ExecuteOptions,
    ) -> Result<TaskResult, TaskwireError> {
        let state = self
            .store
            .get(token)
            .await?
            .ok_or_else(|| TaskwireError::UnknownDeferredToken(token.to_string()))?;
        let agent = match self.agents.get(&state.agent.id) {
            Some(registered) => registered.clone(),
            None => state.agent.clone(),
        };

        let ledger = ConversationLedger::from_messages(state.conversation.clone());
        let mut exec = self.begin(&agent, &state.task_name, state.params.clone(), &options, ledger);
        bounded(
            options.deadline,
            self.continue_deferred(&mut exec, token, state, value, handler),
        )
        .await
    }

    async fn continue_deferred(
        &self,
        exec: &mut Execution,
        token: &str,
        state: DeferredState,
        value: Value,
        handler: Option<&dyn InputHandler>,
    ) -> Result<TaskResult, TaskwireError> {
        exec.context_id = state.context_id.clone();
        exec.rounds = exec
            .ledger
            .messages()
            .iter()
            .filter(|message| message.metadata.kind == MessageKind::InputResponse)
            .count() as u32
            + 1;
        info!(agent_id = %state.agent.id, task_name = %state.task_name, "resuming deferred task");

        exec.ledger
            .push_input_response(&state.task_name, state.field.clone(), value.clone());
        let raw = match self
            .call_agent(
                exec,
                CONTINUE_TASK,
                continuation_params(state.context_id.as_deref(), value),
            )
            .await
        {
            Ok(raw) => raw,
            Err(err) => return fail(exec, err),
        };
        if let Err(err) = self.store.delete(token).await {
            warn!(token, error = %err, "failed to delete deferred state");
        }

        exec.ledger.push_response(&state.task_name, raw.clone());
        let response = match self.interpret(exec, &raw) {
            Ok(response) => response,
            Err(err) => return fail(exec, err),
        };
        self.drive(exec, response, handler).await
    }

    fn begin(
        &self,
        agent: &AgentDescriptor,
        task_name: &str,
        params: Value,
        options: &ExecuteOptions,
        ledger: ConversationLedger,
    ) -> Execution {
        let execution_id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now();
        let guard = self.active.track(ActiveTaskInfo {
            execution_id: execution_id.clone(),
            task_id: None,
            agent_id: agent.id.clone(),
            task_name: task_name.to_string(),
            status: None,
            clarification_rounds: 0,
            started_at: now,
            updated_at: now,
        });
        Execution {
            execution_id,
            agent: agent.clone(),
            task_name: task_name.to_string(),
            params,
            task_id: None,
            context_id: None,
            ledger,
            rounds: 0,
            started: Instant::now(),
            cancel: options.cancel.clone().unwrap_or_default(),
            throw_on_input_required: options
                .throw_on_input_required
                .unwrap_or(self.config.throw_on_input_required),
            registration: None,
            _guard: guard,
        }
    }

    async fn run(
        &self,
        exec: &mut Execution,
        handler: Option<&dyn InputHandler>,
    ) -> Result<TaskResult, TaskwireError> {
        let mut params = exec.params.clone();
        if let Some(registration) = self
            .completions
            .prepare_webhook(&exec.agent, &exec.task_name)
            .await
        {
            match &mut params {
                Value::Object(map) => {
                    map.insert(
                        PUSH_NOTIFICATION_KEY.to_string(),
                        json!({ "url": registration.url }),
                    );
                    exec.registration = Some(registration);
                }
                _ => self.completions.release(&registration).await,
            }
        }

        exec.ledger.push_request(&exec.task_name, params.clone());
        let raw = match self.call_agent(exec, &exec.task_name, params).await {
            Ok(raw) => raw,
            Err(err) => return fail(exec, err),
        };
        exec.ledger.push_response(&exec.task_name, raw.clone());

        let response = match self.interpret(exec, &raw) {
            Ok(response) => response,
            Err(err) => return fail(exec, err),
        };
        self.drive(exec, response, handler).await
    }

    /// The task state machine. Loops only through clarification rounds and
    /// a settled wait on a working task.
    async fn drive(
        &self,
        exec: &mut Execution,
        mut response: NormalizedResponse,
        handler: Option<&dyn InputHandler>,
    ) -> Result<TaskResult, TaskwireError> {
        loop {
            if response.task_id.is_some() {
                exec.task_id = response.task_id.clone();
            }
            if response.context_id.is_some() {
                exec.context_id = response.context_id.clone();
            }
            let status = response.status;
            self.active.update(&exec.execution_id, |info| {
                info.status = Some(status);
                info.task_id = exec.task_id.clone();
                info.clarification_rounds = exec.rounds;
            });
            debug!(status = %status, task_id = ?exec.task_id, "task transition");

            match status {
                TaskStatus::Completed => {
                    info!(status = %status, rounds = exec.rounds, "task completed");
                    return Ok(settle_result(exec.result(status), &response));
                }
                TaskStatus::Working => {
                    if response.task_id.is_none() {
                        return Ok(exec.result(status));
                    }
                    if !self.config.wait_on_working {
                        return Ok(self.pending_result(exec, &response));
                    }
                    match self.wait_on_working(exec).await {
                        Ok(Some(next)) => response = next,
                        Ok(None) => return Ok(self.pending_result(exec, &response)),
                        Err(err) => return fail(exec, err),
                    }
                }
                TaskStatus::Submitted => return Ok(self.pending_result(exec, &response)),
                TaskStatus::InputRequired => {
                    let request = response.input_request().cloned().unwrap_or_else(|| InputRequest {
                        question: "Additional input required".to_string(),
                        field: None,
                        suggestions: Vec::new(),
                        context_id: exec.context_id.clone(),
                    });

                    let Some(handler) = handler else {
                        if exec.throw_on_input_required {
                            return Err(TaskwireError::InputRequired {
                                question: request.question,
                            });
                        }
                        info!(question = %request.question, "task paused for input");
                        let mut result = exec.result(status);
                        result.input_request = Some(request);
                        return Ok(result);
                    };

                    exec.rounds += 1;
                    let ctx = HandlerContext {
                        task_id: exec.task_id(),
                        task_name: exec.task_name.clone(),
                        agent: exec.agent.clone(),
                        attempt: exec.rounds,
                        max_attempts: self.config.max_clarifications,
                        messages: exec.ledger.messages().to_vec(),
                        input_request: request.clone(),
                    };
                    let decision = match handler.handle(ctx).await {
                        Ok(decision) => decision,
                        Err(err) => return fail(exec, TaskwireError::Handler(err)),
                    };

                    match decision {
                        HandlerDecision::Answer(input) => {
                            debug!(round = exec.rounds, field = ?request.field, "answering input request");
                            exec.ledger.push_input_response(
                                &exec.task_name,
                                request.field.clone(),
                                input.clone(),
                            );
                            let context_id = request.context_id.clone().or_else(|| exec.context_id.clone());
                            response = match self.continue_task(exec, context_id, input).await {
                                Ok(next) => next,
                                Err(err) => return fail(exec, err),
                            };
                        }
                        HandlerDecision::Defer { token } => {
                            return self.defer(exec, token, request).await;
                        }
                        HandlerDecision::Abort { reason } => {
                            info!(reason = %reason, "handler aborted task");
                            return Ok(exec
                                .result(TaskStatus::Canceled)
                                .with_error(reason, ErrorKind::Cancelled));
                        }
                    }
                }
                TaskStatus::Deferred => return Ok(exec.result(status)),
                TaskStatus::Failed | TaskStatus::Rejected | TaskStatus::Canceled => {
                    warn!(status = %status, error = ?response.error_message(), "agent reported failure");
                    return Ok(settle_result(exec.result(status), &response));
                }
            }
        }
    }

    /// A still-running task, with the handle needed to follow it up.
    fn pending_result(&self, exec: &Execution, response: &NormalizedResponse) -> TaskResult {
        let handle = self.completions.register_submitted(
            &exec.agent,
            &exec.task_name,
            response,
            exec.registration.as_ref(),
        );
        let mut result = exec.result(response.status);
        result.metadata.task_id = handle.task_id.clone();
        result.submitted = Some(handle);
        result
    }

    async fn continue_task(
        &self,
        exec: &mut Execution,
        context_id: Option<String>,
        input: Value,
    ) -> Result<NormalizedResponse, TaskwireError> {
        let raw = self
            .call_agent(
                exec,
                CONTINUE_TASK,
                continuation_params(context_id.as_deref(), input),
            )
            .await?;
        exec.ledger.push_response(&exec.task_name, raw.clone());
        self.interpret(exec, &raw)
    }

    async fn defer(
        &self,
        exec: &mut Execution,
        token: String,
        request: InputRequest,
    ) -> Result<TaskResult, TaskwireError> {
        let state = DeferredState {
            task_name: exec.task_name.clone(),
            params: exec.params.clone(),
            agent: exec.agent.clone(),
            context_id: request.context_id.clone().or_else(|| exec.context_id.clone()),
            question: request.question.clone(),
            field: request.field.clone(),
            created_at: Utc::now(),
            conversation: exec.ledger.messages().to_vec(),
        };
        if let Err(err) = self.store.set(&token, state).await {
            return fail(exec, TaskwireError::Storage(err));
        }

        info!(token = %token, "task deferred");
        self.active.update(&exec.execution_id, |info| {
            info.status = Some(TaskStatus::Deferred);
        });
        let mut result = exec.result(TaskStatus::Deferred);
        result.deferred = Some(DeferredHandle {
            token,
            question: request.question.clone(),
        });
        result.input_request = Some(request);
        Ok(result)
    }

    /// Poll a working task until it settles or `working_timeout` passes.
    /// On timeout the webhook registration stays live for the caller's handle.
    async fn wait_on_working(&self, exec: &mut Execution) -> Result<Option<NormalizedResponse>, TaskwireError> {
        let handle = SubmittedHandle {
            task_id: exec.task_id(),
            operation_id: exec
                .registration
                .as_ref()
                .map(|registration| registration.operation_id.clone())
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            webhook_url: None,
        };
        let mut continuation = self
            .completions
            .continuation(&exec.agent, &exec.task_name, handle)
            .await;
        let outcome = tokio::time::timeout(
            self.config.working_timeout,
            continuation.wait_for_response(self.config.poll_interval, &exec.cancel),
        )
        .await;
        match outcome {
            Err(_) => {
                debug!(timeout = ?self.config.working_timeout, "task still working");
                continuation.detach();
                Ok(None)
            }
            Ok(Err(err)) => Err(err),
            Ok(Ok((raw, next))) => {
                exec.ledger.push_response(&exec.task_name, raw);
                Ok(Some(next))
            }
        }
    }

    async fn call_agent(
        &self,
        exec: &Execution,
        task_name: &str,
        params: Value,
    ) -> Result<Value, TaskwireError> {
        let agent = &exec.agent;
        let call = self.breakers.call(&agent.id, || async {
            self.transport
                .send_tool_call(agent, task_name, params)
                .await
                .map_err(TaskwireError::from)
        });
        tokio::select! {
            biased;
            _ = exec.cancel.cancelled() => Err(TaskwireError::Cancelled),
            outcome = call => outcome,
        }
    }

    fn interpret(&self, exec: &Execution, raw: &Value) -> Result<NormalizedResponse, TaskwireError> {
        self.normalizer
            .interpret(raw, &exec.task_name, ResponseShape::from(exec.agent.protocol))
    }

    async fn release_unused_webhook(
        &self,
        exec: &mut Execution,
        outcome: &Result<TaskResult, TaskwireError>,
    ) {
        let still_pending = matches!(outcome, Ok(result) if result.submitted.is_some());
        if let Some(registration) = exec.registration.take() {
            if !still_pending {
                self.completions.release(&registration).await;
            }
        }
    }
}

/// Failures become a failed result; cancellation propagates.
fn fail(exec: &Execution, err: TaskwireError) -> Result<TaskResult, TaskwireError> {
    if err.is_cancelled() {
        return Err(err);
    }
    warn!(error = %err, kind = ?err.kind(), "task failed");
    Ok(exec
        .result(TaskStatus::Failed)
        .with_error(err.to_string(), err.kind()))
}

async fn bounded<F>(deadline: Option<Duration>, fut: F) -> Result<TaskResult, TaskwireError>
where
    F: Future<Output = Result<TaskResult, TaskwireError>>,
{
    match deadline {
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| TaskwireError::TaskTimeout { elapsed: limit })?,
        None => fut.await,
    }
}

#[cfg(test)]
#[path = "executor_tests.rs"]
mod executor_tests;
