//! Agent runtime boundary plus the chat-completions implementation.
//!
//! A session owns the conversation history and runs the tool loop for each
//! prompt: model request, tool calls through the hooks and approval seam,
//! tool results back to the model, until a reply carries no tool calls or the
//! round budget runs out. Progress is published as [`SessionEvent`]s to every
//! live subscriber.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::sync::Notify;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, warn};

use crate::{
    AgentError, AgentTool, AllowAllHooks, ApprovalHandler, ChatRequest, DenyAllApprovals,
    LlmClient, Message, PermissionDecision, StreamDeltaHandler, ToolCall, ToolDefinition,
    ToolExecutionResult, ToolHooks, ToolInvocation, UserInputHandler, UserInputRequest,
};

pub const DEFAULT_MAX_TOOL_ROUNDS: usize = 16;
pub const ASK_USER_TOOL_NAME: &str = "ask_user";
pub const DECLINED_BY_USER: &str = "declined by user";

/// Events published while a session works on a prompt.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    AssistantMessageDelta {
        delta: String,
    },
    AssistantMessage {
        content: String,
    },
    ToolExecutionStart {
        tool_call_id: String,
        tool_name: String,
        arguments: Value,
    },
    ToolExecutionEnd {
        tool_call_id: String,
        tool_name: String,
        result: ToolExecutionResult,
    },
    /// Activity line produced by a tool hook.
    ToolNotice {
        text: String,
    },
    Idle,
    Error {
        message: String,
    },
}

pub type SessionEvents = UnboundedReceiver<SessionEvent>;

/// Everything a session needs at creation time.
#[derive(Clone)]
pub struct SessionConfig {
    pub model: String,
    pub streaming: bool,
    pub tools: Vec<Arc<dyn AgentTool>>,
    pub system_message: String,
    pub hooks: Arc<dyn ToolHooks>,
    pub approval: Arc<dyn ApprovalHandler>,
    pub user_input: Option<Arc<dyn UserInputHandler>>,
}

impl SessionConfig {
    pub fn new(model: impl Into<String>, system_message: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            streaming: true,
            tools: Vec::new(),
            system_message: system_message.into(),
            hooks: Arc::new(AllowAllHooks),
            approval: Arc::new(DenyAllApprovals),
            user_input: None,
        }
    }

    pub fn with_streaming(mut self, streaming: bool) -> Self {
        self.streaming = streaming;
        self
    }

    pub fn with_tool(mut self, tool: Arc<dyn AgentTool>) -> Self {
        self.tools.push(tool);
        self
    }

    pub fn with_hooks(mut self, hooks: Arc<dyn ToolHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn with_approval(mut self, approval: Arc<dyn ApprovalHandler>) -> Self {
        self.approval = approval;
        self
    }

    pub fn with_user_input(mut self, handler: Arc<dyn UserInputHandler>) -> Self {
        self.user_input = Some(handler);
        self
    }
}

/// Trait contract for creating conversational sessions.
#[async_trait]
pub trait AgentRuntime: Send + Sync {
    async fn create_session(
        &self,
        config: SessionConfig,
    ) -> Result<Box<dyn AgentSession>, AgentError>;
}

/// Trait contract for one conversation.
#[async_trait]
pub trait AgentSession: Send + Sync {
    /// Returns a receiver for events published from now on.
    fn subscribe(&self) -> SessionEvents;

    /// Runs one prompt to completion and returns the final assistant text.
    ///
    /// Dropping the returned future cancels the turn.
    async fn send_and_wait(
        &self,
        prompt: &str,
        timeout: Duration,
    ) -> Result<Option<String>, AgentError>;

    async fn destroy(&self);
}

#[derive(Default)]
struct EventBus {
    subscribers: Mutex<Vec<UnboundedSender<SessionEvent>>>,
}

impl EventBus {
    fn subscribe(&self) -> SessionEvents {
        let (sender, receiver) = unbounded_channel();
        self.lock().push(sender);
        receiver
    }

    fn emit(&self, event: SessionEvent) {
        self.lock()
            .retain(|subscriber| subscriber.send(event.clone()).is_ok());
    }

    fn close(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<UnboundedSender<SessionEvent>>> {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// [`AgentRuntime`] over any [`LlmClient`] speaking chat completions.
#[derive(Clone)]
pub struct ChatCompletionsRuntime {
    client: Arc<dyn LlmClient>,
    max_tool_rounds: usize,
}

impl ChatCompletionsRuntime {
    pub fn new(client: Arc<dyn LlmClient>) -> Self {
        Self {
            client,
            max_tool_rounds: DEFAULT_MAX_TOOL_ROUNDS,
        }
    }

    pub fn with_max_tool_rounds(mut self, max_tool_rounds: usize) -> Self {
        self.max_tool_rounds = max_tool_rounds.max(1);
        self
    }
}

#[async_trait]
impl AgentRuntime for ChatCompletionsRuntime {
    async fn create_session(
        &self,
        config: SessionConfig,
    ) -> Result<Box<dyn AgentSession>, AgentError> {
        if config.model.trim().is_empty() {
            return Err(AgentError::InvalidConfig("model must not be empty".to_string()));
        }
        let mut tools: BTreeMap<String, Arc<dyn AgentTool>> = BTreeMap::new();
        for tool in &config.tools {
            let name = tool.definition().name;
            if name == ASK_USER_TOOL_NAME {
                return Err(AgentError::InvalidConfig(format!(
                    "reserved tool name '{name}'"
                )));
            }
            if tools.insert(name.clone(), Arc::clone(tool)).is_some() {
                return Err(AgentError::InvalidConfig(format!(
                    "duplicate tool name '{name}'"
                )));
            }
        }
        if let Some(handler) = &config.user_input {
            tools.insert(
                ASK_USER_TOOL_NAME.to_string(),
                Arc::new(AskUserTool {
                    handler: Arc::clone(handler),
                }),
            );
        }
        let definitions = tools.values().map(|tool| tool.definition()).collect();

        Ok(Box::new(ChatSession {
            client: Arc::clone(&self.client),
            max_tool_rounds: self.max_tool_rounds,
            history: tokio::sync::Mutex::new(vec![Message::system(config.system_message.clone())]),
            definitions,
            tools,
            config,
            events: Arc::new(EventBus::default()),
            closed: AtomicBool::new(false),
        }))
    }
}

struct ChatSession {
    client: Arc<dyn LlmClient>,
    config: SessionConfig,
    tools: BTreeMap<String, Arc<dyn AgentTool>>,
    definitions: Vec<ToolDefinition>,
    max_tool_rounds: usize,
    history: tokio::sync::Mutex<Vec<Message>>,
    events: Arc<EventBus>,
    closed: AtomicBool,
}

impl ChatSession {
    async fn run_turn(&self, prompt: &str, clock: &TurnClock) -> Result<Option<String>, AgentError> {
        let mut history = self.history.lock().await;
        let mut messages = history.clone();
        messages.push(Message::user(prompt));

        for round in 0..self.max_tool_rounds {
            let request = ChatRequest {
                model: self.config.model.clone(),
                messages: messages.clone(),
                tools: self.definitions.clone(),
            };
            let on_delta = self.config.streaming.then(|| {
                let events = Arc::clone(&self.events);
                let handler: StreamDeltaHandler = Arc::new(move |delta: String| {
                    events.emit(SessionEvent::AssistantMessageDelta { delta });
                });
                handler
            });
            let response = self.client.complete(request, on_delta).await?;
            let message = response.message;
            let text = message.text_content().to_string();
            let tool_calls = message.tool_calls.clone();
            messages.push(message);

            if !text.trim().is_empty() {
                self.events
                    .emit(SessionEvent::AssistantMessage { content: text.clone() });
            }
            if tool_calls.is_empty() {
                *history = messages;
                return Ok((!text.trim().is_empty()).then_some(text));
            }

            debug!(round, calls = tool_calls.len(), "executing tool calls");
            for call in tool_calls {
                let result = self.execute_tool_call(&call, clock).await;
                messages.push(Message::tool_result(
                    call.id.clone(),
                    call.name.clone(),
                    result.as_text(),
                ));
            }
        }

        Err(AgentError::MaxToolRounds(self.max_tool_rounds))
    }

    async fn execute_tool_call(&self, call: &ToolCall, clock: &TurnClock) -> ToolExecutionResult {
        self.events.emit(SessionEvent::ToolExecutionStart {
            tool_call_id: call.id.clone(),
            tool_name: call.name.clone(),
            arguments: call.arguments.clone(),
        });
        let invocation = ToolInvocation::new(call.name.clone(), call.arguments.clone());
        let _waiting_on_user = (call.name == ASK_USER_TOOL_NAME).then(|| clock.pause());
        let result = match self.tools.get(&call.name) {
            Some(tool) => self.run_gated(tool.as_ref(), &invocation, clock).await,
            None => ToolExecutionResult::error(json!(format!("unknown tool '{}'", call.name))),
        };
        self.events.emit(SessionEvent::ToolExecutionEnd {
            tool_call_id: call.id.clone(),
            tool_name: call.name.clone(),
            result: result.clone(),
        });
        result
    }

    async fn run_gated(
        &self,
        tool: &dyn AgentTool,
        invocation: &ToolInvocation,
        clock: &TurnClock,
    ) -> ToolExecutionResult {
        let pre = self.config.hooks.pre_tool_use(invocation).await;
        if let Some(text) = pre.notice {
            self.events.emit(SessionEvent::ToolNotice { text });
        }
        if let PermissionDecision::Ask { reason } = &pre.decision {
            let approved = {
                let _paused = clock.pause();
                self.config.approval.confirm(invocation, reason).await
            };
            if !approved {
                warn!(tool = %invocation.tool_name, %reason, "tool call declined");
                return ToolExecutionResult::error(json!(DECLINED_BY_USER));
            }
        }
        let result = tool.execute(invocation.arguments.clone()).await;
        if let Some(text) = self.config.hooks.post_tool_use(invocation, &result).await {
            self.events.emit(SessionEvent::ToolNotice { text });
        }
        result
    }
}

#[async_trait]
impl AgentSession for ChatSession {
    fn subscribe(&self) -> SessionEvents {
        self.events.subscribe()
    }

    async fn send_and_wait(
        &self,
        prompt: &str,
        timeout: Duration,
    ) -> Result<Option<String>, AgentError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(AgentError::SessionClosed);
        }
        let clock = TurnClock::start(timeout);
        let outcome = tokio::select! {
            outcome = self.run_turn(prompt, &clock) => outcome,
            () = clock.expired() => Err(AgentError::TurnTimedOut {
                timeout_ms: timeout.as_millis() as u64,
            }),
        };
        if let Err(error) = &outcome {
            self.events.emit(SessionEvent::Error {
                message: error.to_string(),
            });
        }
        self.events.emit(SessionEvent::Idle);
        outcome
    }

    async fn destroy(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.events.close();
        self.history.lock().await.truncate(1);
    }
}

const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365);

/// Turn deadline that stops running while the user is being prompted.
struct TurnClock {
    state: Mutex<ClockState>,
    resumed: Notify,
}

struct ClockState {
    deadline: Instant,
    paused_since: Option<Instant>,
    pauses: usize,
}

impl TurnClock {
    fn start(budget: Duration) -> Self {
        let now = Instant::now();
        let deadline = now
            .checked_add(budget)
            .unwrap_or_else(|| now + FAR_FUTURE);
        Self {
            state: Mutex::new(ClockState {
                deadline,
                paused_since: None,
                pauses: 0,
            }),
            resumed: Notify::new(),
        }
    }

    /// Current deadline, or `None` while paused.
    fn deadline(&self) -> Option<Instant> {
        let state = self.lock();
        state.paused_since.is_none().then_some(state.deadline)
    }

    fn pause(&self) -> PausedClock<'_> {
        let mut state = self.lock();
        if state.pauses == 0 {
            state.paused_since = Some(Instant::now());
        }
        state.pauses += 1;
        PausedClock { clock: self }
    }

    fn resume(&self) {
        let mut state = self.lock();
        state.pauses = state.pauses.saturating_sub(1);
        if state.pauses == 0 {
            if let Some(since) = state.paused_since.take() {
                state.deadline += since.elapsed();
            }
        }
        drop(state);
        self.resumed.notify_one();
    }

    /// Resolves once the deadline passes with the clock running.
    async fn expired(&self) {
        loop {
            match self.deadline() {
                Some(deadline) => {
                    sleep_until(deadline).await;
                    if self
                        .deadline()
                        .is_some_and(|current| current <= Instant::now())
                    {
                        return;
                    }
                }
                None => self.resumed.notified().await,
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ClockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Restarts the turn clock when dropped.
struct PausedClock<'a> {
    clock: &'a TurnClock,
}

impl Drop for PausedClock<'_> {
    fn drop(&mut self) {
        self.clock.resume();
    }
}

struct AskUserTool {
    handler: Arc<dyn UserInputHandler>,
}

#[async_trait]
impl AgentTool for AskUserTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: ASK_USER_TOOL_NAME.to_string(),
            description: "Ask the user a clarifying question when the request is ambiguous. Optionally offer choices.".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "question": { "type": "string", "description": "Question to show the user" },
                    "choices": {
                        "type": "array",
                        "items": { "type": "string" },
                        "description": "Optional list of suggested answers"
                    }
                },
                "required": ["question"]
            }),
        }
    }

    async fn execute(&self, arguments: Value) -> ToolExecutionResult {
        let question = arguments
            .get("question")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .trim()
            .to_string();
        if question.is_empty() {
            return ToolExecutionResult::error(json!("question is required"));
        }
        let choices = arguments
            .get("choices")
            .and_then(Value::as_array)
            .map(|choices| {
                choices
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        match self
            .handler
            .request_input(UserInputRequest { question, choices })
            .await
        {
            Ok(response) => ToolExecutionResult::ok(json!(response.answer)),
            Err(error) => ToolExecutionResult::error(json!(error.to_string())),
        }
    }
}
