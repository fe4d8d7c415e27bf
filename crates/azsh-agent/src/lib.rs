//! Agent runtime boundary for azsh.
//!
//! Defines the session contract the shell talks to ([`AgentRuntime`],
//! [`AgentSession`], [`SessionEvent`]), the tool and hook seams, and a
//! chat-completions implementation backed by [`OpenAiClient`].

mod openai;
mod session;
mod tool;
mod types;

use thiserror::Error;

pub use openai::{OpenAiClient, OpenAiConfig, DEFAULT_API_BASE, DEFAULT_REQUEST_TIMEOUT_MS};
pub use session::{
    AgentRuntime, AgentSession, ChatCompletionsRuntime, SessionConfig, SessionEvent,
    SessionEvents, ASK_USER_TOOL_NAME, DECLINED_BY_USER, DEFAULT_MAX_TOOL_ROUNDS,
};
pub use tool::{
    AgentTool, AllowAllHooks, ApprovalHandler, DenyAllApprovals, PermissionDecision, PreToolUse,
    ToolExecutionResult, ToolHooks, ToolInvocation, UserInputHandler, UserInputRequest,
    UserInputResponse,
};
pub use types::{
    ChatRequest, ChatResponse, LlmClient, Message, MessageRole, StreamDeltaHandler, ToolCall,
    ToolDefinition,
};

/// Enumerates supported `AgentError` values.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("missing API key (set AZSH_API_KEY or OPENAI_API_KEY)")]
    MissingApiKey,
    #[error("invalid session config: {0}")]
    InvalidConfig(String),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("provider returned non-success status {status}: {body}")]
    HttpStatus { status: u16, body: String },
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    #[error("turn timed out after {}", format_elapsed(*timeout_ms))]
    TurnTimedOut { timeout_ms: u64 },
    #[error("agent exceeded max tool rounds ({0})")]
    MaxToolRounds(usize),
    #[error("user input unavailable: {0}")]
    UserInput(String),
    #[error("session is closed")]
    SessionClosed,
}

fn format_elapsed(timeout_ms: u64) -> String {
    if timeout_ms >= 1_000 && timeout_ms % 1_000 == 0 {
        format!("{}s", timeout_ms / 1_000)
    } else {
        format!("{timeout_ms}ms")
    }
}
