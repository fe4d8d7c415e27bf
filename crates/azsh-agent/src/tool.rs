//! Tool contract plus the interception seams a session consults per call.

use async_trait::async_trait;
use serde_json::Value;

use crate::{AgentError, ToolDefinition};

/// Result payload returned to the model for one tool call.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolExecutionResult {
    pub content: Value,
    pub is_error: bool,
}

impl ToolExecutionResult {
    pub fn ok(content: Value) -> Self {
        Self {
            content,
            is_error: false,
        }
    }

    pub fn error(content: Value) -> Self {
        Self {
            content,
            is_error: true,
        }
    }

    /// Converts the payload to text for insertion into a tool message.
    pub fn as_text(&self) -> String {
        match &self.content {
            Value::String(text) => text.clone(),
            other => serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string()),
        }
    }
}

/// Trait contract for `AgentTool` behavior.
#[async_trait]
pub trait AgentTool: Send + Sync {
    fn definition(&self) -> ToolDefinition;
    async fn execute(&self, arguments: Value) -> ToolExecutionResult;
}

/// Tool name plus arguments, as seen by hooks before and after execution.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolInvocation {
    pub tool_name: String,
    pub arguments: Value,
}

impl ToolInvocation {
    pub fn new(tool_name: impl Into<String>, arguments: Value) -> Self {
        Self {
            tool_name: tool_name.into(),
            arguments,
        }
    }

    /// Returns a string argument by key, if present.
    pub fn string_argument(&self, key: &str) -> Option<&str> {
        self.arguments.get(key).and_then(Value::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PermissionDecision {
    Allow,
    /// Requires user confirmation before the tool runs.
    Ask { reason: String },
}

/// Outcome of a pre-invocation hook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreToolUse {
    pub decision: PermissionDecision,
    /// One-line activity notice shown to the user.
    pub notice: Option<String>,
}

impl PreToolUse {
    pub fn allow() -> Self {
        Self {
            decision: PermissionDecision::Allow,
            notice: None,
        }
    }
}

/// Trait contract for pre/post tool interception.
#[async_trait]
pub trait ToolHooks: Send + Sync {
    async fn pre_tool_use(&self, invocation: &ToolInvocation) -> PreToolUse;

    async fn post_tool_use(
        &self,
        invocation: &ToolInvocation,
        result: &ToolExecutionResult,
    ) -> Option<String>;
}

/// Hooks that allow everything silently.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAllHooks;

#[async_trait]
impl ToolHooks for AllowAllHooks {
    async fn pre_tool_use(&self, _invocation: &ToolInvocation) -> PreToolUse {
        PreToolUse::allow()
    }

    async fn post_tool_use(
        &self,
        _invocation: &ToolInvocation,
        _result: &ToolExecutionResult,
    ) -> Option<String> {
        None
    }
}

/// Trait contract for confirming an `ask` decision.
#[async_trait]
pub trait ApprovalHandler: Send + Sync {
    /// Returns `true` only on explicit approval.
    async fn confirm(&self, invocation: &ToolInvocation, reason: &str) -> bool;
}

/// Approval handler for non-interactive sessions: nothing is approved.
#[derive(Debug, Clone, Copy, Default)]
pub struct DenyAllApprovals;

#[async_trait]
impl ApprovalHandler for DenyAllApprovals {
    async fn confirm(&self, _invocation: &ToolInvocation, _reason: &str) -> bool {
        false
    }
}

/// Clarifying question raised by the model through `ask_user`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserInputRequest {
    pub question: String,
    pub choices: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserInputResponse {
    pub answer: String,
    pub was_freeform: bool,
}

/// Trait contract for answering model-initiated questions.
#[async_trait]
pub trait UserInputHandler: Send + Sync {
    async fn request_input(
        &self,
        request: UserInputRequest,
    ) -> Result<UserInputResponse, AgentError>;
}
