//! Agent tools exposed to the conversational runtime.
//!
//! `run_command` executes an arbitrary shell command under a bounded timeout;
//! `get_azure_context` summarizes the signed-in identity through the backend
//! adapter. Both return plain text the model reads directly.

mod azure_context;
mod run_command;

use std::sync::Arc;

use azsh_agent::AgentTool;
use azsh_backend::BackendQuery;
use serde_json::Value;

pub use azure_context::AzureContextTool;
pub use run_command::{RunCommandTool, DEFAULT_RUN_COMMAND_TIMEOUT_MS};

/// Builds the tool list registered on every shell session.
pub fn builtin_tools(
    backend: Arc<dyn BackendQuery>,
    command_timeout_ms: u64,
) -> Vec<Arc<dyn AgentTool>> {
    vec![
        Arc::new(RunCommandTool::new(command_timeout_ms)),
        Arc::new(AzureContextTool::new(backend)),
    ]
}

fn required_string(arguments: &Value, key: &str) -> Result<String, String> {
    arguments
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToString::to_string)
        .ok_or_else(|| format!("missing required string argument '{key}'"))
}

fn optional_string(arguments: &Value, key: &str) -> Option<String> {
    arguments
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToString::to_string)
}
