use std::sync::Arc;

use async_trait::async_trait;
use azsh_agent::{AgentTool, ToolDefinition, ToolExecutionResult};
use azsh_backend::{az_args, display_or, Account, BackendError, BackendQuery, QueryBudget};
use serde_json::{json, Value};
use tracing::warn;

const NOT_AVAILABLE: &str = "N/A";

/// Public struct `AzureContextTool` summarizing the signed-in identity.
pub struct AzureContextTool {
    backend: Arc<dyn BackendQuery>,
}

impl AzureContextTool {
    pub fn new(backend: Arc<dyn BackendQuery>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl AgentTool for AzureContextTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "get_azure_context".to_string(),
            description: "Get the current Azure context including signed-in user, active \
                          subscription, and tenant information."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {},
                "additionalProperties": false
            }),
        }
    }

    async fn execute(&self, _arguments: Value) -> ToolExecutionResult {
        let payload = match self
            .backend
            .query(&az_args(["account", "show"]), QueryBudget::Command)
            .await
        {
            Ok(payload) => payload,
            Err(error) => {
                warn!(%error, "azure context lookup failed");
                return ToolExecutionResult::error(json!(describe_failure(&error)));
            }
        };
        match serde_json::from_value::<Account>(payload) {
            Ok(account) => ToolExecutionResult::ok(json!(render_account(&account))),
            Err(_) => {
                ToolExecutionResult::error(json!("Error: Could not parse Azure CLI output."))
            }
        }
    }
}

fn describe_failure(error: &BackendError) -> String {
    match error {
        BackendError::TimedOut { .. } => "Error: Timed out retrieving Azure context.".to_string(),
        BackendError::MalformedResponse(_) => "Error: Could not parse Azure CLI output.".to_string(),
        other => format!(
            "Error: Failed to get Azure context. {other}\n\
             Make sure the Azure CLI is installed and you are logged in (run 'az login')."
        ),
    }
}

fn render_account(account: &Account) -> String {
    let user_name = account.user_name().map(ToString::to_string);
    let user_kind = account.user_kind().map(ToString::to_string);
    format!(
        "Subscription: {}\nSubscription ID: {}\nTenant ID: {}\nUser: {} ({})\nCloud: {}\nState: {}",
        display_or(&account.name, NOT_AVAILABLE),
        display_or(&account.id, NOT_AVAILABLE),
        display_or(&account.tenant_id, NOT_AVAILABLE),
        display_or(&user_name, NOT_AVAILABLE),
        display_or(&user_kind, NOT_AVAILABLE),
        display_or(&account.cloud_name, NOT_AVAILABLE),
        display_or(&account.state, NOT_AVAILABLE),
    )
}
