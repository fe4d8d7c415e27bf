use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use azsh_agent::{
    AgentError, AgentRuntime, ApprovalHandler, ChatCompletionsRuntime, ChatRequest, ChatResponse,
    LlmClient, Message, MessageRole, SessionConfig, SessionEvent, StreamDeltaHandler, ToolCall,
    ToolInvocation, DECLINED_BY_USER,
};
use azsh_backend::{BackendError, BackendQuery, QueryBudget};
use azsh_mentions::{MentionEngine, MentionSources};
use azsh_safety::ToolSafetyGate;
use azsh_scope::ActiveScope;
use azsh_tools::builtin_tools;
use serde_json::{json, Value};

struct ScriptedClient {
    responses: Mutex<VecDeque<ChatResponse>>,
    requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptedClient {
    fn new(responses: Vec<ChatResponse>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(VecDeque::from(responses)),
            requests: Mutex::new(Vec::new()),
        })
    }

    fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().expect("requests lock").clone()
    }
}

#[async_trait]
impl LlmClient for ScriptedClient {
    async fn complete(
        &self,
        request: ChatRequest,
        _on_delta: Option<StreamDeltaHandler>,
    ) -> Result<ChatResponse, AgentError> {
        self.requests.lock().expect("requests lock").push(request);
        self.responses
            .lock()
            .expect("responses lock")
            .pop_front()
            .ok_or_else(|| AgentError::InvalidResponse("scripted response queue exhausted".into()))
    }
}

fn text_reply(text: &str) -> ChatResponse {
    ChatResponse {
        message: Message::assistant(text),
        finish_reason: Some("stop".to_string()),
    }
}

fn tool_reply(name: &str, arguments: Value) -> ChatResponse {
    ChatResponse {
        message: Message::assistant_with_tool_calls(
            None,
            vec![ToolCall {
                id: "call_1".to_string(),
                name: name.to_string(),
                arguments,
            }],
        ),
        finish_reason: Some("tool_calls".to_string()),
    }
}

/// Backend standing in for `az`: one resource group and one signed-in account.
struct FakeAzure;

#[async_trait]
impl BackendQuery for FakeAzure {
    async fn query(&self, args: &[String], _budget: QueryBudget) -> Result<Value, BackendError> {
        let joined = args.join(" ");
        if joined.starts_with("resource list -g rg-web") {
            return Ok(json!([
                {"name": "web-vm", "type": "Microsoft.Compute/virtualMachines", "location": "eastus"},
                {"name": "webstore", "type": "Microsoft.Storage/storageAccounts", "location": "eastus"}
            ]));
        }
        if joined.starts_with("account show") {
            return Ok(json!({
                "name": "Contoso Dev",
                "id": "1111",
                "tenantId": "tttt",
                "state": "Enabled",
                "environmentName": "AzureCloud",
                "user": {"name": "ops@contoso.com", "type": "user"}
            }));
        }
        Err(BackendError::CommandFailed {
            exit_code: Some(1),
            message: format!("unexpected az call: {joined}"),
        })
    }

    async fn run(&self, args: &[String], _budget: QueryBudget) -> Result<String, BackendError> {
        Err(BackendError::CommandFailed {
            exit_code: Some(1),
            message: format!("unexpected az call: {}", args.join(" ")),
        })
    }
}

struct RecordingApproval {
    approve: bool,
    reasons: Mutex<Vec<String>>,
}

impl RecordingApproval {
    fn new(approve: bool) -> Arc<Self> {
        Arc::new(Self {
            approve,
            reasons: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl ApprovalHandler for RecordingApproval {
    async fn confirm(&self, _invocation: &ToolInvocation, reason: &str) -> bool {
        self.reasons.lock().expect("reasons lock").push(reason.to_string());
        self.approve
    }
}

fn session_config(backend: Arc<dyn BackendQuery>, approval: Arc<RecordingApproval>) -> SessionConfig {
    let mut config = SessionConfig::new("gpt-4.1", "You are azsh.")
        .with_streaming(false)
        .with_hooks(Arc::new(ToolSafetyGate::new().expect("gate builds")))
        .with_approval(approval);
    for tool in builtin_tools(backend, 5_000) {
        config = config.with_tool(tool);
    }
    config
}

fn tool_message(request: &ChatRequest) -> &Message {
    request
        .messages
        .iter()
        .find(|message| message.role == MessageRole::Tool)
        .expect("tool result message")
}

#[tokio::test]
async fn integration_scoped_mention_prompt_reaches_model_with_context_blocks() {
    let backend: Arc<dyn BackendQuery> = Arc::new(FakeAzure);
    let scope = ActiveScope::new(Arc::clone(&backend));
    scope.set_scope("rg-web");
    let snapshot = scope.wait_for_refresh().await;
    assert_eq!(snapshot.resources.len(), 2);

    let sources = MentionSources {
        backend: Arc::clone(&backend),
        scope: scope.clone(),
        env: Arc::new(|_: &str| None),
        home: None,
    };
    let mentions = MentionEngine::builtin(&sources, Duration::from_secs(2)).expect("grammar");
    let expanded = mentions.resolve("is @web-vm healthy?").await;
    let directive = scope.snapshot().directive().expect("scope is active");
    let prompt = format!("{directive}\n\n{expanded}");

    let client = ScriptedClient::new(vec![text_reply("web-vm is running.")]);
    let session = ChatCompletionsRuntime::new(client.clone())
        .create_session(session_config(Arc::clone(&backend), RecordingApproval::new(false)))
        .await
        .expect("session");
    let reply = session
        .send_and_wait(&prompt, Duration::from_secs(5))
        .await
        .expect("turn succeeds");

    assert_eq!(reply.as_deref(), Some("web-vm is running."));
    let sent = client.requests()[0].messages[1].text_content().to_string();
    assert!(sent.starts_with("[Active Scope: Resource Group 'rg-web']"));
    assert!(sent.contains("Known resources: web-vm, webstore"));
    assert!(sent.contains("[Azure Context: VM 'web-vm']"));
    assert!(sent.contains("Type: Microsoft.Compute/virtualMachines, Resource Group: rg-web"));
    assert!(sent.ends_with("User question: is resource 'web-vm' healthy?"));
}

#[cfg(unix)]
#[tokio::test]
async fn regression_declined_destructive_command_never_touches_the_filesystem() {
    let workspace = tempfile::tempdir().expect("tempdir");
    let marker = workspace.path().join("deleted.marker");
    let command = format!("touch {} && echo delete", marker.display());
    let client = ScriptedClient::new(vec![
        tool_reply("run_command", json!({ "command": command })),
        text_reply("Understood, nothing was deleted."),
    ]);
    let approval = RecordingApproval::new(false);
    let session = ChatCompletionsRuntime::new(client.clone())
        .create_session(session_config(Arc::new(FakeAzure), approval.clone()))
        .await
        .expect("session");
    let mut events = session.subscribe();

    session
        .send_and_wait("clean up the old group", Duration::from_secs(5))
        .await
        .expect("turn succeeds");

    assert!(!marker.exists());
    assert_eq!(
        approval.reasons.lock().expect("reasons lock").as_slice(),
        ["command matches destructive keyword(s): delete"]
    );
    assert_eq!(tool_message(&client.requests()[1]).text_content(), DECLINED_BY_USER);

    let mut notices = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let SessionEvent::ToolNotice { text } = event {
            notices.push(text);
        }
    }
    assert_eq!(notices, vec![format!("🔧 Running: {command}")]);
}

#[cfg(unix)]
#[tokio::test]
async fn integration_approved_command_runs_in_the_working_directory() {
    let workspace = tempfile::tempdir().expect("tempdir");
    let client = ScriptedClient::new(vec![
        tool_reply(
            "run_command",
            json!({
                "command": "touch kept && rm -rf kept && echo removed",
                "working_directory": workspace.path().display().to_string()
            }),
        ),
        text_reply("Done."),
    ]);
    let approval = RecordingApproval::new(true);
    let session = ChatCompletionsRuntime::new(client.clone())
        .create_session(session_config(Arc::new(FakeAzure), approval.clone()))
        .await
        .expect("session");

    session
        .send_and_wait("tidy up", Duration::from_secs(5))
        .await
        .expect("turn succeeds");

    assert_eq!(approval.reasons.lock().expect("reasons lock").len(), 1);
    assert_eq!(
        tool_message(&client.requests()[1]).text_content(),
        "Exit code: 0\nStdout:\nremoved\n"
    );
    assert!(!workspace.path().join("kept").exists());
}

#[tokio::test]
async fn functional_azure_context_tool_runs_without_confirmation() {
    let client = ScriptedClient::new(vec![
        tool_reply("get_azure_context", json!({})),
        text_reply("You are ops@contoso.com."),
    ]);
    let approval = RecordingApproval::new(false);
    let session = ChatCompletionsRuntime::new(client.clone())
        .create_session(session_config(Arc::new(FakeAzure), approval.clone()))
        .await
        .expect("session");

    session
        .send_and_wait("who am I?", Duration::from_secs(5))
        .await
        .expect("turn succeeds");

    assert!(approval.reasons.lock().expect("reasons lock").is_empty());
    let context = tool_message(&client.requests()[1]).text_content().to_string();
    assert!(context.starts_with("Subscription: Contoso Dev\nSubscription ID: 1111"));
    assert!(context.contains("User: ops@contoso.com (user)"));
}
