use std::{ffi::OsString, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use azsh_agent::{
    AgentRuntime, AgentSession, ChatCompletionsRuntime, OpenAiClient, OpenAiConfig, SessionConfig,
};
use azsh_backend::BackendQuery;
use azsh_cli::ShellConfig;
use azsh_mentions::{EnvLookup, MentionEngine, MentionSources};
use azsh_safety::ToolSafetyGate;
use azsh_scope::ActiveScope;
use azsh_tools::builtin_tools;
use tracing::debug;

use crate::commands::CommandContext;
use crate::environment::{detect_cloud_shell, process_path};
use crate::system_prompt::system_prompt;
use crate::terminal_io::{LineReader, TerminalApproval, TerminalUserInput};

/// Everything one shell process holds for the lifetime of its session.
pub(crate) struct ShellRuntime {
    pub(crate) backend: Arc<dyn BackendQuery>,
    pub(crate) scope: ActiveScope,
    pub(crate) mentions: MentionEngine,
    pub(crate) session: Box<dyn AgentSession>,
    pub(crate) env: EnvLookup,
    pub(crate) path_var: Option<OsString>,
    pub(crate) turn_timeout: Duration,
}

impl ShellRuntime {
    pub(crate) async fn start(
        config: &ShellConfig,
        backend: Arc<dyn BackendQuery>,
        scope: ActiveScope,
        reader: Arc<dyn LineReader>,
    ) -> Result<Self> {
        let sources = MentionSources::from_process(Arc::clone(&backend), scope.clone());
        let env = Arc::clone(&sources.env);
        let mentions = MentionEngine::builtin(
            &sources,
            Duration::from_millis(config.backend_timeouts.lookup_ms),
        )
        .context("failed to build mention grammar")?;

        let client = OpenAiClient::new(OpenAiConfig {
            api_base: config.api_base.clone(),
            api_key: config.api_key.clone(),
            request_timeout_ms: config.request_timeout_ms,
        })
        .context("failed to create chat-completions client")?;
        let runtime = ChatCompletionsRuntime::new(Arc::new(client))
            .with_max_tool_rounds(config.max_tool_rounds);
        let gate = ToolSafetyGate::new().context("failed to build tool-safety gate")?;

        let cloud_shell = detect_cloud_shell(&env);
        let mut session_config = SessionConfig::new(&config.model, system_prompt(cloud_shell))
            .with_streaming(config.streaming)
            .with_hooks(Arc::new(gate))
            .with_approval(Arc::new(TerminalApproval::new(Arc::clone(&reader))))
            .with_user_input(Arc::new(TerminalUserInput::new(reader)));
        for tool in builtin_tools(Arc::clone(&backend), config.command_timeout_ms) {
            session_config = session_config.with_tool(tool);
        }
        let session = runtime
            .create_session(session_config)
            .await
            .context("failed to create agent session")?;
        debug!(model = %config.model, streaming = config.streaming, cloud_shell, "agent session ready");

        Ok(Self {
            backend,
            scope,
            mentions,
            session,
            env,
            path_var: process_path(),
            turn_timeout: Duration::from_millis(config.turn_timeout_ms),
        })
    }

    pub(crate) fn command_context(&self) -> CommandContext<'_> {
        CommandContext {
            backend: self.backend.as_ref(),
            scope: &self.scope,
            env: &self.env,
            path_var: self.path_var.as_deref(),
        }
    }
}
