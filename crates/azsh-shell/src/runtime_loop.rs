use std::{future::Future, io::Write, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use azsh_agent::{AgentError, AgentSession, SessionEvent};
use azsh_scope::{RefreshState, ScopeSnapshot};
use tracing::debug;

use crate::commands::{handle_command, CommandOutcome};
use crate::shell_runtime::ShellRuntime;
use crate::terminal_io::{LineReader, ReadOutcome, ReplMultilineState};

const CLEAR_SCREEN: &str = "\x1b[2J\x1b[H";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PromptRunStatus {
    Completed,
    Cancelled,
    TimedOut,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InteractiveLoopControl {
    Continue,
    Exit,
}

/// Writes session events to the terminal as plain text.
#[derive(Debug)]
struct TurnRenderer {
    streamed_since_message: bool,
    at_line_start: bool,
}

impl Default for TurnRenderer {
    fn default() -> Self {
        Self {
            streamed_since_message: false,
            at_line_start: true,
        }
    }
}

impl TurnRenderer {
    fn render<W: Write>(&mut self, event: &SessionEvent, out: &mut W) -> std::io::Result<()> {
        match event {
            SessionEvent::AssistantMessageDelta { delta } => {
                if delta.is_empty() {
                    return Ok(());
                }
                write!(out, "{delta}")?;
                out.flush()?;
                self.streamed_since_message = true;
                self.at_line_start = delta.ends_with('\n');
            }
            SessionEvent::AssistantMessage { content } => {
                if !self.streamed_since_message {
                    self.end_line(out)?;
                    write!(out, "{content}")?;
                    self.at_line_start = content.ends_with('\n');
                }
                self.end_line(out)?;
                self.streamed_since_message = false;
            }
            SessionEvent::ToolNotice { text } => {
                self.end_line(out)?;
                writeln!(out, "{text}")?;
            }
            SessionEvent::ToolExecutionEnd {
                tool_name, result, ..
            } if result.is_error => {
                self.end_line(out)?;
                let text = result.as_text();
                let summary = text.lines().next().unwrap_or_default();
                writeln!(out, "  ✗ {tool_name}: {summary}")?;
            }
            SessionEvent::ToolExecutionStart { tool_name, .. } => {
                debug!(%tool_name, "tool execution started");
            }
            SessionEvent::ToolExecutionEnd { .. } | SessionEvent::Idle | SessionEvent::Error { .. } => {}
        }
        Ok(())
    }

    fn end_line<W: Write>(&mut self, out: &mut W) -> std::io::Result<()> {
        if !self.at_line_start {
            writeln!(out)?;
            self.at_line_start = true;
        }
        Ok(())
    }
}

/// Sends one prompt and renders its events until the turn settles.
pub(crate) async fn run_turn<F, W>(
    session: &dyn AgentSession,
    prompt: &str,
    turn_timeout: Duration,
    cancellation_signal: F,
    out: &mut W,
) -> Result<PromptRunStatus>
where
    F: Future,
    W: Write,
{
    let mut events = session.subscribe();
    let mut renderer = TurnRenderer::default();
    let turn = session.send_and_wait(prompt, turn_timeout);
    tokio::pin!(turn);
    tokio::pin!(cancellation_signal);

    let outcome = loop {
        tokio::select! {
            result = &mut turn => break Some(result),
            Some(event) = events.recv() => renderer.render(&event, out)?,
            _ = &mut cancellation_signal => break None,
        }
    };

    while let Ok(event) = events.try_recv() {
        renderer.render(&event, out)?;
    }
    renderer.end_line(out)?;
    out.flush()?;

    match outcome {
        None => Ok(PromptRunStatus::Cancelled),
        Some(Ok(_)) => Ok(PromptRunStatus::Completed),
        Some(Err(AgentError::TurnTimedOut { .. })) => Ok(PromptRunStatus::TimedOut),
        Some(Err(error)) => Err(error.into()),
    }
}

/// Expands mentions and prepends the active-scope directive.
pub(crate) async fn prepare_prompt(runtime: &ShellRuntime, input: &str) -> String {
    let resolved = runtime.mentions.resolve(input).await;
    match runtime.scope.snapshot().directive() {
        Some(directive) => format!("{directive}\n\n{resolved}"),
        None => resolved,
    }
}

pub(crate) async fn run_prompt<F, W>(
    runtime: &ShellRuntime,
    input: &str,
    cancellation_signal: F,
    out: &mut W,
) -> Result<PromptRunStatus>
where
    F: Future,
    W: Write,
{
    tokio::pin!(cancellation_signal);
    let prompt = tokio::select! {
        prompt = prepare_prompt(runtime, input) => prompt,
        _ = &mut cancellation_signal => {
            report_prompt_status(PromptRunStatus::Cancelled, out)?;
            return Ok(PromptRunStatus::Cancelled);
        }
    };
    debug!(chars = prompt.len(), "submitting prompt");
    let status = run_turn(
        runtime.session.as_ref(),
        &prompt,
        runtime.turn_timeout,
        &mut cancellation_signal,
        out,
    )
    .await?;
    report_prompt_status(status, out)?;
    Ok(status)
}

pub(crate) async fn run_interactive<W: Write>(
    runtime: &ShellRuntime,
    reader: Arc<dyn LineReader>,
    out: &mut W,
) -> Result<()> {
    let mut multiline = ReplMultilineState::default();
    let mut reported_generation = None;

    loop {
        if let Some(notice) = scope_refresh_notice(&runtime.scope.snapshot(), &mut reported_generation)
        {
            writeln!(out, "{notice}")?;
            out.flush()?;
        }

        let line = match reader.read_line(multiline.prompt()).await? {
            ReadOutcome::Line(line) => line,
            ReadOutcome::Interrupted => {
                if multiline.has_pending() {
                    multiline.clear();
                    writeln!(out)?;
                    continue;
                }
                break;
            }
            ReadOutcome::Eof => break,
        };

        let Some(input) = multiline.push_line(line) else {
            continue;
        };
        if input.trim().is_empty() {
            continue;
        }
        reader.record_history(&input);

        match dispatch_interactive_turn(runtime, &input, out).await {
            Ok(InteractiveLoopControl::Continue) => continue,
            Ok(InteractiveLoopControl::Exit) => break,
            Err(error) => report_interactive_turn_error(&error),
        }
    }

    writeln!(out, "\nGoodbye!")?;
    out.flush().context("failed to flush stdout")?;
    Ok(())
}

async fn dispatch_interactive_turn<W: Write>(
    runtime: &ShellRuntime,
    input: &str,
    out: &mut W,
) -> Result<InteractiveLoopControl> {
    let trimmed = input.trim();
    if trimmed.starts_with('/') {
        match handle_command(trimmed, runtime.command_context(), out).await? {
            Some(CommandOutcome::Exit) => return Ok(InteractiveLoopControl::Exit),
            Some(CommandOutcome::Clear) => {
                write!(out, "{CLEAR_SCREEN}")?;
                out.flush()?;
            }
            Some(CommandOutcome::Handled) | None => {}
        }
        return Ok(InteractiveLoopControl::Continue);
    }

    run_prompt(runtime, input, tokio::signal::ctrl_c(), out).await?;
    Ok(InteractiveLoopControl::Continue)
}

/// One-line notice for a refresh that settled since the last prompt.
fn scope_refresh_notice(snapshot: &ScopeSnapshot, reported: &mut Option<u64>) -> Option<String> {
    let resource_group = snapshot.resource_group.as_deref()?;
    if *reported == Some(snapshot.generation) {
        return None;
    }
    let notice = match &snapshot.refresh {
        RefreshState::Loaded { count } => {
            format!("↳ {count} resource(s) loaded from '{resource_group}'")
        }
        RefreshState::Failed { reason } => {
            format!("↳ could not load resources for '{resource_group}': {reason}")
        }
        RefreshState::Idle | RefreshState::Pending => return None,
    };
    *reported = Some(snapshot.generation);
    Some(notice)
}

fn report_prompt_status<W: Write>(status: PromptRunStatus, out: &mut W) -> std::io::Result<()> {
    match status {
        PromptRunStatus::Completed => Ok(()),
        PromptRunStatus::Cancelled => writeln!(out, "⚠ Request cancelled."),
        PromptRunStatus::TimedOut => writeln!(out, "⚠ Response timed out."),
    }
}

fn report_interactive_turn_error(error: &anyhow::Error) {
    eprintln!("interactive turn failed: {error:#}");
}

#[cfg(test)]
mod tests {
    use std::{
        collections::VecDeque,
        sync::{Arc, Mutex},
        time::Duration,
    };

    use async_trait::async_trait;
    use azsh_agent::{AgentError, AgentSession, SessionEvent, SessionEvents, ToolExecutionResult};
    use azsh_backend::{BackendError, BackendQuery, QueryBudget};
    use azsh_mentions::{MentionEngine, MentionSources};
    use azsh_scope::{ActiveScope, RefreshState, ScopeSnapshot};
    use serde_json::{json, Value};
    use tokio::{io::BufReader, sync::mpsc::UnboundedSender};

    use super::{
        prepare_prompt, run_interactive, run_turn, scope_refresh_notice, PromptRunStatus,
        TurnRenderer,
    };
    use crate::shell_runtime::ShellRuntime;
    use crate::terminal_io::{LineReader, PipedLineReader};

    struct ScriptedSession {
        subscribers: Mutex<Vec<UnboundedSender<SessionEvent>>>,
        turns: Mutex<VecDeque<(Vec<SessionEvent>, Result<Option<String>, AgentError>)>>,
        prompts: Mutex<Vec<String>>,
        delay: Duration,
    }

    impl ScriptedSession {
        fn new(turns: Vec<(Vec<SessionEvent>, Result<Option<String>, AgentError>)>) -> Self {
            Self {
                subscribers: Mutex::new(Vec::new()),
                turns: Mutex::new(turns.into()),
                prompts: Mutex::new(Vec::new()),
                delay: Duration::ZERO,
            }
        }

        fn emit(&self, event: SessionEvent) {
            self.subscribers
                .lock()
                .expect("subscribers")
                .retain(|sender| sender.send(event.clone()).is_ok());
        }
    }

    #[async_trait]
    impl AgentSession for ScriptedSession {
        fn subscribe(&self) -> SessionEvents {
            let (sender, receiver) = tokio::sync::mpsc::unbounded_channel();
            self.subscribers.lock().expect("subscribers").push(sender);
            receiver
        }

        async fn send_and_wait(
            &self,
            prompt: &str,
            _timeout: Duration,
        ) -> Result<Option<String>, AgentError> {
            self.prompts.lock().expect("prompts").push(prompt.to_string());
            let (events, result) = self
                .turns
                .lock()
                .expect("turns")
                .pop_front()
                .unwrap_or((Vec::new(), Ok(None)));
            for event in events {
                self.emit(event);
            }
            tokio::time::sleep(self.delay).await;
            if let Err(error) = &result {
                self.emit(SessionEvent::Error {
                    message: error.to_string(),
                });
            }
            self.emit(SessionEvent::Idle);
            result
        }

        async fn destroy(&self) {}
    }

    struct ClusterBackend;

    #[async_trait]
    impl BackendQuery for ClusterBackend {
        async fn query(&self, args: &[String], _budget: QueryBudget) -> Result<Value, BackendError> {
            match args.first().map(String::as_str) {
                Some("aks") => Ok(json!([{
                    "name": "prod",
                    "kubernetesVersion": "1.29.2",
                    "fqdn": "prod-dns.hcp.eastus.azmk8s.io",
                    "provisioningState": "Succeeded",
                    "agentPoolProfiles": [{"name": "system", "count": 3, "vmSize": "Standard_D4s_v5"}]
                }])),
                Some("resource") => Ok(json!([
                    {"name": "web-01", "type": "Microsoft.Compute/virtualMachines", "location": "eastus"}
                ])),
                _ => Err(BackendError::CommandFailed {
                    exit_code: Some(1),
                    message: "unexpected".to_string(),
                }),
            }
        }

        async fn run(&self, _args: &[String], _budget: QueryBudget) -> Result<String, BackendError> {
            Ok(String::new())
        }
    }

    fn shell_runtime(session: ScriptedSession) -> ShellRuntime {
        let backend: Arc<dyn BackendQuery> = Arc::new(ClusterBackend);
        let scope = ActiveScope::new(Arc::clone(&backend));
        let sources = MentionSources {
            backend: Arc::clone(&backend),
            scope: scope.clone(),
            env: Arc::new(|_: &str| None),
            home: None,
        };
        let mentions = MentionEngine::builtin(&sources, Duration::from_secs(2)).expect("grammar");
        ShellRuntime {
            backend,
            scope,
            mentions,
            session: Box::new(session),
            env: Arc::clone(&sources.env),
            path_var: None,
            turn_timeout: Duration::from_secs(5),
        }
    }

    fn rendered(events: &[SessionEvent]) -> String {
        let mut renderer = TurnRenderer::default();
        let mut out = Vec::new();
        for event in events {
            renderer.render(event, &mut out).expect("render");
        }
        renderer.end_line(&mut out).expect("end line");
        String::from_utf8(out).expect("utf8")
    }

    #[test]
    fn unit_renderer_streams_deltas_without_repeating_final_message() {
        let output = rendered(&[
            SessionEvent::AssistantMessageDelta {
                delta: "Two ".to_string(),
            },
            SessionEvent::AssistantMessageDelta {
                delta: "groups.".to_string(),
            },
            SessionEvent::AssistantMessage {
                content: "Two groups.".to_string(),
            },
            SessionEvent::Idle,
        ]);
        assert_eq!(output, "Two groups.\n");
    }

    #[test]
    fn functional_renderer_prints_notices_failures_and_unstreamed_messages() {
        let output = rendered(&[
            SessionEvent::ToolNotice {
                text: "🔧 Running: az group delete -n old".to_string(),
            },
            SessionEvent::ToolExecutionEnd {
                tool_call_id: "call_1".to_string(),
                tool_name: "run_command".to_string(),
                result: ToolExecutionResult::error(json!("declined by user")),
            },
            SessionEvent::AssistantMessage {
                content: "Okay, I left it alone.".to_string(),
            },
        ]);
        assert_eq!(
            output,
            "🔧 Running: az group delete -n old\n  ✗ run_command: declined by user\nOkay, I left it alone.\n"
        );
    }

    #[tokio::test]
    async fn functional_run_turn_renders_events_and_completes() {
        let session = ScriptedSession::new(vec![(
            vec![SessionEvent::AssistantMessageDelta {
                delta: "hello".to_string(),
            }],
            Ok(Some("hello".to_string())),
        )]);
        let mut out = Vec::new();
        let status = run_turn(
            &session,
            "hi",
            Duration::from_secs(1),
            std::future::pending::<()>(),
            &mut out,
        )
        .await
        .expect("turn completes");
        assert_eq!(status, PromptRunStatus::Completed);
        assert_eq!(String::from_utf8(out).expect("utf8"), "hello\n");
        assert_eq!(session.prompts.lock().expect("prompts").as_slice(), ["hi"]);
    }

    #[tokio::test]
    async fn regression_timeout_is_a_status_and_other_errors_propagate() {
        let session = ScriptedSession::new(vec![
            (Vec::new(), Err(AgentError::TurnTimedOut { timeout_ms: 10 })),
            (
                Vec::new(),
                Err(AgentError::HttpStatus {
                    status: 500,
                    body: "upstream".to_string(),
                }),
            ),
        ]);
        let mut out = Vec::new();
        let status = run_turn(&session, "a", Duration::from_secs(1), std::future::pending::<()>(), &mut out)
            .await
            .expect("timeout is not an error");
        assert_eq!(status, PromptRunStatus::TimedOut);

        let error = run_turn(&session, "b", Duration::from_secs(1), std::future::pending::<()>(), &mut out)
            .await
            .expect_err("http failure propagates");
        assert!(error.to_string().contains("500"));
    }

    #[tokio::test]
    async fn functional_cancellation_signal_stops_a_slow_turn() {
        let mut session = ScriptedSession::new(vec![(Vec::new(), Ok(Some("late".to_string())))]);
        session.delay = Duration::from_secs(30);
        let mut out = Vec::new();
        let status = run_turn(
            &session,
            "slow",
            Duration::from_secs(60),
            tokio::time::sleep(Duration::from_millis(20)),
            &mut out,
        )
        .await
        .expect("cancel is not an error");
        assert_eq!(status, PromptRunStatus::Cancelled);
    }

    #[tokio::test]
    async fn integration_prepare_prompt_expands_mentions_and_prepends_scope() {
        let runtime = shell_runtime(ScriptedSession::new(Vec::new()));
        let plain = prepare_prompt(&runtime, "scale out @aks:prod to 5 nodes").await;
        assert!(plain.starts_with("[Azure Context: AKS Cluster 'prod']"));
        assert!(plain.ends_with("User question: scale out AKS cluster 'prod' to 5 nodes"));

        runtime.scope.set_scope("rg-prod");
        runtime.scope.wait_for_refresh().await;
        let scoped = prepare_prompt(&runtime, "restart everything here").await;
        assert!(scoped.starts_with("[Active Scope: Resource Group 'rg-prod']"));
        assert!(scoped.contains("Known resources: web-01"));
        assert!(scoped.ends_with("\n\nrestart everything here"));
    }

    #[test]
    fn unit_scope_refresh_notice_reports_each_generation_once() {
        let mut reported = None;
        let loaded = ScopeSnapshot {
            generation: 3,
            resource_group: Some("rg-prod".to_string()),
            resources: Vec::new(),
            refresh: RefreshState::Loaded { count: 4 },
        };
        assert_eq!(
            scope_refresh_notice(&loaded, &mut reported).as_deref(),
            Some("↳ 4 resource(s) loaded from 'rg-prod'")
        );
        assert_eq!(scope_refresh_notice(&loaded, &mut reported), None);

        let pending = ScopeSnapshot {
            generation: 4,
            refresh: RefreshState::Pending,
            ..loaded.clone()
        };
        assert_eq!(scope_refresh_notice(&pending, &mut reported), None);

        let failed = ScopeSnapshot {
            generation: 4,
            refresh: RefreshState::Failed {
                reason: "timed out after 15s".to_string(),
            },
            ..loaded
        };
        assert_eq!(
            scope_refresh_notice(&failed, &mut reported).as_deref(),
            Some("↳ could not load resources for 'rg-prod': timed out after 15s")
        );
        assert_eq!(scope_refresh_notice(&ScopeSnapshot::default(), &mut reported), None);
    }

    #[tokio::test]
    async fn integration_interactive_loop_dispatches_commands_and_prompts_until_exit() {
        let runtime = shell_runtime(ScriptedSession::new(vec![(
            vec![SessionEvent::AssistantMessage {
                content: "Cluster prod runs 3 nodes.".to_string(),
            }],
            Ok(Some("Cluster prod runs 3 nodes.".to_string())),
        )]));
        let reader: Arc<dyn LineReader> = Arc::new(PipedLineReader::new(BufReader::new(
            "/nope\n\nhow big is \\\n@aks:prod\n/exit\nnever reached\n".as_bytes(),
        )));
        let mut out = Vec::new();

        run_interactive(&runtime, reader, &mut out)
            .await
            .expect("loop exits cleanly");

        let output = String::from_utf8(out).expect("utf8");
        assert!(output.contains("Unknown command: /nope."));
        assert!(output.contains("Cluster prod runs 3 nodes.\n"));
        assert!(output.ends_with("\nGoodbye!\n"));
    }
}
