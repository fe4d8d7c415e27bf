//! Local slash commands. These run without the agent and short-circuit a turn.

use std::{ffi::OsStr, io::Write};

use anyhow::{Context, Result};
use azsh_backend::{az_args, display_or, Account, BackendQuery, QueryBudget};
use azsh_cli::{canonical_command_name, parse_command, render_help_overview, unknown_command_message};
use azsh_mentions::EnvLookup;
use azsh_scope::{ActiveScope, RefreshState, SCOPE_DIRECTIVE_MAX_RESOURCES};
use tracing::warn;

use crate::environment::{available_tools, detect_cloud_shell, environment_label};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CommandOutcome {
    Handled,
    Clear,
    Exit,
}

/// Shared state a slash command may read or change.
#[derive(Clone, Copy)]
pub(crate) struct CommandContext<'a> {
    pub(crate) backend: &'a dyn BackendQuery,
    pub(crate) scope: &'a ActiveScope,
    pub(crate) env: &'a EnvLookup,
    pub(crate) path_var: Option<&'a OsStr>,
}

/// Runs `input` as a slash command. Returns `None` when it is not one.
pub(crate) async fn handle_command<W: Write>(
    input: &str,
    context: CommandContext<'_>,
    out: &mut W,
) -> Result<Option<CommandOutcome>> {
    let Some(parsed) = parse_command(input) else {
        return Ok(None);
    };
    let outcome = match canonical_command_name(&parsed.name) {
        "/sub" => handle_sub(&unquote_argument(parsed.args), context, out).await?,
        "/rg" => handle_rg(&unquote_argument(parsed.args), context, out)?,
        "/env" => handle_env(context, out).await?,
        "/help" => {
            writeln!(out, "{}", render_help_overview())?;
            CommandOutcome::Handled
        }
        "/clear" => CommandOutcome::Clear,
        "/exit" => CommandOutcome::Exit,
        other => {
            writeln!(out, "{}", unknown_command_message(other))?;
            CommandOutcome::Handled
        }
    };
    Ok(Some(outcome))
}

/// Strips shell-style quoting so `/sub "Dev Sub"` names `Dev Sub`.
fn unquote_argument(args: &str) -> String {
    match shell_words::split(args) {
        Ok(words) => words.join(" "),
        Err(_) => args.to_string(),
    }
}

async fn handle_sub<W: Write>(
    args: &str,
    context: CommandContext<'_>,
    out: &mut W,
) -> Result<CommandOutcome> {
    if !args.is_empty() {
        let set = az_args(["account", "set", "--subscription", args]);
        match context.backend.run(&set, QueryBudget::Command).await {
            Ok(_) => {
                writeln!(out, "✓ Switched to subscription: {args}")?;
                if let Some(previous) = context.scope.scope() {
                    context.scope.clear();
                    writeln!(out, "  Active resource group '{previous}' cleared.")?;
                }
            }
            Err(error) => {
                warn!(subscription = args, %error, "subscription switch failed");
                writeln!(out, "✗ Failed to switch subscription: {error}")?;
            }
        }
        return Ok(CommandOutcome::Handled);
    }

    let accounts = match context
        .backend
        .query(&az_args(["account", "list"]), QueryBudget::Command)
        .await
        .map_err(anyhow::Error::from)
        .and_then(|payload| {
            serde_json::from_value::<Vec<Account>>(payload)
                .context("unexpected subscription list payload")
        }) {
        Ok(accounts) => accounts,
        Err(error) => {
            writeln!(
                out,
                "✗ Failed to list subscriptions: {error:#}\n  Is the Azure CLI installed and logged in?"
            )?;
            return Ok(CommandOutcome::Handled);
        }
    };
    write!(out, "{}", render_subscription_table(&accounts))?;
    Ok(CommandOutcome::Handled)
}

fn render_subscription_table(accounts: &[Account]) -> String {
    let rows = accounts
        .iter()
        .map(|account| {
            (
                display_or(&account.name, "").to_string(),
                display_or(&account.id, "").to_string(),
                if account.is_default.unwrap_or(false) {
                    "✓"
                } else {
                    ""
                },
            )
        })
        .collect::<Vec<_>>();
    let name_width = rows
        .iter()
        .map(|(name, _, _)| name.chars().count())
        .chain(std::iter::once("Name".len()))
        .max()
        .unwrap_or_default();
    let id_width = rows
        .iter()
        .map(|(_, id, _)| id.chars().count())
        .chain(std::iter::once("ID".len()))
        .max()
        .unwrap_or_default();

    let mut text = String::from("Azure Subscriptions\n");
    text.push_str(&format!(
        "  {:<name_width$}  {:<id_width$}  Default\n",
        "Name", "ID"
    ));
    for (name, id, marker) in rows {
        text.push_str(
            format!("  {name:<name_width$}  {id:<id_width$}  {marker}")
                .trim_end(),
        );
        text.push('\n');
    }
    if accounts.is_empty() {
        text.push_str("  (no subscriptions)\n");
    }
    text
}

fn handle_rg<W: Write>(
    args: &str,
    context: CommandContext<'_>,
    out: &mut W,
) -> Result<CommandOutcome> {
    match args {
        "" => write!(out, "{}", render_scope_status(context.scope))?,
        "clear" | "-" => match context.scope.scope() {
            Some(previous) => {
                context.scope.clear();
                writeln!(out, "✓ Active resource group '{previous}' cleared.")?;
            }
            None => writeln!(out, "No active resource group.")?,
        },
        name => {
            context.scope.set_scope(name);
            writeln!(
                out,
                "✓ Active resource group: {name} (loading resources in the background)"
            )?;
        }
    }
    Ok(CommandOutcome::Handled)
}

fn render_scope_status(scope: &ActiveScope) -> String {
    let snapshot = scope.snapshot();
    let Some(resource_group) = snapshot.resource_group.as_deref() else {
        return "No active resource group. Use /rg <name> to set one.\n".to_string();
    };
    let mut text = format!("Active resource group: {resource_group}\n");
    match &snapshot.refresh {
        RefreshState::Idle => {}
        RefreshState::Pending => text.push_str("Resources: loading...\n"),
        RefreshState::Failed { reason } => {
            text.push_str(&format!("Resources: failed to load ({reason})\n"));
        }
        RefreshState::Loaded { count } => {
            text.push_str(&format!("Resources: {count} cached\n"));
            for resource in snapshot.resources.iter().take(SCOPE_DIRECTIVE_MAX_RESOURCES) {
                text.push_str(&format!(
                    "  {:<32} {}\n",
                    resource.mention(),
                    resource.description()
                ));
            }
            let hidden = count.saturating_sub(SCOPE_DIRECTIVE_MAX_RESOURCES);
            if hidden > 0 {
                text.push_str(&format!("  ... and {hidden} more\n"));
            }
        }
    }
    text
}

async fn handle_env<W: Write>(context: CommandContext<'_>, out: &mut W) -> Result<CommandOutcome> {
    let cloud_shell = detect_cloud_shell(context.env);
    let account = match context
        .backend
        .query(&az_args(["account", "show"]), QueryBudget::Command)
        .await
    {
        Ok(payload) => serde_json::from_value::<Account>(payload).ok(),
        Err(error) => {
            warn!(%error, "account lookup for /env failed");
            None
        }
    };
    let (user, subscription) = match &account {
        Some(account) => (
            account.user_name().unwrap_or("unknown").to_string(),
            display_or(&account.name, "unknown").to_string(),
        ),
        None => ("unknown".to_string(), "unknown".to_string()),
    };
    let tools = available_tools(context.path_var);
    let tools = if tools.is_empty() {
        "none".to_string()
    } else {
        tools.join(", ")
    };

    writeln!(out, "Environment: {}", environment_label(cloud_shell))?;
    writeln!(out, "User: {user}")?;
    writeln!(out, "Subscription: {subscription}")?;
    if let Some(resource_group) = context.scope.scope() {
        writeln!(out, "Resource group: {resource_group}")?;
    }
    writeln!(out, "Tools: {tools}")?;
    Ok(CommandOutcome::Handled)
}

#[cfg(test)]
mod tests {
    use std::{
        collections::VecDeque,
        sync::{Arc, Mutex},
    };

    use async_trait::async_trait;
    use azsh_backend::{BackendError, BackendQuery, QueryBudget};
    use azsh_mentions::EnvLookup;
    use azsh_scope::{ActiveScope, RefreshState};
    use serde_json::{json, Value};

    use super::{handle_command, unquote_argument, CommandContext, CommandOutcome};

    #[derive(Default)]
    struct FakeBackend {
        queries: Mutex<VecDeque<Result<Value, BackendError>>>,
        runs: Mutex<VecDeque<Result<String, BackendError>>>,
        calls: Mutex<Vec<Vec<String>>>,
    }

    impl FakeBackend {
        fn with_query(self, response: Result<Value, BackendError>) -> Self {
            self.queries.lock().expect("queries").push_back(response);
            self
        }

        fn with_run(self, response: Result<String, BackendError>) -> Self {
            self.runs.lock().expect("runs").push_back(response);
            self
        }

        fn calls(&self) -> Vec<Vec<String>> {
            self.calls.lock().expect("calls").clone()
        }
    }

    #[async_trait]
    impl BackendQuery for FakeBackend {
        async fn query(&self, args: &[String], budget: QueryBudget) -> Result<Value, BackendError> {
            self.calls.lock().expect("calls").push(args.to_vec());
            if args.first().map(String::as_str) == Some("resource") {
                assert_eq!(budget, QueryBudget::Enumerate);
                return Ok(json!([
                    {"name": "web-01", "type": "Microsoft.Compute/virtualMachines", "location": "westeurope", "id": "/subs/x/vm/web-01"}
                ]));
            }
            assert_eq!(budget, QueryBudget::Command);
            self.queries
                .lock()
                .expect("queries")
                .pop_front()
                .unwrap_or_else(|| Err(BackendError::MalformedResponse("unscripted".to_string())))
        }

        async fn run(&self, args: &[String], budget: QueryBudget) -> Result<String, BackendError> {
            assert_eq!(budget, QueryBudget::Command);
            self.calls.lock().expect("calls").push(args.to_vec());
            self.runs
                .lock()
                .expect("runs")
                .pop_front()
                .unwrap_or_else(|| Ok(String::new()))
        }
    }

    fn no_env() -> EnvLookup {
        Arc::new(|_: &str| None)
    }

    async fn run(
        input: &str,
        backend: &Arc<FakeBackend>,
        scope: &ActiveScope,
        env: &EnvLookup,
    ) -> (Option<CommandOutcome>, String) {
        let mut out = Vec::new();
        let context = CommandContext {
            backend: backend.as_ref(),
            scope,
            env,
            path_var: None,
        };
        let outcome = handle_command(input, context, &mut out)
            .await
            .expect("command runs");
        (outcome, String::from_utf8(out).expect("utf8"))
    }

    #[tokio::test]
    async fn unit_non_slash_input_is_not_a_command() {
        let backend = Arc::new(FakeBackend::default());
        let scope = ActiveScope::new(backend.clone());
        let (outcome, output) = run("list my vms", &backend, &scope, &no_env()).await;
        assert_eq!(outcome, None);
        assert!(output.is_empty());
        assert!(backend.calls().is_empty());
    }

    #[tokio::test]
    async fn functional_exit_clear_and_unknown_outcomes() {
        let backend = Arc::new(FakeBackend::default());
        let scope = ActiveScope::new(backend.clone());
        let env = no_env();
        assert_eq!(run("/exit", &backend, &scope, &env).await.0, Some(CommandOutcome::Exit));
        assert_eq!(run("/QUIT", &backend, &scope, &env).await.0, Some(CommandOutcome::Exit));
        assert_eq!(run("/clear", &backend, &scope, &env).await.0, Some(CommandOutcome::Clear));

        let (outcome, output) = run("/deploy now", &backend, &scope, &env).await;
        assert_eq!(outcome, Some(CommandOutcome::Handled));
        assert_eq!(
            output,
            "Unknown command: /deploy. Type /help for available commands.\n"
        );
    }

    #[tokio::test]
    async fn functional_sub_lists_subscriptions_with_default_marker() {
        let backend = Arc::new(FakeBackend::default().with_query(Ok(json!([
            {"name": "Prod", "id": "1111", "isDefault": true},
            {"name": "Development", "id": "2222", "isDefault": false}
        ]))));
        let scope = ActiveScope::new(backend.clone());

        let (outcome, output) = run("/sub", &backend, &scope, &no_env()).await;

        assert_eq!(outcome, Some(CommandOutcome::Handled));
        assert_eq!(
            output,
            "Azure Subscriptions\n  Name         ID    Default\n  Prod         1111  ✓\n  Development  2222\n"
        );
        assert_eq!(backend.calls(), vec![vec!["account".to_string(), "list".to_string()]]);
    }

    #[tokio::test]
    async fn integration_sub_switch_clears_active_scope() {
        let backend = Arc::new(FakeBackend::default().with_run(Ok(String::new())));
        let scope = ActiveScope::new(backend.clone());
        scope.set_scope("rg-old");
        scope.wait_for_refresh().await;

        let (_, output) = run("/sub Contoso Dev", &backend, &scope, &no_env()).await;

        assert_eq!(
            output,
            "✓ Switched to subscription: Contoso Dev\n  Active resource group 'rg-old' cleared.\n"
        );
        assert_eq!(scope.scope(), None);
        assert!(backend.calls().contains(&vec![
            "account".to_string(),
            "set".to_string(),
            "--subscription".to_string(),
            "Contoso Dev".to_string(),
        ]));
    }

    #[test]
    fn unit_unquote_argument_accepts_quoted_and_bare_names() {
        assert_eq!(unquote_argument("\"Contoso Dev\""), "Contoso Dev");
        assert_eq!(unquote_argument("Contoso   Dev"), "Contoso Dev");
        assert_eq!(unquote_argument("Bob's Sub"), "Bob's Sub");
        assert_eq!(unquote_argument(""), "");
    }

    #[tokio::test]
    async fn regression_failed_sub_switch_keeps_scope() {
        let backend = Arc::new(FakeBackend::default().with_run(Err(BackendError::CommandFailed {
            exit_code: Some(1),
            message: "The subscription of 'nope' doesn't exist in cloud 'AzureCloud'.".to_string(),
        })));
        let scope = ActiveScope::new(backend.clone());
        scope.set_scope("rg-keep");

        let (_, output) = run("/sub nope", &backend, &scope, &no_env()).await;

        assert!(output.starts_with("✗ Failed to switch subscription: The subscription of 'nope'"));
        assert_eq!(scope.scope().as_deref(), Some("rg-keep"));
    }

    #[tokio::test]
    async fn functional_rg_set_status_and_clear() {
        let backend = Arc::new(FakeBackend::default());
        let scope = ActiveScope::new(backend.clone());
        let env = no_env();

        let (_, output) = run("/rg", &backend, &scope, &env).await;
        assert_eq!(output, "No active resource group. Use /rg <name> to set one.\n");

        let (_, output) = run("/rg rg-prod", &backend, &scope, &env).await;
        assert_eq!(
            output,
            "✓ Active resource group: rg-prod (loading resources in the background)\n"
        );
        let snapshot = scope.wait_for_refresh().await;
        assert_eq!(snapshot.refresh, RefreshState::Loaded { count: 1 });

        let (_, output) = run("/rg", &backend, &scope, &env).await;
        assert!(output.starts_with("Active resource group: rg-prod\nResources: 1 cached\n"));
        assert!(output.contains("@vm:web-01"));
        assert!(output.contains("Microsoft.Compute/virtualMachines (westeurope)"));

        let (_, output) = run("/rg -", &backend, &scope, &env).await;
        assert_eq!(output, "✓ Active resource group 'rg-prod' cleared.\n");
        assert_eq!(scope.scope(), None);
    }

    #[tokio::test]
    async fn functional_env_reports_cloud_shell_identity_and_tools() {
        let backend = Arc::new(FakeBackend::default().with_query(Ok(json!({
            "name": "Prod",
            "user": {"name": "dev@contoso.com", "type": "user"}
        }))));
        let scope = ActiveScope::new(backend.clone());
        let env: EnvLookup = Arc::new(|key: &str| (key == "ACC_CLOUD").then(|| "1".to_string()));

        let (_, output) = run("/env", &backend, &scope, &env).await;

        assert_eq!(
            output,
            "Environment: Azure Cloud Shell\nUser: dev@contoso.com\nSubscription: Prod\nTools: none\n"
        );
    }

    #[tokio::test]
    async fn regression_env_tolerates_backend_failure() {
        let backend = Arc::new(FakeBackend::default().with_query(Err(BackendError::Unavailable {
            program: "az".to_string(),
            reason: "No such file or directory".to_string(),
        })));
        let scope = ActiveScope::new(backend.clone());

        let (outcome, output) = run("/env", &backend, &scope, &no_env()).await;

        assert_eq!(outcome, Some(CommandOutcome::Handled));
        assert!(output.contains("Environment: Local Terminal\nUser: unknown\nSubscription: unknown\n"));
    }

    #[tokio::test]
    async fn unit_help_lists_commands_and_mentions() {
        let backend = Arc::new(FakeBackend::default());
        let scope = ActiveScope::new(backend.clone());
        let (outcome, output) = run("/help", &backend, &scope, &no_env()).await;
        assert_eq!(outcome, Some(CommandOutcome::Handled));
        assert!(output.contains("/rg [name|clear]"));
        assert!(output.contains("@aks:<name>"));
    }
}
