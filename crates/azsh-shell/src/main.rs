mod bootstrap_helpers;
mod commands;
mod environment;
mod runtime_loop;
mod shell_runtime;
mod system_prompt;
mod terminal_io;

use std::{
    io::{IsTerminal, Write},
    sync::Arc,
};

use anyhow::{Context, Result};
use azsh_backend::{AzCli, BackendQuery};
use azsh_cli::{Cli, ShellConfig};
use azsh_scope::ActiveScope;
use clap::Parser;

use crate::bootstrap_helpers::init_tracing;
use crate::environment::{detect_cloud_shell, environment_label};
use crate::runtime_loop::{run_interactive, run_prompt, PromptRunStatus};
use crate::shell_runtime::ShellRuntime;
use crate::terminal_io::{EditorLineReader, LineReader, PipedLineReader, ReplHelper};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = ShellConfig::from_cli(&cli).context("invalid configuration")?;
    run_shell(config).await
}

async fn run_shell(config: ShellConfig) -> Result<()> {
    let backend: Arc<dyn BackendQuery> = Arc::new(AzCli::new(
        config.az_program.clone(),
        config.backend_timeouts,
    ));
    let scope = ActiveScope::new(Arc::clone(&backend));
    let reader = select_line_reader(&config, &scope)?;
    let runtime = ShellRuntime::start(&config, backend, scope, Arc::clone(&reader)).await?;

    let mut stdout = std::io::stdout();
    let outcome = match config.prompt.as_deref() {
        Some(prompt) => run_one_shot(&runtime, prompt, &mut stdout).await,
        None => {
            writeln!(
                stdout,
                "azsh ({}) | model {}",
                environment_label(detect_cloud_shell(&runtime.env)),
                config.model
            )?;
            writeln!(stdout, "Type /help for commands, @ to mention Azure resources.")?;
            run_interactive(&runtime, reader, &mut stdout).await
        }
    };
    runtime.session.destroy().await;
    outcome
}

async fn run_one_shot<W: Write>(runtime: &ShellRuntime, prompt: &str, out: &mut W) -> Result<()> {
    match run_prompt(runtime, prompt, tokio::signal::ctrl_c(), out).await? {
        PromptRunStatus::Completed => Ok(()),
        PromptRunStatus::Cancelled => anyhow::bail!("prompt cancelled"),
        PromptRunStatus::TimedOut => anyhow::bail!("prompt timed out"),
    }
}

fn select_line_reader(config: &ShellConfig, scope: &ActiveScope) -> Result<Arc<dyn LineReader>> {
    let interactive_terminal = config.prompt.is_none()
        && std::io::stdin().is_terminal()
        && std::io::stdout().is_terminal();
    if interactive_terminal {
        let helper = ReplHelper::new(scope.clone());
        let reader = EditorLineReader::spawn(helper, config.history_file.clone())
            .context("failed to start line editor")?;
        return Ok(Arc::new(reader));
    }
    Ok(Arc::new(PipedLineReader::from_stdin()))
}
