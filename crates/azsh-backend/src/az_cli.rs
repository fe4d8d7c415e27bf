use std::{path::PathBuf, process::Stdio};

use async_trait::async_trait;
use serde_json::Value;
use tokio::{process::Command, time::timeout};
use tracing::{debug, warn};

use crate::{
    isolate_process_group, BackendError, BackendQuery, BackendTimeouts, ProcessGroupGuard,
    QueryBudget, DEFAULT_AZ_PROGRAM,
};

/// Production [`BackendQuery`] that shells out to the `az` executable.
#[derive(Debug, Clone)]
pub struct AzCli {
    program: PathBuf,
    timeouts: BackendTimeouts,
}

impl Default for AzCli {
    fn default() -> Self {
        Self::new(DEFAULT_AZ_PROGRAM, BackendTimeouts::default())
    }
}

impl AzCli {
    pub fn new(program: impl Into<PathBuf>, timeouts: BackendTimeouts) -> Self {
        Self {
            program: program.into(),
            timeouts,
        }
    }

    pub fn program(&self) -> &std::path::Path {
        &self.program
    }

    pub fn timeouts(&self) -> BackendTimeouts {
        self.timeouts
    }

    async fn invoke(
        &self,
        args: &[String],
        request_json: bool,
        budget: QueryBudget,
    ) -> Result<String, BackendError> {
        let mut full_args = args.to_vec();
        if request_json {
            full_args.push("--output".to_string());
            full_args.push("json".to_string());
        }
        let program = self.program.display().to_string();
        let command_line = render_command_line(&program, &full_args);
        let bound = self.timeouts.for_budget(budget);
        debug!(command = %command_line, timeout_ms = bound.as_millis() as u64, "invoking backend");

        let mut command = Command::new(&self.program);
        command
            .args(&full_args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        isolate_process_group(&mut command);

        let child = match command.spawn() {
            Ok(child) => child,
            Err(error) => {
                warn!(command = %command_line, %error, "backend launch failed");
                return Err(BackendError::Unavailable {
                    program,
                    reason: error.to_string(),
                });
            }
        };
        // Dropping the guard on timeout or cancellation kills the whole group.
        let mut group = ProcessGroupGuard::new(&child);
        let output = match timeout(bound, child.wait_with_output()).await {
            Ok(Ok(output)) => {
                group.disarm();
                output
            }
            Ok(Err(error)) => {
                warn!(command = %command_line, %error, "backend output collection failed");
                return Err(BackendError::Unavailable {
                    program,
                    reason: error.to_string(),
                });
            }
            Err(_) => {
                warn!(command = %command_line, "backend call timed out");
                return Err(BackendError::TimedOut {
                    timeout_ms: bound.as_millis() as u64,
                });
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let message = if stderr.is_empty() {
                format!("az command failed: {command_line}")
            } else {
                stderr
            };
            debug!(command = %command_line, exit_code = ?output.status.code(), "backend call failed");
            return Err(BackendError::CommandFailed {
                exit_code: output.status.code(),
                message,
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl BackendQuery for AzCli {
    async fn query(&self, args: &[String], budget: QueryBudget) -> Result<Value, BackendError> {
        let stdout = self.invoke(args, true, budget).await?;
        serde_json::from_str(&stdout)
            .map_err(|error| BackendError::MalformedResponse(error.to_string()))
    }

    async fn run(&self, args: &[String], budget: QueryBudget) -> Result<String, BackendError> {
        let stdout = self.invoke(args, false, budget).await?;
        Ok(stdout.trim().to_string())
    }
}

/// Renders a shell-quoted command line for diagnostics.
pub fn render_command_line(program: &str, args: &[String]) -> String {
    let mut words = Vec::with_capacity(args.len() + 1);
    words.push(program);
    words.extend(args.iter().map(String::as_str));
    shell_words::join(words)
}
