use std::{
    process::{ExitStatus, Stdio},
    time::Duration,
};

use async_trait::async_trait;
use azsh_agent::{AgentTool, ToolDefinition, ToolExecutionResult};
use azsh_backend::{isolate_process_group, ProcessGroupGuard};
use serde_json::{json, Value};
use tokio::{process::Command, time::timeout};
use tracing::{debug, warn};

use crate::{optional_string, required_string};

pub const DEFAULT_RUN_COMMAND_TIMEOUT_MS: u64 = 60_000;

/// Public struct `RunCommandTool` running one shell command per call.
#[derive(Debug, Clone)]
pub struct RunCommandTool {
    timeout_ms: u64,
}

impl Default for RunCommandTool {
    fn default() -> Self {
        Self::new(DEFAULT_RUN_COMMAND_TIMEOUT_MS)
    }
}

impl RunCommandTool {
    pub fn new(timeout_ms: u64) -> Self {
        Self {
            timeout_ms: timeout_ms.max(1),
        }
    }

    pub fn timeout_ms(&self) -> u64 {
        self.timeout_ms
    }

    fn timeout_message(&self) -> String {
        if self.timeout_ms % 1_000 == 0 {
            format!(
                "Error: Command timed out after {} seconds.",
                self.timeout_ms / 1_000
            )
        } else {
            format!(
                "Error: Command timed out after {} milliseconds.",
                self.timeout_ms
            )
        }
    }
}

#[async_trait]
impl AgentTool for RunCommandTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "run_command".to_string(),
            description: "Execute a shell command and return the output. Use this to run az CLI, \
                          kubectl, helm, terraform, git, or any other command-line tool."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "command": {
                        "type": "string",
                        "description": "The shell command to execute"
                    },
                    "working_directory": {
                        "type": "string",
                        "description": "Working directory for command execution"
                    }
                },
                "required": ["command"],
                "additionalProperties": false
            }),
        }
    }

    async fn execute(&self, arguments: Value) -> ToolExecutionResult {
        let command = match required_string(&arguments, "command") {
            Ok(command) => command,
            Err(error) => return ToolExecutionResult::error(json!(format!("Error: {error}"))),
        };
        let cwd = optional_string(&arguments, "working_directory");

        let mut builder = shell_command(&command);
        builder
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        isolate_process_group(&mut builder);
        if let Some(cwd) = &cwd {
            builder.current_dir(cwd);
        }

        debug!(%command, cwd = ?cwd, timeout_ms = self.timeout_ms, "running tool command");
        let child = match builder.spawn() {
            Ok(child) => child,
            Err(error) => {
                warn!(%command, %error, "tool command failed to start");
                return ToolExecutionResult::error(json!(format!(
                    "Error: failed to start command: {error}"
                )));
            }
        };
        let mut group = ProcessGroupGuard::new(&child);
        let output = match timeout(
            Duration::from_millis(self.timeout_ms),
            child.wait_with_output(),
        )
        .await
        {
            Ok(Ok(output)) => {
                group.disarm();
                output
            }
            Ok(Err(error)) => {
                warn!(%command, %error, "tool command output collection failed");
                return ToolExecutionResult::error(json!(format!("Error: {error}")));
            }
            Err(_) => {
                warn!(%command, timeout_ms = self.timeout_ms, "tool command timed out");
                return ToolExecutionResult::error(json!(self.timeout_message()));
            }
        };

        let mut parts = vec![format!("Exit code: {}", exit_code_text(output.status))];
        if !output.stdout.is_empty() {
            parts.push(format!(
                "Stdout:\n{}",
                String::from_utf8_lossy(&output.stdout)
            ));
        }
        if !output.stderr.is_empty() {
            parts.push(format!(
                "Stderr:\n{}",
                String::from_utf8_lossy(&output.stderr)
            ));
        }
        ToolExecutionResult::ok(json!(parts.join("\n")))
    }
}

#[cfg(not(windows))]
fn shell_command(command: &str) -> Command {
    let mut builder = Command::new("sh");
    builder.arg("-c").arg(command);
    builder
}

#[cfg(windows)]
fn shell_command(command: &str) -> Command {
    let mut builder = Command::new("cmd");
    builder.arg("/C").arg(command);
    builder
}

fn exit_code_text(status: ExitStatus) -> String {
    if let Some(code) = status.code() {
        return code.to_string();
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return format!("-{signal}");
        }
    }
    "unknown".to_string()
}

#[cfg(all(test, unix))]
mod tests {
    use azsh_agent::AgentTool;
    use serde_json::json;
    use tempfile::tempdir;

    use super::RunCommandTool;

    #[tokio::test]
    async fn functional_command_output_reports_exit_code_and_streams() {
        let result = RunCommandTool::default()
            .execute(json!({ "command": "echo hello; echo oops >&2; exit 3" }))
            .await;
        assert!(!result.is_error);
        assert_eq!(
            result.as_text(),
            "Exit code: 3\nStdout:\nhello\n\nStderr:\noops\n"
        );
    }

    #[tokio::test]
    async fn unit_empty_streams_are_omitted() {
        let result = RunCommandTool::default()
            .execute(json!({ "command": "true" }))
            .await;
        assert_eq!(result.as_text(), "Exit code: 0");
    }

    #[tokio::test]
    async fn functional_working_directory_is_honored() {
        let dir = tempdir().expect("tempdir");
        std::fs::write(dir.path().join("main.tf"), "terraform {}").expect("write");
        let result = RunCommandTool::default()
            .execute(json!({
                "command": "ls",
                "working_directory": dir.path().display().to_string()
            }))
            .await;
        assert_eq!(result.as_text(), "Exit code: 0\nStdout:\nmain.tf\n");
    }

    #[tokio::test]
    async fn regression_timeout_kills_command_and_reports_bound() {
        let tool = RunCommandTool::new(2_000);
        let started = std::time::Instant::now();
        let result = tool.execute(json!({ "command": "sleep 30" })).await;
        assert!(result.is_error);
        assert_eq!(
            result.as_text(),
            "Error: Command timed out after 2 seconds."
        );
        assert!(started.elapsed() < std::time::Duration::from_secs(20));
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn regression_timeout_kills_background_children_of_the_shell() {
        let dir = tempdir().expect("tempdir");
        let pid_file = dir.path().join("sleep.pid");
        let result = RunCommandTool::new(500)
            .execute(json!({
                "command": format!("sleep 37 & echo $! > '{}'; wait; echo done", pid_file.display())
            }))
            .await;
        assert_eq!(
            result.as_text(),
            "Error: Command timed out after 500 milliseconds."
        );

        let sleeper: u32 = std::fs::read_to_string(&pid_file)
            .expect("pid file")
            .trim()
            .parse()
            .expect("pid");
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
        while process_is_running(sleeper) && std::time::Instant::now() < deadline {
            std::thread::sleep(std::time::Duration::from_millis(20));
        }
        assert!(
            !process_is_running(sleeper),
            "sleep {sleeper} survived the command timeout"
        );
    }

    #[cfg(target_os = "linux")]
    fn process_is_running(pid: u32) -> bool {
        std::fs::read_to_string(format!("/proc/{pid}/stat"))
            .ok()
            .and_then(|stat| {
                stat.rsplit_once(')')
                    .and_then(|(_, rest)| rest.trim_start().chars().next())
            })
            .is_some_and(|state| !matches!(state, 'Z' | 'X'))
    }

    #[test]
    fn unit_default_timeout_message_matches_sixty_seconds() {
        assert_eq!(
            RunCommandTool::default().timeout_message(),
            "Error: Command timed out after 60 seconds."
        );
        assert_eq!(
            RunCommandTool::new(250).timeout_message(),
            "Error: Command timed out after 250 milliseconds."
        );
    }

    #[tokio::test]
    async fn regression_missing_command_is_a_tool_error() {
        let result = RunCommandTool::default().execute(json!({})).await;
        assert!(result.is_error);
        assert_eq!(
            result.as_text(),
            "Error: missing required string argument 'command'"
        );
    }

    #[tokio::test]
    async fn regression_missing_working_directory_fails_to_start() {
        let dir = tempdir().expect("tempdir");
        let missing = dir.path().join("gone");
        let result = RunCommandTool::default()
            .execute(json!({
                "command": "pwd",
                "working_directory": missing.display().to_string()
            }))
            .await;
        assert!(result.is_error);
        assert!(result
            .as_text()
            .starts_with("Error: failed to start command:"));
    }
}
