//! Scripted REPL sessions: each fixture pipes a stdin script into `azsh` and
//! checks what the loop printed.

use std::{
    fs,
    io::{Read, Write},
    path::Path,
    process::{Command as ProcessCommand, Stdio},
    thread,
    time::Duration,
};

use httpmock::prelude::*;
use serde::Deserialize;
use serde_json::json;
use tempfile::tempdir;
use wait_timeout::ChildExt;

use super::AZSH_ENV_VARS;

const REPL_PROMPT: &str = "azsh> ";
const API_BASE_PLACEHOLDER: &str = "{{API_BASE}}";

#[derive(Debug, Deserialize)]
struct ReplScript {
    args: Vec<String>,
    stdin: String,
    timeout_ms: u64,
    expect: ReplExpectation,
}

#[derive(Debug, Deserialize)]
struct ReplExpectation {
    /// Minimum number of `azsh> ` prompts printed.
    prompts: usize,
    #[serde(default)]
    stdout: Vec<String>,
    #[serde(default)]
    stdout_absent: Vec<String>,
    #[serde(default)]
    stderr: Vec<String>,
    #[serde(default)]
    stderr_absent: Vec<String>,
}

fn load_script(name: &str) -> ReplScript {
    let path = Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("testdata")
        .join("repl-harness")
        .join(name);
    let raw = fs::read_to_string(&path)
        .unwrap_or_else(|error| panic!("failed to read {}: {error}", path.display()));
    serde_json::from_str(&raw)
        .unwrap_or_else(|error| panic!("failed to parse {}: {error}", path.display()))
}

/// Runs the named script and asserts its expectations; `api_base` fills the
/// `{{API_BASE}}` placeholder in its arguments.
fn run_script(name: &str, api_base: Option<&str>) {
    let script = load_script(name);
    let args = script
        .args
        .iter()
        .map(|arg| match api_base {
            Some(base) => arg.replace(API_BASE_PLACEHOLDER, base),
            None => arg.clone(),
        })
        .collect::<Vec<_>>();

    let temp = tempdir().expect("tempdir");
    let mut command = ProcessCommand::new(assert_cmd::cargo::cargo_bin!("azsh"));
    for var in AZSH_ENV_VARS {
        command.env_remove(var);
    }
    command
        .current_dir(temp.path())
        .args(&args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    let mut child = command.spawn().expect("spawn azsh");

    if let Some(mut stdin) = child.stdin.take() {
        stdin
            .write_all(script.stdin.as_bytes())
            .expect("write stdin script");
    }
    let stdout_join = drain_pipe(child.stdout.take().expect("child stdout piped"));
    let stderr_join = drain_pipe(child.stderr.take().expect("child stderr piped"));

    let timeout = Duration::from_millis(script.timeout_ms);
    let status = match child.wait_timeout(timeout).expect("wait with timeout") {
        Some(status) => Some(status),
        None => {
            child.kill().expect("kill hung azsh");
            child.wait().expect("wait after kill");
            None
        }
    };
    let stdout = stdout_join.join().expect("join stdout reader");
    let stderr = stderr_join.join().expect("join stderr reader");
    let transcript = format!("{name}\n--- stdout ---\n{stdout}\n--- stderr ---\n{stderr}");

    let status = status.unwrap_or_else(|| {
        panic!("azsh did not exit within {}ms\n{transcript}", script.timeout_ms)
    });
    assert!(status.success(), "azsh exited with {status}\n{transcript}");

    let expect = &script.expect;
    let prompts = stdout.matches(REPL_PROMPT).count();
    assert!(
        prompts >= expect.prompts,
        "expected at least {} prompts, saw {prompts}\n{transcript}",
        expect.prompts
    );
    for needle in &expect.stdout {
        assert!(stdout.contains(needle), "stdout lacks {needle:?}\n{transcript}");
    }
    for needle in &expect.stdout_absent {
        assert!(!stdout.contains(needle), "stdout has {needle:?}\n{transcript}");
    }
    for needle in &expect.stderr {
        assert!(stderr.contains(needle), "stderr lacks {needle:?}\n{transcript}");
    }
    for needle in &expect.stderr_absent {
        assert!(!stderr.contains(needle), "stderr has {needle:?}\n{transcript}");
    }
}

fn drain_pipe(mut pipe: impl Read + Send + 'static) -> thread::JoinHandle<String> {
    thread::spawn(move || {
        let mut output = Vec::new();
        pipe.read_to_end(&mut output).expect("read child pipe");
        String::from_utf8_lossy(&output).into_owned()
    })
}

fn completion_body(content: &str) -> serde_json::Value {
    json!({
        "choices": [{
            "message": { "content": content },
            "finish_reason": "stop"
        }]
    })
}

#[test]
fn functional_repl_help_lists_commands_and_suggests_close_matches() {
    run_script("help-and-unknown-command.json", None);
}

#[test]
fn functional_repl_tracks_active_resource_group() {
    run_script("resource-group-scope.json", None);
}

#[test]
fn integration_repl_prompt_round_trips_through_mock_provider() {
    let server = MockServer::start();
    let openai = server.mock(|when, then| {
        when.method(POST)
            .path("/v1/chat/completions")
            .header("authorization", "Bearer test-azsh-key");
        then.status(200)
            .json_body(completion_body("repl harness integration response"));
    });

    run_script("prompt-happy-path.json", Some(&server.base_url()));
    openai.assert_calls(1);
}

#[test]
fn regression_repl_exits_cleanly_on_eof() {
    run_script("eof-exit.json", None);
}

#[test]
fn regression_repl_turn_timeout_returns_to_prompt() {
    let server = MockServer::start();
    let openai = server.mock(|when, then| {
        when.method(POST)
            .path("/v1/chat/completions")
            .header("authorization", "Bearer test-azsh-key");
        then.status(200)
            .delay(Duration::from_millis(1_500))
            .json_body(completion_body("delayed response"));
    });

    run_script("prompt-turn-timeout.json", Some(&server.base_url()));
    openai.assert_calls(1);
}

#[test]
fn regression_repl_provider_error_keeps_the_loop_alive() {
    let server = MockServer::start();
    let openai = server.mock(|when, then| {
        when.method(POST).path("/v1/chat/completions");
        then.status(500).body("upstream exploded");
    });

    run_script("provider-error-recovers.json", Some(&server.base_url()));
    openai.assert_calls(2);
}
