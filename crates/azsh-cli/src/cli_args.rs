use std::path::PathBuf;

use azsh_agent::{DEFAULT_API_BASE, DEFAULT_MAX_TOOL_ROUNDS, DEFAULT_REQUEST_TIMEOUT_MS};
use azsh_backend::{DEFAULT_AZ_PROGRAM, DEFAULT_ENUMERATE_TIMEOUT_MS, DEFAULT_LOOKUP_TIMEOUT_MS};
use azsh_tools::DEFAULT_RUN_COMMAND_TIMEOUT_MS;
use clap::{ArgAction, Parser};

pub const DEFAULT_MODEL: &str = "gpt-4.1";
pub const DEFAULT_TURN_TIMEOUT_MS: u64 = 300_000;

pub(crate) fn parse_positive_usize(value: &str) -> Result<usize, String> {
    let parsed = value
        .parse::<usize>()
        .map_err(|error| format!("failed to parse integer: {error}"))?;
    if parsed == 0 {
        return Err("value must be greater than 0".to_string());
    }
    Ok(parsed)
}

pub(crate) fn parse_positive_u64(value: &str) -> Result<u64, String> {
    let parsed = value
        .parse::<u64>()
        .map_err(|error| format!("failed to parse integer: {error}"))?;
    if parsed == 0 {
        return Err("value must be greater than 0".to_string());
    }
    Ok(parsed)
}

#[derive(Debug, Clone, Parser)]
#[command(
    name = "azsh",
    about = "Azure-aware AI terminal assistant with @mention context resolution",
    version
)]
/// Public struct `Cli` holding the raw `azsh` flags.
pub struct Cli {
    #[arg(
        long,
        env = "AZSH_MODEL",
        default_value = DEFAULT_MODEL,
        help = "Chat-completions model identifier"
    )]
    pub model: String,

    #[arg(
        long = "api-base",
        env = "AZSH_API_BASE",
        default_value = DEFAULT_API_BASE,
        help = "Base URL of the OpenAI-compatible API"
    )]
    pub api_base: String,

    #[arg(
        long = "api-key",
        env = "AZSH_API_KEY",
        hide_env_values = true,
        help = "API key for the chat-completions endpoint"
    )]
    pub api_key: Option<String>,

    #[arg(
        long = "openai-api-key",
        env = "OPENAI_API_KEY",
        hide_env_values = true,
        help = "Fallback API key used when --api-key is not set"
    )]
    pub openai_api_key: Option<String>,

    #[arg(
        long = "az-bin",
        env = "AZSH_AZ_BIN",
        default_value = DEFAULT_AZ_PROGRAM,
        help = "Path to the Azure CLI executable"
    )]
    pub az_bin: String,

    #[arg(
        long = "lookup-timeout-ms",
        env = "AZSH_LOOKUP_TIMEOUT_MS",
        default_value_t = DEFAULT_LOOKUP_TIMEOUT_MS,
        value_parser = parse_positive_u64,
        help = "Timeout for each @mention lookup"
    )]
    pub lookup_timeout_ms: u64,

    #[arg(
        long = "enumerate-timeout-ms",
        env = "AZSH_ENUMERATE_TIMEOUT_MS",
        default_value_t = DEFAULT_ENUMERATE_TIMEOUT_MS,
        value_parser = parse_positive_u64,
        help = "Timeout for the background resource listing of the active scope"
    )]
    pub enumerate_timeout_ms: u64,

    #[arg(
        long = "command-timeout-ms",
        env = "AZSH_COMMAND_TIMEOUT_MS",
        default_value_t = DEFAULT_RUN_COMMAND_TIMEOUT_MS,
        value_parser = parse_positive_u64,
        help = "Timeout for commands the agent runs through the run_command tool"
    )]
    pub command_timeout_ms: u64,

    #[arg(
        long = "turn-timeout-ms",
        env = "AZSH_TURN_TIMEOUT_MS",
        default_value_t = DEFAULT_TURN_TIMEOUT_MS,
        value_parser = parse_positive_u64,
        help = "Upper bound on one agent turn, tool calls included"
    )]
    pub turn_timeout_ms: u64,

    #[arg(
        long = "request-timeout-ms",
        env = "AZSH_REQUEST_TIMEOUT_MS",
        default_value_t = DEFAULT_REQUEST_TIMEOUT_MS,
        value_parser = parse_positive_u64,
        help = "HTTP timeout for each chat-completions request"
    )]
    pub request_timeout_ms: u64,

    #[arg(
        long = "max-tool-rounds",
        env = "AZSH_MAX_TOOL_ROUNDS",
        default_value_t = DEFAULT_MAX_TOOL_ROUNDS,
        value_parser = parse_positive_usize,
        help = "Maximum model/tool round trips within one turn"
    )]
    pub max_tool_rounds: usize,

    #[arg(
        long = "no-stream",
        env = "AZSH_NO_STREAM",
        action = ArgAction::SetTrue,
        help = "Disable incremental streaming of assistant output"
    )]
    pub no_stream: bool,

    #[arg(
        long = "history-file",
        env = "AZSH_HISTORY_FILE",
        help = "Line-editor history file (default: ~/.azsh/history.txt)"
    )]
    pub history_file: Option<PathBuf>,

    #[arg(
        long,
        short = 'p',
        help = "Run a single prompt non-interactively and exit"
    )]
    pub prompt: Option<String>,
}
