//! Resolved, validated configuration consumed by the shell.

use std::path::{Path, PathBuf};

use azsh_backend::{BackendTimeouts, DEFAULT_COMMAND_TIMEOUT_MS};
use thiserror::Error;

use crate::Cli;

pub const HISTORY_DIR_NAME: &str = ".azsh";
pub const HISTORY_FILE_NAME: &str = "history.txt";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing API key: pass --api-key or set AZSH_API_KEY or OPENAI_API_KEY")]
    MissingApiKey,
    #[error("{field} must be greater than 0")]
    ZeroValue { field: &'static str },
    #[error("{field} must not be empty")]
    EmptyValue { field: &'static str },
}

/// Public struct `ShellConfig` carrying every resolved shell setting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellConfig {
    pub model: String,
    pub api_base: String,
    pub api_key: String,
    pub az_program: String,
    pub backend_timeouts: BackendTimeouts,
    pub command_timeout_ms: u64,
    pub turn_timeout_ms: u64,
    pub request_timeout_ms: u64,
    pub max_tool_rounds: usize,
    pub streaming: bool,
    pub history_file: Option<PathBuf>,
    pub prompt: Option<String>,
}

impl ShellConfig {
    /// Resolves `cli` against the process environment's home directory.
    pub fn from_cli(cli: &Cli) -> Result<Self, ConfigError> {
        Self::from_cli_with_home(cli, home_dir().as_deref())
    }

    pub fn from_cli_with_home(cli: &Cli, home: Option<&Path>) -> Result<Self, ConfigError> {
        let api_key = [cli.api_key.as_deref(), cli.openai_api_key.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .find(|key| !key.is_empty())
            .ok_or(ConfigError::MissingApiKey)?
            .to_string();
        let history_file = cli
            .history_file
            .clone()
            .or_else(|| home.map(default_history_path));

        let config = Self {
            model: cli.model.trim().to_string(),
            api_base: cli.api_base.trim().trim_end_matches('/').to_string(),
            api_key,
            az_program: cli.az_bin.trim().to_string(),
            backend_timeouts: BackendTimeouts {
                lookup_ms: cli.lookup_timeout_ms,
                enumerate_ms: cli.enumerate_timeout_ms,
                command_ms: DEFAULT_COMMAND_TIMEOUT_MS,
            },
            command_timeout_ms: cli.command_timeout_ms,
            turn_timeout_ms: cli.turn_timeout_ms,
            request_timeout_ms: cli.request_timeout_ms,
            max_tool_rounds: cli.max_tool_rounds,
            streaming: !cli.no_stream,
            history_file,
            prompt: cli
                .prompt
                .as_deref()
                .map(str::trim)
                .filter(|prompt| !prompt.is_empty())
                .map(ToString::to_string),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, value) in [
            ("model", self.model.as_str()),
            ("api-base", self.api_base.as_str()),
            ("az-bin", self.az_program.as_str()),
        ] {
            if value.is_empty() {
                return Err(ConfigError::EmptyValue { field });
            }
        }
        for (field, value) in [
            ("lookup-timeout-ms", self.backend_timeouts.lookup_ms),
            ("enumerate-timeout-ms", self.backend_timeouts.enumerate_ms),
            ("backend command timeout", self.backend_timeouts.command_ms),
            ("command-timeout-ms", self.command_timeout_ms),
            ("turn-timeout-ms", self.turn_timeout_ms),
            ("request-timeout-ms", self.request_timeout_ms),
        ] {
            if value == 0 {
                return Err(ConfigError::ZeroValue { field });
            }
        }
        if self.max_tool_rounds == 0 {
            return Err(ConfigError::ZeroValue {
                field: "max-tool-rounds",
            });
        }
        Ok(())
    }
}

pub fn default_history_path(home: &Path) -> PathBuf {
    home.join(HISTORY_DIR_NAME).join(HISTORY_FILE_NAME)
}

/// Returns the user's home directory from `HOME` (or `USERPROFILE`).
pub fn home_dir() -> Option<PathBuf> {
    ["HOME", "USERPROFILE"]
        .into_iter()
        .filter_map(std::env::var_os)
        .find(|value| !value.is_empty())
        .map(PathBuf::from)
}
