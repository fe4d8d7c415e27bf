//! Bounded subprocess adapter for the Azure CLI.
//!
//! Every call runs `az` with an explicit timeout, parses JSON output, and folds
//! spawn failures, non-zero exits, timeouts and malformed output into
//! [`BackendError`]. Nothing past this boundary ever sees a raw process error.

mod az_cli;
mod azure_types;
mod process_group;

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

pub use az_cli::{render_command_line, AzCli};
pub use process_group::{isolate_process_group, ProcessGroupGuard};
pub use azure_types::{
    display_or, Account, AccountUser, AgentPoolProfile, HardwareProfile, ManagedCluster, OsDisk,
    ResourceGroup, ResourceGroupProperties, ResourceSummary, StorageProfile, VirtualMachine,
};

pub const DEFAULT_AZ_PROGRAM: &str = "az";
pub const DEFAULT_LOOKUP_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_ENUMERATE_TIMEOUT_MS: u64 = 15_000;
pub const DEFAULT_COMMAND_TIMEOUT_MS: u64 = 30_000;

/// Which timeout bound applies to a backend call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryBudget {
    /// Interactive lookups made while resolving mentions.
    Lookup,
    /// Resource enumeration for the active-scope refresh.
    Enumerate,
    /// Local slash commands (`/sub`, `/env`).
    Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackendTimeouts {
    pub lookup_ms: u64,
    pub enumerate_ms: u64,
    pub command_ms: u64,
}

impl Default for BackendTimeouts {
    fn default() -> Self {
        Self {
            lookup_ms: DEFAULT_LOOKUP_TIMEOUT_MS,
            enumerate_ms: DEFAULT_ENUMERATE_TIMEOUT_MS,
            command_ms: DEFAULT_COMMAND_TIMEOUT_MS,
        }
    }
}

impl BackendTimeouts {
    pub fn for_budget(&self, budget: QueryBudget) -> Duration {
        let millis = match budget {
            QueryBudget::Lookup => self.lookup_ms,
            QueryBudget::Enumerate => self.enumerate_ms,
            QueryBudget::Command => self.command_ms,
        };
        Duration::from_millis(millis.max(1))
    }
}

/// Enumerates backend failure classes.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BackendError {
    #[error("failed to launch '{program}': {reason}")]
    Unavailable { program: String, reason: String },
    #[error("{message}")]
    CommandFailed {
        exit_code: Option<i32>,
        message: String,
    },
    #[error("timed out after {}", format_timeout(*timeout_ms))]
    TimedOut { timeout_ms: u64 },
    #[error("malformed JSON output: {0}")]
    MalformedResponse(String),
}

impl BackendError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::TimedOut { .. })
    }
}

/// Renders a timeout bound the way users read it (`10s`, `1500ms`).
pub fn format_timeout(timeout_ms: u64) -> String {
    if timeout_ms >= 1_000 && timeout_ms % 1_000 == 0 {
        format!("{}s", timeout_ms / 1_000)
    } else {
        format!("{timeout_ms}ms")
    }
}

/// Trait contract for read-mostly access to the resource-management backend.
#[async_trait]
pub trait BackendQuery: Send + Sync {
    /// Runs `az <args> --output json` and parses standard output.
    async fn query(&self, args: &[String], budget: QueryBudget) -> Result<Value, BackendError>;

    /// Runs `az <args>` without requesting JSON and returns trimmed stdout.
    async fn run(&self, args: &[String], budget: QueryBudget) -> Result<String, BackendError>;
}

/// Builds an owned argument vector from string literals and captured values.
pub fn az_args<I, S>(args: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    args.into_iter()
        .map(|arg| arg.as_ref().to_string())
        .collect()
}
