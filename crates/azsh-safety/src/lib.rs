//! Tool-safety gate.
//!
//! Classifies tool invocations before they run. Only the shell-facing tools
//! are inspected; for `run_command` a case-insensitive substring match against
//! a destructive keyword list escalates the call to `ask`. The gate never
//! returns `allow` for a command that matched a keyword.

use std::collections::BTreeSet;

use aho_corasick::{AhoCorasick, AhoCorasickBuilder, MatchKind};
use async_trait::async_trait;
use azsh_agent::{
    PermissionDecision, PreToolUse, ToolExecutionResult, ToolHooks, ToolInvocation,
};
use thiserror::Error;
use tracing::debug;

pub const RUN_COMMAND_TOOL: &str = "run_command";
pub const AZURE_CONTEXT_TOOL: &str = "get_azure_context";

/// Substrings that mark a command as potentially destructive.
pub const DESTRUCTIVE_KEYWORDS: &[&str] = &[
    "delete",
    "destroy",
    "remove",
    "drop",
    "purge",
    "az group delete",
    "terraform destroy",
    "kubectl delete",
    "rm -rf",
];

#[derive(Debug, Error)]
pub enum SafetyGateError {
    #[error("failed to build keyword matcher: {0}")]
    Matcher(#[from] aho_corasick::BuildError),
}

/// Public struct `ToolSafetyGate` implementing the pre/post tool hooks.
#[derive(Debug, Clone)]
pub struct ToolSafetyGate {
    guarded_tools: BTreeSet<String>,
    keywords: Vec<String>,
    matcher: AhoCorasick,
}

impl ToolSafetyGate {
    pub fn new() -> Result<Self, SafetyGateError> {
        Self::with_keywords(DESTRUCTIVE_KEYWORDS.iter().copied())
    }

    pub fn with_keywords<I, S>(keywords: I) -> Result<Self, SafetyGateError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let keywords = keywords
            .into_iter()
            .map(|keyword| keyword.as_ref().to_ascii_lowercase())
            .filter(|keyword| !keyword.is_empty())
            .collect::<Vec<_>>();
        let matcher = AhoCorasickBuilder::new()
            .ascii_case_insensitive(true)
            .match_kind(MatchKind::Standard)
            .build(&keywords)?;
        Ok(Self {
            guarded_tools: [RUN_COMMAND_TOOL, AZURE_CONTEXT_TOOL]
                .into_iter()
                .map(str::to_string)
                .collect(),
            keywords,
            matcher,
        })
    }

    pub fn is_guarded(&self, tool_name: &str) -> bool {
        self.guarded_tools.contains(tool_name)
    }

    /// Returns every keyword found in `command`, in keyword-table order.
    pub fn matched_keywords(&self, command: &str) -> Vec<&str> {
        let mut hits = BTreeSet::new();
        for found in self.matcher.find_overlapping_iter(command) {
            hits.insert(found.pattern().as_usize());
        }
        hits.into_iter()
            .filter_map(|index| self.keywords.get(index).map(String::as_str))
            .collect()
    }

    pub fn pre_invocation(&self, invocation: &ToolInvocation) -> PreToolUse {
        if !self.is_guarded(&invocation.tool_name) {
            return PreToolUse::allow();
        }
        if invocation.tool_name != RUN_COMMAND_TOOL {
            return PreToolUse {
                decision: PermissionDecision::Allow,
                notice: Some(format!("🔧 {}", invocation.tool_name)),
            };
        }

        let command = invocation.string_argument("command").unwrap_or_default();
        let notice = Some(format!("🔧 Running: {command}"));
        let hits = self.matched_keywords(command);
        if hits.is_empty() {
            return PreToolUse {
                decision: PermissionDecision::Allow,
                notice,
            };
        }
        debug!(%command, keywords = ?hits, "destructive command needs confirmation");
        PreToolUse {
            decision: PermissionDecision::Ask {
                reason: format!("command matches destructive keyword(s): {}", hits.join(", ")),
            },
            notice,
        }
    }

    pub fn post_invocation(&self, invocation: &ToolInvocation) -> Option<String> {
        self.is_guarded(&invocation.tool_name)
            .then(|| format!("✓ {} done", invocation.tool_name))
    }
}

#[async_trait]
impl ToolHooks for ToolSafetyGate {
    async fn pre_tool_use(&self, invocation: &ToolInvocation) -> PreToolUse {
        self.pre_invocation(invocation)
    }

    async fn post_tool_use(
        &self,
        invocation: &ToolInvocation,
        _result: &ToolExecutionResult,
    ) -> Option<String> {
        self.post_invocation(invocation)
    }
}
