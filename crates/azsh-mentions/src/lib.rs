//! `@mention` expansion for prompts.
//!
//! Input text is scanned against an ordered table of grammars. Every matched
//! span is resolved concurrently into a context block plus a short label, the
//! spans are swapped for their labels, and the blocks are prepended as a
//! preamble. A failing mention never aborts the pass: it contributes a
//! bracketed diagnostic and keeps its literal token in the question.

mod grammar;
mod resolvers;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use azsh_backend::{format_timeout, BackendError, BackendQuery, DEFAULT_LOOKUP_TIMEOUT_MS};
use azsh_scope::{ActiveScope, RESOURCE_TYPE_ALIASES};
use futures_util::future::join_all;
use thiserror::Error;
use tracing::{debug, warn};

pub use grammar::{Grammar, MentionKind, MentionToken};
pub use resolvers::{
    process_env, AksClusterResolver, EnvLookup, FileResolver, ResourceGroupResolver,
    ScopedNameResolver, SubscriptionResolver, TypedResourceResolver, VirtualMachineResolver,
};

const USER_QUESTION_SEPARATOR: &str = "\n\nUser question: ";
const BARE_NAME_PATTERN: &str = r"@([A-Za-z0-9](?:[A-Za-z0-9._-]*[A-Za-z0-9_])?)";

/// Enumerates per-mention failure classes.
#[derive(Debug, Error)]
pub enum MentionError {
    #[error("{0}")]
    Backend(#[from] BackendError),
    #[error("{0}")]
    NotFound(String),
    #[error("timed out after {}", format_timeout(*timeout_ms))]
    TimedOut { timeout_ms: u64 },
    #[error("malformed JSON output: {0}")]
    Json(#[from] serde_json::Error),
    #[error("malformed JSON output: {0}")]
    Malformed(String),
    #[error("{0}")]
    Io(String),
    #[error("invalid mention grammar: {0}")]
    InvalidGrammar(#[from] regex::Error),
}

/// Context block and replacement label produced by one resolver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedMention {
    pub block: String,
    pub label: String,
}

impl ResolvedMention {
    pub fn new(block: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            block: block.into(),
            label: label.into(),
        }
    }
}

/// Trait contract for resolving one captured identifier.
#[async_trait]
pub trait MentionResolver: Send + Sync {
    /// Returns `false` to leave a grammar match untouched.
    fn claims(&self, _identifier: &str) -> bool {
        true
    }

    async fn resolve(&self, identifier: &str) -> Result<ResolvedMention, MentionError>;
}

/// Outcome for one token; failures carry a synthesized diagnostic block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolutionResult {
    pub token: MentionToken,
    pub block: String,
    pub label: String,
    pub resolved: bool,
}

impl ResolutionResult {
    fn failed(token: MentionToken, error: &MentionError) -> Self {
        Self {
            block: format!("[Could not resolve {}: {error}]", token.literal),
            label: token.literal.clone(),
            token,
            resolved: false,
        }
    }
}

/// Full result of one expansion pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MentionExpansion {
    pub text: String,
    pub results: Vec<ResolutionResult>,
}

/// Inputs the built-in resolvers draw on.
#[derive(Clone)]
pub struct MentionSources {
    pub backend: Arc<dyn BackendQuery>,
    pub scope: ActiveScope,
    pub env: EnvLookup,
    pub home: Option<PathBuf>,
}

impl MentionSources {
    pub fn from_process(backend: Arc<dyn BackendQuery>, scope: ActiveScope) -> Self {
        Self {
            backend,
            scope,
            env: process_env(),
            home: std::env::var_os("HOME").map(PathBuf::from),
        }
    }
}

/// Builds the built-in grammar table in priority order.
pub fn builtin_grammars(sources: &MentionSources) -> Result<Vec<Grammar>, MentionError> {
    let backend = &sources.backend;
    let mut grammars = vec![
        Grammar::new(
            MentionKind::Subscription,
            r"@sub\b",
            Arc::new(SubscriptionResolver::new(
                Arc::clone(backend),
                Arc::clone(&sources.env),
            )),
        )?,
        Grammar::new(
            MentionKind::ResourceGroup,
            r"@rg:(\S+)",
            Arc::new(ResourceGroupResolver::new(Arc::clone(backend))),
        )?,
        Grammar::new(
            MentionKind::VirtualMachine,
            r"@vm:(\S+)",
            Arc::new(VirtualMachineResolver::new(Arc::clone(backend))),
        )?,
        Grammar::new(
            MentionKind::AksCluster,
            r"@aks:(\S+)",
            Arc::new(AksClusterResolver::new(Arc::clone(backend))),
        )?,
        Grammar::new(
            MentionKind::File,
            r"@file:(\S+)",
            Arc::new(FileResolver::new(sources.home.clone())),
        )?,
    ];
    // vm and aks already have dedicated grammars with richer blocks.
    for alias in RESOURCE_TYPE_ALIASES
        .iter()
        .filter(|alias| !matches!(alias.abbreviation, "vm" | "aks"))
    {
        grammars.push(Grammar::new(
            MentionKind::Typed {
                abbreviation: alias.abbreviation,
            },
            &format!(r"@{}:(\S+)", regex::escape(alias.abbreviation)),
            Arc::new(TypedResourceResolver::new(
                Arc::clone(backend),
                sources.scope.clone(),
                alias,
            )),
        )?);
    }
    grammars.push(Grammar::new(
        MentionKind::ScopedName,
        BARE_NAME_PATTERN,
        Arc::new(ScopedNameResolver::new(
            Arc::clone(backend),
            sources.scope.clone(),
        )),
    )?);
    Ok(grammars)
}

/// Public struct `MentionEngine` that expands mentions in prompt text.
#[derive(Clone)]
pub struct MentionEngine {
    grammars: Arc<Vec<Grammar>>,
    lookup_timeout: Duration,
}

impl MentionEngine {
    pub fn new(grammars: Vec<Grammar>, lookup_timeout: Duration) -> Self {
        Self {
            grammars: Arc::new(grammars),
            lookup_timeout,
        }
    }

    pub fn builtin(sources: &MentionSources, lookup_timeout: Duration) -> Result<Self, MentionError> {
        Ok(Self::new(builtin_grammars(sources)?, lookup_timeout))
    }

    pub fn with_default_timeout(sources: &MentionSources) -> Result<Self, MentionError> {
        Self::builtin(sources, Duration::from_millis(DEFAULT_LOOKUP_TIMEOUT_MS))
    }

    /// Lists matched tokens in grammar priority order, then by position.
    pub fn scan(&self, text: &str) -> Vec<MentionToken> {
        grammar::scan(&self.grammars, text)
            .into_iter()
            .map(|(_, token)| token)
            .collect()
    }

    /// Expands every mention; returns `text` unchanged when nothing matched.
    pub async fn resolve(&self, text: &str) -> String {
        self.expand(text).await.text
    }

    pub async fn expand(&self, text: &str) -> MentionExpansion {
        let tokens = grammar::scan(&self.grammars, text);
        if tokens.is_empty() {
            return MentionExpansion {
                text: text.to_string(),
                results: Vec::new(),
            };
        }
        debug!(count = tokens.len(), "resolving mentions");

        let results = join_all(
            tokens
                .into_iter()
                .map(|(grammar_index, token)| self.resolve_token(grammar_index, token)),
        )
        .await;

        let replacements = results
            .iter()
            .map(|result| (result.token.span(), result.label.as_str()))
            .collect::<Vec<_>>();
        let cleaned = grammar::collapse_spaces(&grammar::replace_spans(text, &replacements));
        let preamble = results
            .iter()
            .map(|result| result.block.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");

        MentionExpansion {
            text: format!("{preamble}{USER_QUESTION_SEPARATOR}{cleaned}"),
            results,
        }
    }

    async fn resolve_token(&self, grammar_index: usize, token: MentionToken) -> ResolutionResult {
        let Some(grammar) = self.grammars.get(grammar_index) else {
            let error = MentionError::NotFound("no resolver for mention".to_string());
            return ResolutionResult::failed(token, &error);
        };
        let outcome = match tokio::time::timeout(
            self.lookup_timeout,
            grammar.resolver().resolve(&token.identifier),
        )
        .await
        {
            Ok(outcome) => outcome,
            Err(_) => Err(MentionError::TimedOut {
                timeout_ms: self.lookup_timeout.as_millis() as u64,
            }),
        };
        match outcome {
            Ok(resolved) => ResolutionResult {
                token,
                block: resolved.block,
                label: resolved.label,
                resolved: true,
            },
            Err(error) => {
                warn!(mention = %token.literal, %error, "mention resolution failed");
                ResolutionResult::failed(token, &error)
            }
        }
    }
}
