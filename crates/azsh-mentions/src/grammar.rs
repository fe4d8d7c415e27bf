//! Mention grammars and the claimed-span scanner.

use std::ops::Range;
use std::sync::Arc;

use regex::Regex;

use crate::{MentionError, MentionResolver};

/// Which grammar produced a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MentionKind {
    Subscription,
    ResourceGroup,
    VirtualMachine,
    AksCluster,
    File,
    Typed { abbreviation: &'static str },
    ScopedName,
}

/// One matched mention span in the raw input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MentionToken {
    pub kind: MentionKind,
    /// Literal text of the span, e.g. `@aks:prod`.
    pub literal: String,
    /// Captured identifier; empty for `@sub`.
    pub identifier: String,
    pub start: usize,
    pub end: usize,
}

impl MentionToken {
    pub fn span(&self) -> Range<usize> {
        self.start..self.end
    }
}

/// Pairs a grammar with the resolver that handles its matches.
#[derive(Clone)]
pub struct Grammar {
    kind: MentionKind,
    pattern: Regex,
    resolver: Arc<dyn MentionResolver>,
}

impl Grammar {
    pub fn new(
        kind: MentionKind,
        pattern: &str,
        resolver: Arc<dyn MentionResolver>,
    ) -> Result<Self, MentionError> {
        Ok(Self {
            kind,
            pattern: Regex::new(pattern)?,
            resolver,
        })
    }

    pub fn kind(&self) -> MentionKind {
        self.kind
    }

    pub(crate) fn resolver(&self) -> &Arc<dyn MentionResolver> {
        &self.resolver
    }
}

/// Scans `text` with each grammar in priority order.
///
/// Spans claimed by an earlier grammar are never re-matched. The returned
/// tokens are ordered by grammar priority, then by position, and each carries
/// the index of its grammar.
pub(crate) fn scan(grammars: &[Grammar], text: &str) -> Vec<(usize, MentionToken)> {
    let mut tokens: Vec<(usize, MentionToken)> = Vec::new();
    for (grammar_index, grammar) in grammars.iter().enumerate() {
        for captures in grammar.pattern.captures_iter(text) {
            let Some(whole) = captures.get(0) else {
                continue;
            };
            let span = whole.range();
            if tokens
                .iter()
                .any(|(_, claimed)| overlaps(&claimed.span(), &span))
            {
                continue;
            }
            let identifier = captures
                .get(1)
                .map(|capture| capture.as_str().to_string())
                .unwrap_or_default();
            if !grammar.resolver.claims(&identifier) {
                continue;
            }
            tokens.push((
                grammar_index,
                MentionToken {
                    kind: grammar.kind,
                    literal: whole.as_str().to_string(),
                    identifier,
                    start: span.start,
                    end: span.end,
                },
            ));
        }
    }
    tokens
}

fn overlaps(left: &Range<usize>, right: &Range<usize>) -> bool {
    left.start < right.end && right.start < left.end
}

/// Rebuilds `text` with each token span swapped for its label.
pub(crate) fn replace_spans(text: &str, replacements: &[(Range<usize>, &str)]) -> String {
    let mut ordered = replacements.to_vec();
    ordered.sort_by_key(|(span, _)| span.start);
    let mut output = String::with_capacity(text.len());
    let mut cursor = 0;
    for (span, label) in ordered {
        output.push_str(&text[cursor..span.start]);
        output.push_str(label);
        cursor = span.end;
    }
    output.push_str(&text[cursor..]);
    output
}

/// Collapses runs of two or more spaces into one and trims the result.
pub(crate) fn collapse_spaces(text: &str) -> String {
    let mut output = String::with_capacity(text.len());
    let mut previous_space = false;
    for ch in text.chars() {
        if ch == ' ' {
            if previous_space {
                continue;
            }
            previous_space = true;
        } else {
            previous_space = false;
        }
        output.push(ch);
    }
    output.trim().to_string()
}
