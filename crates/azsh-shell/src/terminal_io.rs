//! Terminal input: line sources shared by the REPL loop and the interactive
//! approval and clarifying-question handlers.

use std::{
    io::Write,
    path::{Path, PathBuf},
    sync::{mpsc, Arc},
};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use azsh_agent::{
    AgentError, ApprovalHandler, ToolInvocation, UserInputHandler, UserInputRequest,
    UserInputResponse,
};
use azsh_cli::COMMAND_NAMES;
use azsh_scope::{ActiveScope, RESOURCE_TYPE_ALIASES};
use rustyline::{
    completion::{Completer, Pair},
    error::ReadlineError,
    highlight::Highlighter,
    hint::Hinter,
    history::DefaultHistory,
    validate::Validator,
    Config as ReadlineConfig, Context as ReadlineContext, Editor, Helper,
};
use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines, Stdin},
    sync::oneshot,
};
use tracing::warn;

pub(crate) const REPL_PROMPT: &str = "azsh> ";
pub(crate) const REPL_CONTINUATION_PROMPT: &str = "...> ";

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ReadOutcome {
    Line(String),
    Interrupted,
    Eof,
}

/// Trait contract for a prompt-and-read line source.
#[async_trait]
pub(crate) trait LineReader: Send + Sync {
    async fn read_line(&self, prompt: &str) -> Result<ReadOutcome>;

    fn record_history(&self, _entry: &str) {}
}

/// Line source over a buffered async reader, used when stdin is not a TTY.
pub(crate) struct PipedLineReader<R> {
    lines: tokio::sync::Mutex<Lines<R>>,
}

impl PipedLineReader<BufReader<Stdin>> {
    pub(crate) fn from_stdin() -> Self {
        Self::new(BufReader::new(tokio::io::stdin()))
    }
}

impl<R> PipedLineReader<R>
where
    R: AsyncBufRead + Unpin + Send,
{
    pub(crate) fn new(reader: R) -> Self {
        Self {
            lines: tokio::sync::Mutex::new(reader.lines()),
        }
    }
}

#[async_trait]
impl<R> LineReader for PipedLineReader<R>
where
    R: AsyncBufRead + Unpin + Send,
{
    async fn read_line(&self, prompt: &str) -> Result<ReadOutcome> {
        print!("{prompt}");
        std::io::stdout()
            .flush()
            .context("failed to flush stdout")?;
        let mut lines = self.lines.lock().await;
        match lines.next_line().await.context("failed to read stdin")? {
            Some(line) => Ok(ReadOutcome::Line(line)),
            None => Ok(ReadOutcome::Eof),
        }
    }
}

enum EditorRequest {
    ReadLine {
        prompt: String,
        reply: oneshot::Sender<Result<ReadOutcome>>,
    },
    AddHistory(String),
}

/// Line source backed by a rustyline editor with persistent history.
///
/// The editor lives on its own thread; reads are requested over a channel so
/// async callers never block a runtime worker.
pub(crate) struct EditorLineReader {
    requests: mpsc::Sender<EditorRequest>,
}

impl EditorLineReader {
    pub(crate) fn spawn(helper: ReplHelper, history_path: Option<PathBuf>) -> Result<Self> {
        let (requests, inbox) = mpsc::channel::<EditorRequest>();
        let (ready_tx, ready_rx) = mpsc::channel::<Result<(), String>>();
        std::thread::Builder::new()
            .name("azsh-editor".to_string())
            .spawn(move || {
                let mut editor = match build_repl_editor(helper) {
                    Ok(editor) => {
                        let _ = ready_tx.send(Ok(()));
                        editor
                    }
                    Err(error) => {
                        let _ = ready_tx.send(Err(format!("{error:#}")));
                        return;
                    }
                };
                if let Some(path) = &history_path {
                    load_repl_history(&mut editor, path);
                }
                while let Ok(request) = inbox.recv() {
                    match request {
                        EditorRequest::ReadLine { prompt, reply } => {
                            let outcome = map_readline(editor.readline(&prompt));
                            if let Err(Ok(ReadOutcome::Line(line))) = reply.send(outcome) {
                                warn!(
                                    prompt = %prompt.trim_end(),
                                    chars = line.chars().count(),
                                    "input arrived after its prompt was abandoned"
                                );
                            }
                        }
                        EditorRequest::AddHistory(entry) => {
                            if matches!(editor.add_history_entry(entry.as_str()), Ok(true)) {
                                if let Some(path) = &history_path {
                                    save_repl_history(&mut editor, path);
                                }
                            }
                        }
                    }
                }
            })
            .context("failed to start line editor thread")?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Self { requests }),
            Ok(Err(message)) => Err(anyhow!(message)),
            Err(_) => Err(anyhow!("line editor thread exited during startup")),
        }
    }
}

fn build_repl_editor(helper: ReplHelper) -> Result<Editor<ReplHelper, DefaultHistory>> {
    let config = ReadlineConfig::builder().auto_add_history(false).build();
    let mut editor = Editor::<ReplHelper, DefaultHistory>::with_config(config)
        .context("failed to initialize interactive editor")?;
    editor.set_helper(Some(helper));
    Ok(editor)
}

fn map_readline(readline: rustyline::Result<String>) -> Result<ReadOutcome> {
    match readline {
        Ok(line) => Ok(ReadOutcome::Line(line)),
        Err(ReadlineError::Interrupted) => Ok(ReadOutcome::Interrupted),
        Err(ReadlineError::Eof) => Ok(ReadOutcome::Eof),
        Err(error) => Err(anyhow!("failed to read interactive input: {error}")),
    }
}

#[async_trait]
impl LineReader for EditorLineReader {
    async fn read_line(&self, prompt: &str) -> Result<ReadOutcome> {
        let (reply, outcome) = oneshot::channel();
        self.requests
            .send(EditorRequest::ReadLine {
                prompt: prompt.to_string(),
                reply,
            })
            .map_err(|_| anyhow!("line editor thread is gone"))?;
        outcome
            .await
            .map_err(|_| anyhow!("line editor thread is gone"))?
    }

    fn record_history(&self, entry: &str) {
        if self
            .requests
            .send(EditorRequest::AddHistory(entry.to_string()))
            .is_err()
        {
            warn!("line editor thread is gone; history entry dropped");
        }
    }
}

fn load_repl_history(editor: &mut Editor<ReplHelper, DefaultHistory>, path: &Path) {
    if let Err(error) = editor.load_history(path) {
        if !matches!(
            error,
            ReadlineError::Io(ref io_error) if io_error.kind() == std::io::ErrorKind::NotFound
        ) {
            warn!(path = %path.display(), %error, "failed to load REPL history");
        }
    }
}

fn save_repl_history(editor: &mut Editor<ReplHelper, DefaultHistory>, path: &Path) {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            if let Err(error) = std::fs::create_dir_all(parent) {
                warn!(path = %parent.display(), %error, "failed to create REPL history directory");
                return;
            }
        }
    }
    if let Err(error) = editor.save_history(path) {
        warn!(path = %path.display(), %error, "failed to persist REPL history");
    }
}

#[derive(Debug, Default)]
pub(crate) struct ReplMultilineState {
    lines: Vec<String>,
}

impl ReplMultilineState {
    pub(crate) fn prompt(&self) -> &'static str {
        if self.lines.is_empty() {
            REPL_PROMPT
        } else {
            REPL_CONTINUATION_PROMPT
        }
    }

    /// Buffers a `\`-continued line; returns the joined input once complete.
    pub(crate) fn push_line(&mut self, line: String) -> Option<String> {
        if line.ends_with('\\') && !line.ends_with("\\\\") {
            let mut trimmed = line;
            trimmed.pop();
            self.lines.push(trimmed);
            return None;
        }
        self.lines.push(line);
        let input = self.lines.join("\n");
        self.lines.clear();
        Some(input)
    }

    pub(crate) fn has_pending(&self) -> bool {
        !self.lines.is_empty()
    }

    pub(crate) fn clear(&mut self) {
        self.lines.clear();
    }
}

/// Tab completion for slash commands, mention prefixes and scoped resources.
pub(crate) struct ReplHelper {
    commands: Vec<String>,
    mention_prefixes: Vec<String>,
    scope: ActiveScope,
}

impl ReplHelper {
    pub(crate) fn new(scope: ActiveScope) -> Self {
        let mut mention_prefixes = ["@sub", "@rg:", "@vm:", "@aks:", "@file:"]
            .into_iter()
            .map(str::to_string)
            .collect::<Vec<_>>();
        for alias in RESOURCE_TYPE_ALIASES {
            let prefix = format!("@{}:", alias.abbreviation);
            if !mention_prefixes.contains(&prefix) {
                mention_prefixes.push(prefix);
            }
        }
        Self {
            commands: COMMAND_NAMES.iter().map(|name| name.to_string()).collect(),
            mention_prefixes,
            scope,
        }
    }

    /// Returns `(replacement, display)` candidates for one token.
    pub(crate) fn complete_token(&self, token: &str, at_line_start: bool) -> Vec<(String, String)> {
        if token.starts_with('/') && at_line_start {
            return self
                .commands
                .iter()
                .filter(|candidate| candidate.starts_with(token))
                .map(|candidate| (candidate.clone(), candidate.clone()))
                .collect();
        }
        if !token.starts_with('@') {
            return Vec::new();
        }
        let mut candidates = self
            .mention_prefixes
            .iter()
            .filter(|prefix| prefix.starts_with(token))
            .map(|prefix| (prefix.clone(), prefix.clone()))
            .collect::<Vec<_>>();
        for (mention, description) in self.scope.completions() {
            if mention.starts_with(token) {
                let display = format!("{mention}  {description}");
                candidates.push((mention, display));
            }
        }
        candidates
    }
}

impl Helper for ReplHelper {}
impl Validator for ReplHelper {}
impl Highlighter for ReplHelper {}

impl Hinter for ReplHelper {
    type Hint = String;
}

impl Completer for ReplHelper {
    type Candidate = Pair;

    fn complete(
        &self,
        line: &str,
        pos: usize,
        _ctx: &ReadlineContext<'_>,
    ) -> rustyline::Result<(usize, Vec<Pair>)> {
        let safe_pos = pos.min(line.len());
        let start = line[..safe_pos]
            .rfind(char::is_whitespace)
            .map_or(0, |index| index + 1);
        let token = &line[start..safe_pos];
        let at_line_start = line[..start].trim().is_empty();
        let matches = self
            .complete_token(token, at_line_start)
            .into_iter()
            .map(|(replacement, display)| Pair {
                display,
                replacement,
            })
            .collect::<Vec<_>>();
        if matches.is_empty() {
            return Ok((safe_pos, matches));
        }
        Ok((start, matches))
    }
}

/// Approval handler that asks `[y/N]` on the terminal.
pub(crate) struct TerminalApproval {
    reader: Arc<dyn LineReader>,
}

impl TerminalApproval {
    pub(crate) fn new(reader: Arc<dyn LineReader>) -> Self {
        Self { reader }
    }
}

pub(crate) fn is_affirmative(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

#[async_trait]
impl ApprovalHandler for TerminalApproval {
    async fn confirm(&self, invocation: &ToolInvocation, reason: &str) -> bool {
        let command = invocation.string_argument("command").unwrap_or_default();
        println!("\n⚠ Destructive action: {reason}");
        if !command.is_empty() {
            println!("  {command}");
        }
        let approved = match self.reader.read_line("Proceed? [y/N] ").await {
            Ok(ReadOutcome::Line(answer)) => is_affirmative(&answer),
            Ok(ReadOutcome::Interrupted | ReadOutcome::Eof) => false,
            Err(error) => {
                warn!(%error, "approval prompt failed");
                false
            }
        };
        if !approved {
            println!("✗ Declined.");
        }
        approved
    }
}

/// User-input handler that prints the question and numbered choices.
pub(crate) struct TerminalUserInput {
    reader: Arc<dyn LineReader>,
}

impl TerminalUserInput {
    pub(crate) fn new(reader: Arc<dyn LineReader>) -> Self {
        Self { reader }
    }
}

/// Maps a numeric answer onto `choices`; anything else is freeform.
pub(crate) fn resolve_choice(answer: &str, choices: &[String]) -> UserInputResponse {
    let trimmed = answer.trim();
    let picked = trimmed
        .parse::<usize>()
        .ok()
        .and_then(|index| index.checked_sub(1))
        .and_then(|index| choices.get(index));
    match picked {
        Some(choice) => UserInputResponse {
            answer: choice.clone(),
            was_freeform: false,
        },
        None => UserInputResponse {
            answer: trimmed.to_string(),
            was_freeform: true,
        },
    }
}

#[async_trait]
impl UserInputHandler for TerminalUserInput {
    async fn request_input(
        &self,
        request: UserInputRequest,
    ) -> Result<UserInputResponse, AgentError> {
        println!("\n🤖 Agent asks: {}", request.question);
        for (index, choice) in request.choices.iter().enumerate() {
            println!("  {}. {choice}", index + 1);
        }
        match self.reader.read_line("> ").await {
            Ok(ReadOutcome::Line(answer)) => Ok(resolve_choice(&answer, &request.choices)),
            Ok(ReadOutcome::Interrupted | ReadOutcome::Eof) => {
                Err(AgentError::UserInput("no answer provided".to_string()))
            }
            Err(error) => Err(AgentError::UserInput(format!("{error:#}"))),
        }
    }
}
