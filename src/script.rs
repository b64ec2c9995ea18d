//! Script resources and the tolerant script runner.

use crate::config::ScriptPolicy;
use crate::engine::ResultSet;
use crate::error::{HarnessError, Result};
use crate::events::{EventSink, HarnessEvent};
use crate::executor::{self, ExecutionOutcome};
use crate::session::Session;
use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

pub const STATEMENT_TERMINATOR: char = ';';

/// An ordered, immutable list of statements parsed from a text resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Script {
    name: String,
    statements: Vec<String>,
}

impl Script {
    pub fn parse(name: impl Into<String>, text: &str) -> Self {
        Self {
            name: name.into(),
            statements: split_statements(text),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn statements(&self) -> &[String] {
        &self.statements
    }

    pub fn len(&self) -> usize {
        self.statements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }
}

#[derive(Clone, PartialEq, Eq)]
enum Lexical {
    Code,
    SingleQuoted,
    DoubleQuoted,
    /// Inside a dollar-quoted body; holds the opening delimiter (`$$` or `$tag$`).
    DollarQuoted(Vec<char>),
    /// Inside `/* */`, with the current nesting depth. Dropped from the text.
    BlockComment(usize),
    /// A `--` comment that follows code on the same line; kept verbatim.
    TrailingComment,
    /// A `--` comment occupying a whole line; dropped.
    LineComment,
}

/// Splits `text` on the statement terminator.
///
/// Terminators inside quotes, dollar-quoted bodies (`$$` or `$tag$`) and
/// comments do not split. Whole-line `--` comments and `/* */` comments are
/// removed, fragments are trimmed and empty fragments dropped. Order is
/// preserved.
pub fn split_statements(text: &str) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut line_start = 0;
    let mut state = Lexical::Code;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();
        match &state {
            Lexical::Code => match c {
                STATEMENT_TERMINATOR => {
                    push_fragment(&mut statements, &current);
                    current.clear();
                    line_start = 0;
                    i += 1;
                    continue;
                }
                '\'' => state = Lexical::SingleQuoted,
                '"' => state = Lexical::DoubleQuoted,
                '$' => {
                    let after_word = i > 0 && is_word_char(chars[i - 1]);
                    if let Some(tag) = dollar_tag(&chars[i..]).filter(|_| !after_word) {
                        current.extend(tag.iter());
                        i += tag.len();
                        state = Lexical::DollarQuoted(tag);
                        continue;
                    }
                }
                '/' if next == Some('*') => {
                    state = Lexical::BlockComment(1);
                    i += 2;
                    continue;
                }
                '-' if next == Some('-') => {
                    if current[line_start..].trim().is_empty() {
                        current.truncate(line_start);
                        state = Lexical::LineComment;
                        i += 1;
                        continue;
                    }
                    state = Lexical::TrailingComment;
                }
                _ => {}
            },
            Lexical::SingleQuoted if c == '\'' => state = Lexical::Code,
            Lexical::DoubleQuoted if c == '"' => state = Lexical::Code,
            Lexical::DollarQuoted(tag) if chars[i..].starts_with(tag) => {
                let len = tag.len();
                current.extend(&chars[i..i + len]);
                i += len;
                state = Lexical::Code;
                continue;
            }
            Lexical::BlockComment(depth) => {
                let depth = *depth;
                if c == '*' && next == Some('/') {
                    if depth == 1 {
                        // Keeps `a/*x*/b` from gluing into one token.
                        current.push(' ');
                        state = Lexical::Code;
                    } else {
                        state = Lexical::BlockComment(depth - 1);
                    }
                    i += 2;
                } else if c == '/' && next == Some('*') {
                    state = Lexical::BlockComment(depth + 1);
                    i += 2;
                } else {
                    i += 1;
                }
                continue;
            }
            Lexical::LineComment => {
                if c == '\n' {
                    state = Lexical::Code;
                    line_start = current.len();
                }
                i += 1;
                continue;
            }
            Lexical::TrailingComment if c == '\n' => state = Lexical::Code,
            _ => {}
        }
        current.push(c);
        if c == '\n' && state == Lexical::Code {
            line_start = current.len();
        }
        i += 1;
    }
    push_fragment(&mut statements, &current);
    statements
}

/// Opening dollar-quote delimiter at the start of `rest`: `$$` or
/// `$tag$` where the tag is an identifier not starting with a digit.
fn dollar_tag(rest: &[char]) -> Option<Vec<char>> {
    let first = *rest.get(1)?;
    if first == '$' {
        return Some(rest[..2].to_vec());
    }
    if !(first.is_alphabetic() || first == '_') {
        return None;
    }
    let end = rest[1..].iter().position(|c| !is_word_char(*c))? + 1;
    if rest[end] == '$' {
        Some(rest[..=end].to_vec())
    } else {
        None
    }
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

fn push_fragment(statements: &mut Vec<String>, fragment: &str) {
    let trimmed = fragment.trim();
    if !trimmed.is_empty() {
        statements.push(trimmed.to_string());
    }
}

/// Locates script resources by logical name.
pub trait ScriptSource: Send + Sync {
    /// Loads and parses `name`, or fails with `ResourceNotFound`.
    fn load(&self, name: &str) -> Result<Script>;
}

/// Resolves `<dir>/<name>.sql`. A name that already ends in `.sql` is used as is.
#[derive(Debug, Clone)]
pub struct DirScriptSource {
    dir: PathBuf,
}

impl DirScriptSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, name: &str) -> PathBuf {
        if name.ends_with(".sql") {
            self.dir.join(name)
        } else {
            self.dir.join(format!("{}.sql", name))
        }
    }
}

impl ScriptSource for DirScriptSource {
    fn load(&self, name: &str) -> Result<Script> {
        let path = self.path_for(name);
        let text = std::fs::read_to_string(&path).map_err(|_| HarnessError::ResourceNotFound {
            name: name.to_string(),
            location: path.display().to_string(),
        })?;
        Ok(Script::parse(name, &text))
    }
}

/// In-memory scripts keyed by logical name.
#[derive(Debug, Clone, Default)]
pub struct MemoryScriptSource {
    scripts: HashMap<String, String>,
}

impl MemoryScriptSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, text: &str) -> Self {
        self.insert(name, text);
        self
    }

    pub fn insert(&mut self, name: &str, text: &str) {
        self.scripts.insert(name.to_string(), text.to_string());
    }
}

impl ScriptSource for MemoryScriptSource {
    fn load(&self, name: &str) -> Result<Script> {
        self.scripts
            .get(name)
            .map(|text| Script::parse(name, text))
            .ok_or_else(|| HarnessError::ResourceNotFound {
                name: name.to_string(),
                location: "memory".to_string(),
            })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatementFailure {
    /// 0-based position in the script.
    pub index: usize,
    pub statement: String,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatementRows {
    pub index: usize,
    pub rows: ResultSet,
}

/// Aggregate result of one script run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScriptOutcome {
    pub script: String,
    pub executed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub failures: Vec<StatementFailure>,
    pub row_sets: Vec<StatementRows>,
}

impl ScriptOutcome {
    fn new(script: &str) -> Self {
        Self {
            script: script.to_string(),
            executed: 0,
            succeeded: 0,
            failed: 0,
            failures: Vec::new(),
            row_sets: Vec::new(),
        }
    }

    /// A script "worked" when at least one statement went through, whatever
    /// happened to the others.
    pub fn is_acceptable(&self) -> bool {
        self.succeeded > 0
    }

    pub fn satisfies(&self, policy: ScriptPolicy) -> bool {
        match policy {
            ScriptPolicy::BestEffort => self.is_acceptable(),
            ScriptPolicy::Strict => self.is_acceptable() && self.failed == 0,
        }
    }

    /// Rows of the last read-like statement, if any.
    pub fn last_rows(&self) -> Option<&ResultSet> {
        self.row_sets.last().map(|r| &r.rows)
    }
}

/// Feeds a script's statements to the executor, in order, never stopping
/// at a failed statement.
#[derive(Clone)]
pub struct ScriptRunner {
    events: Arc<dyn EventSink>,
}

impl ScriptRunner {
    pub fn new(events: Arc<dyn EventSink>) -> Self {
        Self { events }
    }

    /// # Returns
    ///
    /// * `Result<ScriptOutcome>` - Counts and failure details. Only
    ///   `NoActiveSession` is returned as an error.
    pub async fn run(&self, session: &mut Session, script: &Script) -> Result<ScriptOutcome> {
        let total = script.len();
        let mut outcome = ScriptOutcome::new(script.name());

        for (index, statement) in script.statements().iter().enumerate() {
            let result = executor::execute(session, statement).await?;
            outcome.executed += 1;
            match result {
                ExecutionOutcome::Failed(error) => {
                    outcome.failed += 1;
                    self.events.emit(HarnessEvent::StatementFailed {
                        script: script.name().to_string(),
                        index,
                        total,
                        error: error.clone(),
                    });
                    outcome.failures.push(StatementFailure {
                        index,
                        statement: statement.clone(),
                        error,
                    });
                }
                success => {
                    outcome.succeeded += 1;
                    self.events.emit(HarnessEvent::StatementSucceeded {
                        script: script.name().to_string(),
                        index,
                        total,
                    });
                    if let ExecutionOutcome::Rows(rows) = success {
                        outcome.row_sets.push(StatementRows { index, rows });
                    }
                }
            }
        }

        self.events.emit(HarnessEvent::ScriptFinished {
            script: script.name().to_string(),
            succeeded: outcome.succeeded,
            failed: outcome.failed,
        });
        Ok(outcome)
    }

    /// Loads `name` from `source` and runs it. A missing resource fails
    /// before anything is executed.
    pub async fn run_named(
        &self,
        session: &mut Session,
        source: &dyn ScriptSource,
        name: &str,
    ) -> Result<ScriptOutcome> {
        let script = source.load(name)?;
        self.run(session, &script).await
    }
}
