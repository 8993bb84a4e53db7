//! Parsed script model.

use serde::{Deserialize, Serialize};

/// An ordered, immutable sequence of statements produced by one `parse` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Script {
    pub statements: Vec<Statement>,
}

impl Script {
    pub fn len(&self) -> usize {
        self.statements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }
}

/// One parsed unit of a script: free text for the assistant, or a command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Statement {
    Prompt(PromptStatement),
    Command(CommandStatement),
}

/// Free-text prompt, possibly looped by the runner.
///
/// `max_tries` is only present when the statement came from `/repeat /max N`;
/// the runner supplies the default bound at execution time. Stop conditions
/// are attached by the parser's fold pass, never written directly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptStatement {
    pub text: String,
    #[serde(default)]
    pub stop_conditions: Vec<StopCondition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tries: Option<u32>,
}

impl PromptStatement {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            stop_conditions: Vec::new(),
            max_tries: None,
        }
    }
}

/// A resolved slash- or alias-command.
///
/// `name` is the display form the user can recognize in messages
/// (`/search_project`, `@greet`). Stop conditions folded onto a command are
/// carried along; only prompt-like commands consult them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandStatement {
    pub name: String,
    pub command: Command,
    #[serde(default)]
    pub stop_conditions: Vec<StopCondition>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Command {
    Search(SearchCmd),
    Query(QueryCmd),
    Artifacts,
    Alias(AliasCmd),
    Star,
    ListStarred,
    Help,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchCmd {
    pub search_text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryCmd {
    pub prompt: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AliasCmd {
    Define { name: String, text: String },
    Delete { name: String },
    List,
    Run { name: String },
}

/// Substring rule that ends a repeat loop early.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StopCondition {
    pub target: String,
    pub kind: StopKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopKind {
    If,
    IfNot,
}

impl StopCondition {
    /// Case-sensitive substring match against a response.
    pub fn satisfied_by(&self, response: &str) -> bool {
        match self.kind {
            StopKind::If => response.contains(&self.target),
            StopKind::IfNot => !response.contains(&self.target),
        }
    }
}
