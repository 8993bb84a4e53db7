//! Command registry: the immutable table of known commands.
//!
//! Built once at startup and injected wherever parsing happens; never an
//! ambient static, so tests can parse against a registry of their own.

use crate::error::ParseError;

/// How a command option consumes tokens after its `/name` token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionKind {
    /// Bare flag, value recorded as `"true"`.
    NoArg,
    /// Consumes exactly the next token.
    WithArg,
    /// Consumes every token up to the next `/`-token or end of input.
    WithPrompt,
}

/// Stable identity linking a registry entry to its parse and execute steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandId {
    Repeat,
    StopIf,
    StopIfNot,
    SearchProject,
    QueryProject,
    Artifacts,
    AliasDefine,
    AliasDelete,
    AliasList,
    Star,
    ListStarred,
    Help,
}

#[derive(Debug, Clone)]
pub struct CommandSpec {
    pub id: CommandId,
    pub full: &'static str,
    pub abbreviation: &'static str,
    pub options: &'static [(&'static str, OptionKind)],
    pub summary: &'static str,
}

#[derive(Debug, Clone)]
pub struct CommandRegistry {
    specs: Vec<CommandSpec>,
}

impl CommandRegistry {
    pub fn new(specs: Vec<CommandSpec>) -> Self {
        Self { specs }
    }

    /// The built-in command table.
    pub fn standard() -> Self {
        use CommandId::*;
        use OptionKind::*;
        Self::new(vec![
            CommandSpec {
                id: Repeat,
                full: "repeat",
                abbreviation: "r",
                options: &[("max", WithArg)],
                summary: "repeat a prompt until a stop condition matches",
            },
            CommandSpec {
                id: StopIf,
                full: "stop_if",
                abbreviation: "si",
                options: &[],
                summary: "stop the previous statement once the response contains the text",
            },
            CommandSpec {
                id: StopIfNot,
                full: "stop_if_not",
                abbreviation: "sin",
                options: &[],
                summary: "stop the previous statement once the response lacks the text",
            },
            CommandSpec {
                id: SearchProject,
                full: "search_project",
                abbreviation: "sp",
                options: &[],
                summary: "search every conversation in the project for the text",
            },
            CommandSpec {
                id: QueryProject,
                full: "query_project",
                abbreviation: "qp",
                options: &[],
                summary: "submit one prompt to every conversation in the project",
            },
            CommandSpec {
                id: Artifacts,
                full: "artifacts",
                abbreviation: "ar",
                options: &[],
                summary: "list artifacts embedded in the current conversation",
            },
            CommandSpec {
                id: AliasDefine,
                full: "alias",
                abbreviation: "a",
                options: &[],
                summary: "define an alias: @+ name replacement text",
            },
            CommandSpec {
                id: AliasDelete,
                full: "delete_alias",
                abbreviation: "da",
                options: &[],
                summary: "delete an alias: @- name",
            },
            CommandSpec {
                id: AliasList,
                full: "list_alias",
                abbreviation: "la",
                options: &[],
                summary: "list stored aliases",
            },
            CommandSpec {
                id: Star,
                full: "star",
                abbreviation: "st",
                options: &[],
                summary: "star the latest assistant message",
            },
            CommandSpec {
                id: ListStarred,
                full: "list_starred",
                abbreviation: "lst",
                options: &[],
                summary: "list starred messages",
            },
            CommandSpec {
                id: Help,
                full: "help",
                abbreviation: "h",
                options: &[],
                summary: "show this command table",
            },
        ])
    }

    pub fn specs(&self) -> &[CommandSpec] {
        &self.specs
    }

    pub fn find(&self, id: CommandId) -> Option<&CommandSpec> {
        self.specs.iter().find(|s| s.id == id)
    }

    /// Resolve a raw command name (without its `/` prefix) case-insensitively
    /// against full names and abbreviations.
    pub fn resolve(&self, raw: &str) -> Result<&CommandSpec, ParseError> {
        let lowered = raw.to_lowercase();
        let matches: Vec<&CommandSpec> = self
            .specs
            .iter()
            .filter(|s| s.full == lowered || s.abbreviation == lowered)
            .collect();
        match matches.len() {
            0 => Err(ParseError::UnknownCommand {
                name: raw.to_string(),
                hint: self
                    .suggest(&lowered)
                    .map(|s| format!(" (did you mean /{s}?)"))
                    .unwrap_or_default(),
            }),
            1 => Ok(matches[0]),
            _ => Err(ParseError::AmbiguousCommand {
                name: raw.to_string(),
                candidates: matches
                    .iter()
                    .map(|s| format!("/{}", s.full))
                    .collect::<Vec<_>>()
                    .join(", "),
            }),
        }
    }

    fn suggest(&self, name: &str) -> Option<&'static str> {
        self.specs
            .iter()
            .map(|s| (s.full, strsim::jaro_winkler(name, s.full)))
            .filter(|(_, score)| *score > 0.84)
            .max_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(full, _)| full)
    }
}

impl Default for CommandRegistry {
    fn default() -> Self {
        Self::standard()
    }
}
