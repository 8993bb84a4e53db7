use thiserror::Error;

/// Everything `parse` can reject. All variants are raised synchronously;
/// a script with any error in it never executes, even partially.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("Unknown command: /{name}{hint}")]
    UnknownCommand { name: String, hint: String },

    #[error("Ambiguous command /{name}: matches {candidates}")]
    AmbiguousCommand { name: String, candidates: String },

    #[error("Unknown option /{option} for /{command}")]
    UnknownOption { command: String, option: String },

    #[error("Ambiguous option /{option} for /{command}: matches {candidates}")]
    AmbiguousOption {
        command: String,
        option: String,
        candidates: String,
    },

    #[error("Missing value for option /{option}")]
    MissingOptionValue { option: String },

    #[error("Invalid /{option} value: {value}")]
    InvalidNumber { option: String, value: String },

    #[error("Command /{command} requires a prompt")]
    MissingPrompt { command: String },

    #[error("Invalid alias name: {name}")]
    InvalidAliasName { name: String },

    #[error("Invalid alias syntax: {detail}")]
    InvalidAliasSyntax { detail: String },

    #[error("Stop condition has no preceding statement to attach to")]
    OrphanedStopCondition,
}
