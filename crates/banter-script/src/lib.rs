//! The banter command language.
//!
//! A script is a `;`-separated list of statements. A statement is either
//! free-text (a prompt for the chat assistant) or a slash-command such as
//! `/repeat` or `/search_project`. Aliases use the `@` prefix: `@+ name text`
//! defines one, `@name` invokes it. `parse` turns script text into a
//! [`Script`] against an injected [`CommandRegistry`]; execution lives in
//! `banter-engine`.

pub mod ast;
pub mod error;
pub mod parser;
pub mod registry;
pub mod token;

pub use ast::{
    AliasCmd, Command, CommandStatement, PromptStatement, QueryCmd, Script, SearchCmd, Statement,
    StopCondition, StopKind,
};
pub use error::ParseError;
pub use parser::parse;
pub use registry::{CommandId, CommandRegistry, CommandSpec, OptionKind};
pub use token::tokenize;
