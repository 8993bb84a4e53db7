//! Script parser: raw text to [`Script`].
//!
//! Statements are cut on unescaped `;` outside quotes. A trailing `/stop_if` or
//! `/stop_if_not` clause also starts a new pseudo-statement, which the fold
//! pass at the end attaches to the statement before it, so
//! `hello /stop_if done` is one prompt statement carrying one stop condition.

use std::collections::HashMap;

use lazy_static::lazy_static;
use regex::Regex;

use crate::ast::{
    AliasCmd, Command, CommandStatement, PromptStatement, QueryCmd, Script, SearchCmd, Statement,
    StopCondition, StopKind,
};
use crate::error::ParseError;
use crate::registry::{CommandId, CommandRegistry, CommandSpec, OptionKind};
use crate::token::tokenize;

lazy_static! {
    static ref ALIAS_NAME: Regex = Regex::new("^[a-zA-Z0-9_]+$").unwrap();
}

// Checked longest-first; the word must end at whitespace or end of input.
const STOP_WORDS: [&str; 2] = ["/stop_if_not", "/stop_if"];

/// Parse script text against a command registry.
///
/// Any error aborts the whole parse; a partial [`Script`] is never returned.
pub fn parse(text: &str, registry: &CommandRegistry) -> Result<Script, ParseError> {
    let mut items = Vec::new();
    for chunk in split_statements(text) {
        items.push(parse_chunk(&chunk, registry)?);
    }
    fold(items)
}

enum ParsedItem {
    Statement(Statement),
    Stop(StopCondition),
}

/// Cut raw text into statement chunks on unquoted, unescaped `;` and before
/// unquoted, whitespace-delimited stop-condition keywords. Outside quotes a
/// backslash escapes the next character, same as in the tokenizer, so `\;`
/// stays inside its chunk. Quote and escape characters are kept: chunks are
/// re-tokenized later.
fn split_statements(text: &str) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut in_quote: Option<char> = None;

    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if let Some(quote) = in_quote {
            if c == quote {
                in_quote = None;
            }
            current.push(c);
            i += 1;
            continue;
        }
        match c {
            '\\' if i + 1 < chars.len() => {
                current.push(c);
                current.push(chars[i + 1]);
                i += 2;
            }
            '"' | '\'' => {
                in_quote = Some(c);
                current.push(c);
                i += 1;
            }
            ';' => {
                push_chunk(&mut chunks, &mut current);
                i += 1;
            }
            '/' if at_chunk_boundary(&current) && stop_word_at(&chars, i).is_some() => {
                push_chunk(&mut chunks, &mut current);
                current.push(c);
                i += 1;
            }
            _ => {
                current.push(c);
                i += 1;
            }
        }
    }
    push_chunk(&mut chunks, &mut current);
    chunks
}

fn push_chunk(chunks: &mut Vec<String>, current: &mut String) {
    let trimmed = current.trim();
    if !trimmed.is_empty() {
        chunks.push(trimmed.to_string());
    }
    current.clear();
}

fn at_chunk_boundary(current: &str) -> bool {
    current.chars().last().map_or(true, char::is_whitespace)
}

fn stop_word_at(chars: &[char], i: usize) -> Option<&'static str> {
    STOP_WORDS.iter().copied().find(|word| {
        let end = i + word.chars().count();
        if end > chars.len() {
            return false;
        }
        chars[i..end].iter().copied().eq(word.chars())
            && (end == chars.len() || chars[end].is_whitespace())
    })
}

fn parse_chunk(chunk: &str, registry: &CommandRegistry) -> Result<ParsedItem, ParseError> {
    if chunk.starts_with('/') || chunk.starts_with('@') {
        parse_command_chunk(chunk, registry)
    } else {
        Ok(ParsedItem::Statement(Statement::Prompt(
            PromptStatement::new(chunk),
        )))
    }
}

fn parse_command_chunk(chunk: &str, registry: &CommandRegistry) -> Result<ParsedItem, ParseError> {
    let tokens = tokenize(chunk);
    let Some((raw, rest)) = tokens.split_first() else {
        // A chunk of bare quote characters tokenizes to nothing.
        return Err(ParseError::UnknownCommand {
            name: String::new(),
            hint: String::new(),
        });
    };

    if let Some(alias_raw) = raw.strip_prefix('@') {
        return parse_at_chunk(raw, alias_raw, rest);
    }

    let spec = registry.resolve(&raw[1..])?;
    let (options, prompt) = parse_option_tail(spec, rest)?;
    build_statement(spec, &options, prompt)
}

/// `@+`, `@-`, `@?` map to the alias commands; any other `@name` invokes a
/// stored alias. These mappings are fixed, not registry entries.
fn parse_at_chunk(raw: &str, alias_raw: &str, rest: &[String]) -> Result<ParsedItem, ParseError> {
    let prompt = rest.join(" ");
    let command = match alias_raw {
        "+" => parse_alias_define(&prompt)?,
        "-" => Command::Alias(AliasCmd::Delete {
            name: valid_alias_name(prompt.trim())?,
        }),
        "?" => {
            if !prompt.is_empty() {
                return Err(ParseError::InvalidAliasSyntax {
                    detail: format!("@? takes no arguments, got: {prompt}"),
                });
            }
            Command::Alias(AliasCmd::List)
        }
        name => Command::Alias(AliasCmd::Run {
            name: valid_alias_name(name)?,
        }),
    };
    Ok(ParsedItem::Statement(Statement::Command(
        CommandStatement {
            name: raw.to_string(),
            command,
            stop_conditions: Vec::new(),
        },
    )))
}

fn parse_alias_define(prompt: &str) -> Result<Command, ParseError> {
    let Some((name, text)) = prompt.split_once(' ') else {
        return Err(ParseError::InvalidAliasSyntax {
            detail: "expected a name followed by replacement text".into(),
        });
    };
    Ok(Command::Alias(AliasCmd::Define {
        name: valid_alias_name(name)?,
        text: text.to_string(),
    }))
}

fn valid_alias_name(name: &str) -> Result<String, ParseError> {
    if name.is_empty() {
        return Err(ParseError::InvalidAliasSyntax {
            detail: "missing alias name".into(),
        });
    }
    if !ALIAS_NAME.is_match(name) {
        return Err(ParseError::InvalidAliasName {
            name: name.to_string(),
        });
    }
    Ok(name.to_string())
}

/// Split a command's token tail into declared options and prompt tokens.
fn parse_option_tail(
    spec: &CommandSpec,
    tokens: &[String],
) -> Result<(HashMap<String, String>, String), ParseError> {
    let mut options = HashMap::new();
    let mut prompt_tokens: Vec<&str> = Vec::new();

    let mut i = 0;
    while i < tokens.len() {
        let Some(opt) = tokens[i].strip_prefix('/') else {
            prompt_tokens.push(&tokens[i]);
            i += 1;
            continue;
        };
        let (key, kind) = resolve_option(spec, opt)?;
        match kind {
            OptionKind::NoArg => {
                options.insert(key.to_string(), "true".to_string());
                i += 1;
            }
            OptionKind::WithArg => {
                let value = tokens.get(i + 1).ok_or(ParseError::MissingOptionValue {
                    option: key.to_string(),
                })?;
                options.insert(key.to_string(), value.clone());
                i += 2;
            }
            OptionKind::WithPrompt => {
                let mut j = i + 1;
                let mut parts: Vec<&str> = Vec::new();
                while j < tokens.len() && !tokens[j].starts_with('/') {
                    parts.push(&tokens[j]);
                    j += 1;
                }
                if parts.is_empty() {
                    return Err(ParseError::MissingOptionValue {
                        option: key.to_string(),
                    });
                }
                options.insert(key.to_string(), parts.join(" "));
                i = j;
            }
        }
    }
    Ok((options, prompt_tokens.join(" ")))
}

/// An option token matches a declared key when it equals the key or is a
/// non-empty prefix of it. Exact matches win over prefix matches.
fn resolve_option<'a>(
    spec: &'a CommandSpec,
    name: &str,
) -> Result<(&'a str, OptionKind), ParseError> {
    if let Some((key, kind)) = spec.options.iter().find(|(key, _)| *key == name) {
        return Ok((key, *kind));
    }
    let prefixed: Vec<&(&str, OptionKind)> = spec
        .options
        .iter()
        .filter(|(key, _)| !name.is_empty() && key.starts_with(name))
        .collect();
    match prefixed.len() {
        0 => Err(ParseError::UnknownOption {
            command: spec.full.to_string(),
            option: name.to_string(),
        }),
        1 => Ok((prefixed[0].0, prefixed[0].1)),
        _ => Err(ParseError::AmbiguousOption {
            command: spec.full.to_string(),
            option: name.to_string(),
            candidates: prefixed
                .iter()
                .map(|(key, _)| format!("/{key}"))
                .collect::<Vec<_>>()
                .join(", "),
        }),
    }
}

fn build_statement(
    spec: &CommandSpec,
    options: &HashMap<String, String>,
    prompt: String,
) -> Result<ParsedItem, ParseError> {
    let command = match spec.id {
        CommandId::Repeat => {
            let prompt = require_prompt(spec, prompt)?;
            let max_tries = options
                .get("max")
                .map(|value| parse_positive(value, "max"))
                .transpose()?;
            return Ok(ParsedItem::Statement(Statement::Prompt(PromptStatement {
                text: prompt,
                stop_conditions: Vec::new(),
                max_tries,
            })));
        }
        CommandId::StopIf => {
            return Ok(ParsedItem::Stop(StopCondition {
                target: require_prompt(spec, prompt)?,
                kind: StopKind::If,
            }));
        }
        CommandId::StopIfNot => {
            return Ok(ParsedItem::Stop(StopCondition {
                target: require_prompt(spec, prompt)?,
                kind: StopKind::IfNot,
            }));
        }
        CommandId::SearchProject => Command::Search(SearchCmd {
            search_text: require_prompt(spec, prompt)?,
        }),
        CommandId::QueryProject => Command::Query(QueryCmd {
            prompt: require_prompt(spec, prompt)?,
        }),
        CommandId::Artifacts => Command::Artifacts,
        CommandId::AliasDefine => parse_alias_define(&prompt)?,
        CommandId::AliasDelete => Command::Alias(AliasCmd::Delete {
            name: valid_alias_name(prompt.trim())?,
        }),
        CommandId::AliasList => Command::Alias(AliasCmd::List),
        CommandId::Star => Command::Star,
        CommandId::ListStarred => Command::ListStarred,
        CommandId::Help => Command::Help,
    };
    Ok(ParsedItem::Statement(Statement::Command(
        CommandStatement {
            name: format!("/{}", spec.full),
            command,
            stop_conditions: Vec::new(),
        },
    )))
}

fn require_prompt(spec: &CommandSpec, prompt: String) -> Result<String, ParseError> {
    if prompt.is_empty() {
        return Err(ParseError::MissingPrompt {
            command: spec.full.to_string(),
        });
    }
    Ok(prompt)
}

fn parse_positive(value: &str, option: &str) -> Result<u32, ParseError> {
    match value.parse::<u32>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(ParseError::InvalidNumber {
            option: option.to_string(),
            value: value.to_string(),
        }),
    }
}

/// Attach each pending stop condition to the statement built just before it.
fn fold(items: Vec<ParsedItem>) -> Result<Script, ParseError> {
    let mut statements: Vec<Statement> = Vec::new();
    for item in items {
        match item {
            ParsedItem::Statement(statement) => statements.push(statement),
            ParsedItem::Stop(condition) => {
                let Some(previous) = statements.last_mut() else {
                    return Err(ParseError::OrphanedStopCondition);
                };
                match previous {
                    Statement::Prompt(p) => p.stop_conditions.push(condition),
                    Statement::Command(c) => c.stop_conditions.push(condition),
                }
            }
        }
    }
    Ok(Script { statements })
}
