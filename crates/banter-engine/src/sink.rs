//! Outbound notification traits. The engine reports progress through
//! these; frontends decide how to render it.

use crate::protocol::SearchResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Ready,
    Working,
    Error,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogKind {
    Info,
    Error,
}

/// Receives the session-level status line. Every run ends with exactly
/// one terminal update (`Ready`, `Error` or `Cancelled`).
pub trait StatusSink: Send + Sync {
    fn set_status(&self, status: SessionStatus, details: Option<&str>);
}

/// Receives user-facing log lines.
pub trait LogSink: Send + Sync {
    fn log(&self, kind: LogKind, message: &str);
}

/// Seed row announced before a batch starts.
#[derive(Debug, Clone, PartialEq)]
pub struct RowSeed {
    pub conversation_id: String,
    pub title: String,
}

/// Per-row lifecycle of a batch. Rows move from `Working` to exactly
/// one terminal state.
#[derive(Debug, Clone, PartialEq)]
pub enum RowUpdate {
    Working,
    Matched(SearchResult),
    NoMatch,
    Answered(String),
    Failed(String),
    Cancelled,
}

/// Receives batch progress, one update per row transition.
pub trait ResultSink: Send + Sync {
    fn begin(&self, rows: &[RowSeed]);
    fn update(&self, conversation_id: &str, update: RowUpdate);
}
