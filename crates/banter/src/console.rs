//! Console implementations of the engine's notification sinks.
//!
//! Status and errors go to stderr, results and logs to stdout, so
//! piped output stays clean.

use std::collections::HashMap;
use std::sync::Mutex;

use banter_engine::sink::{
    LogKind, LogSink, ResultSink, RowSeed, RowUpdate, SessionStatus, StatusSink,
};

pub struct ConsoleStatus;

impl StatusSink for ConsoleStatus {
    fn set_status(&self, status: SessionStatus, details: Option<&str>) {
        let label = match status {
            SessionStatus::Ready => "ready",
            SessionStatus::Working => "working",
            SessionStatus::Error => "error",
            SessionStatus::Cancelled => "cancelled",
        };
        match details {
            Some(details) => eprintln!("[{label}] {details}"),
            None => eprintln!("[{label}]"),
        }
    }
}

pub struct ConsoleLog;

impl LogSink for ConsoleLog {
    fn log(&self, kind: LogKind, message: &str) {
        match kind {
            LogKind::Info => println!("{message}"),
            LogKind::Error => eprintln!("Error: {message}"),
        }
    }
}

/// Prints batch rows as they settle, remembering the titles announced
/// in `begin` so updates can name the conversation.
pub struct ConsoleResults {
    titles: Mutex<HashMap<String, String>>,
}

impl ConsoleResults {
    pub fn new() -> Self {
        Self { titles: Mutex::new(HashMap::new()) }
    }

    fn title(&self, conversation_id: &str) -> String {
        self.titles
            .lock()
            .unwrap()
            .get(conversation_id)
            .cloned()
            .unwrap_or_else(|| conversation_id.to_string())
    }
}

impl Default for ConsoleResults {
    fn default() -> Self {
        Self::new()
    }
}

impl ResultSink for ConsoleResults {
    fn begin(&self, rows: &[RowSeed]) {
        let mut titles = self.titles.lock().unwrap();
        titles.clear();
        for row in rows {
            titles.insert(row.conversation_id.clone(), row.title.clone());
        }
        println!("Processing {} conversations...", rows.len());
    }

    fn update(&self, conversation_id: &str, update: RowUpdate) {
        let title = self.title(conversation_id);
        match update {
            RowUpdate::Working => {}
            RowUpdate::Matched(result) => {
                println!("  [match] {title}: {}", result.match_reason);
                println!("          \"{}\"", result.relevant_snippet);
            }
            RowUpdate::NoMatch => println!("  [ -- ]  {title}: no match"),
            RowUpdate::Answered(text) => {
                println!("  [done]  {title}:");
                for line in text.lines() {
                    println!("          {line}");
                }
            }
            RowUpdate::Failed(error) => println!("  [fail]  {title}: {error}"),
            RowUpdate::Cancelled => println!("  [stop]  {title}: cancelled"),
        }
    }
}
