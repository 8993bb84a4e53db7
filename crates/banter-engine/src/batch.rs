//! Sequential batch work over project conversations: LLM-classified
//! search and bulk querying. One batch runs at a time per pipeline;
//! rows are processed strictly in order and report progress through
//! the result sink.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tracing::{debug, info};

use crate::completion::{CompletionClient, CompletionError, CompletionRequest};
use crate::format::conversation_digest;
use crate::protocol::{ConversationSummary, SearchResult};
use crate::retrieval::ConversationClient;
use crate::session::{CancelToken, Cancelled};
use crate::sink::{LogKind, LogSink, ResultSink, RowSeed, RowUpdate};

#[derive(Debug, Error)]
pub enum BatchError {
    #[error("a batch is already running")]
    AlreadyRunning,
}

/// How a batch run ended, for summary logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchOutcome {
    pub rows: usize,
    /// Rows that reached a terminal state other than cancelled.
    pub completed: usize,
    pub failed: usize,
    pub cancelled: bool,
}

struct ActiveBatch {
    token: CancelToken,
    rows: Vec<String>,
    processed: Arc<Mutex<HashSet<String>>>,
}

/// Watches both the caller's token and the batch's own abort token.
struct BatchSignal {
    outer: CancelToken,
    inner: CancelToken,
}

impl BatchSignal {
    fn is_cancelled(&self) -> bool {
        self.outer.is_cancelled() || self.inner.is_cancelled()
    }

    fn ensure_active(&self) -> Result<(), Cancelled> {
        if self.is_cancelled() { Err(Cancelled) } else { Ok(()) }
    }
}

/// Clears the pipeline's current-batch slot when a run exits, on every
/// path out.
struct CurrentGuard<'a> {
    pipeline: &'a BatchPipeline,
}

impl Drop for CurrentGuard<'_> {
    fn drop(&mut self) {
        *self.pipeline.current.lock().unwrap() = None;
    }
}

pub struct BatchPipeline {
    conversations: Arc<dyn ConversationClient>,
    completion: Arc<dyn CompletionClient>,
    results: Arc<dyn ResultSink>,
    log: Arc<dyn LogSink>,
    current: Mutex<Option<ActiveBatch>>,
}

impl BatchPipeline {
    pub fn new(
        conversations: Arc<dyn ConversationClient>,
        completion: Arc<dyn CompletionClient>,
        results: Arc<dyn ResultSink>,
        log: Arc<dyn LogSink>,
    ) -> Self {
        Self { conversations, completion, results, log, current: Mutex::new(None) }
    }

    /// Abort the batch in flight, if any. Rows not yet processed are
    /// marked cancelled right away; the run loop bails at its next
    /// signal check. Completed rows keep their results.
    pub fn abort(&self) {
        let current = self.current.lock().unwrap();
        let Some(batch) = current.as_ref() else { return };
        batch.token.cancel();
        let mut processed = batch.processed.lock().unwrap();
        for id in &batch.rows {
            if processed.insert(id.clone()) {
                self.results.update(id, RowUpdate::Cancelled);
            }
        }
    }

    fn begin(
        &self,
        rows: &[ConversationSummary],
        cancel: &CancelToken,
    ) -> Result<(BatchSignal, Arc<Mutex<HashSet<String>>>, CurrentGuard<'_>), BatchError> {
        let mut current = self.current.lock().unwrap();
        if current.is_some() {
            return Err(BatchError::AlreadyRunning);
        }
        let inner = CancelToken::new();
        let processed = Arc::new(Mutex::new(HashSet::new()));
        *current = Some(ActiveBatch {
            token: inner.clone(),
            rows: rows.iter().map(|row| row.id.clone()).collect(),
            processed: processed.clone(),
        });
        drop(current);

        let seeds: Vec<RowSeed> = rows
            .iter()
            .map(|row| RowSeed { conversation_id: row.id.clone(), title: row.name.clone() })
            .collect();
        self.results.begin(&seeds);

        let signal = BatchSignal { outer: cancel.clone(), inner };
        Ok((signal, processed, CurrentGuard { pipeline: self }))
    }

    fn cancel_remaining(
        &self,
        rows: &[ConversationSummary],
        processed: &Mutex<HashSet<String>>,
    ) {
        let mut processed = processed.lock().unwrap();
        for row in rows {
            if processed.insert(row.id.clone()) {
                self.results.update(&row.id, RowUpdate::Cancelled);
            }
        }
    }

    /// Classify every conversation against `search_text`, one at a
    /// time. Per-row failures mark that row and move on; only
    /// cancellation stops the sweep.
    pub async fn search(
        &self,
        organization_id: &str,
        rows: &[ConversationSummary],
        search_text: &str,
        cancel: &CancelToken,
    ) -> Result<BatchOutcome, BatchError> {
        let (signal, processed, _guard) = self.begin(rows, cancel)?;
        info!(rows = rows.len(), "starting conversation search");

        let mut outcome =
            BatchOutcome { rows: rows.len(), completed: 0, failed: 0, cancelled: false };
        let mut matched = 0usize;
        for row in rows {
            if signal.is_cancelled() {
                outcome.cancelled = true;
                self.cancel_remaining(rows, &processed);
                break;
            }
            self.results.update(&row.id, RowUpdate::Working);
            match self.classify_row(organization_id, row, search_text, &signal).await {
                Ok(update) => {
                    match &update {
                        RowUpdate::Matched(_) => matched += 1,
                        RowUpdate::Failed(_) => outcome.failed += 1,
                        _ => {}
                    }
                    self.results.update(&row.id, update);
                    outcome.completed += 1;
                    processed.lock().unwrap().insert(row.id.clone());
                }
                Err(Cancelled) => {
                    outcome.cancelled = true;
                    self.cancel_remaining(rows, &processed);
                    break;
                }
            }
        }

        if outcome.cancelled {
            self.log.log(
                LogKind::Info,
                &format!("Search aborted after {} of {} conversations", outcome.completed, outcome.rows),
            );
        } else {
            self.log.log(
                LogKind::Info,
                &format!(
                    "Search finished: {matched} matched, {} errors across {} conversations",
                    outcome.failed, outcome.rows
                ),
            );
        }
        Ok(outcome)
    }

    async fn classify_row(
        &self,
        organization_id: &str,
        row: &ConversationSummary,
        search_text: &str,
        signal: &BatchSignal,
    ) -> Result<RowUpdate, Cancelled> {
        signal.ensure_active()?;
        let conversation = match self.conversations.conversation(organization_id, &row.id).await {
            Ok(conversation) => conversation,
            Err(e) => return Ok(RowUpdate::Failed(format!("Error retrieving conversation: {e}"))),
        };
        signal.ensure_active()?;

        let prompt = build_search_prompt(&conversation_digest(&conversation), search_text);
        let reply = match self.completion.complete(CompletionRequest::user(prompt), &signal.inner).await
        {
            Ok(reply) => reply,
            Err(CompletionError::Cancelled) => return Err(Cancelled),
            Err(e) => return Ok(RowUpdate::Failed(format!("Error running search: {e}"))),
        };
        signal.ensure_active()?;

        debug!(conversation = %row.id, "parsing search verdict");
        match parse_verdict(&reply) {
            Ok(None) => Ok(RowUpdate::NoMatch),
            Ok(Some(verdict)) => Ok(RowUpdate::Matched(SearchResult {
                conversation_id: row.id.clone(),
                message_id: verdict.message_id.unwrap_or_default(),
                match_reason: verdict.match_reason.unwrap_or_default(),
                relevant_snippet: verdict.relevant_snippet.unwrap_or_default(),
            })),
            Err(e) => Ok(RowUpdate::Failed(format!("Could not parse search verdict: {e}"))),
        }
    }

    /// Submit one prompt to every conversation and record the raw
    /// reply per row. No verdict step; otherwise mirrors `search`.
    pub async fn query_all(
        &self,
        rows: &[ConversationSummary],
        prompt: &str,
        cancel: &CancelToken,
    ) -> Result<BatchOutcome, BatchError> {
        let (signal, processed, _guard) = self.begin(rows, cancel)?;
        info!(rows = rows.len(), "starting bulk query");

        let mut outcome =
            BatchOutcome { rows: rows.len(), completed: 0, failed: 0, cancelled: false };
        for row in rows {
            if signal.is_cancelled() {
                outcome.cancelled = true;
                self.cancel_remaining(rows, &processed);
                break;
            }
            self.results.update(&row.id, RowUpdate::Working);
            match self.query_row(row, prompt, &signal).await {
                Ok(update) => {
                    if matches!(update, RowUpdate::Failed(_)) {
                        outcome.failed += 1;
                    }
                    self.results.update(&row.id, update);
                    outcome.completed += 1;
                    processed.lock().unwrap().insert(row.id.clone());
                }
                Err(Cancelled) => {
                    outcome.cancelled = true;
                    self.cancel_remaining(rows, &processed);
                    break;
                }
            }
        }

        if outcome.cancelled {
            self.log.log(
                LogKind::Info,
                &format!("Query aborted after {} of {} conversations", outcome.completed, outcome.rows),
            );
        } else {
            self.log.log(
                LogKind::Info,
                &format!(
                    "Query finished: {} of {} conversations answered",
                    outcome.completed - outcome.failed,
                    outcome.rows
                ),
            );
        }
        Ok(outcome)
    }

    async fn query_row(
        &self,
        row: &ConversationSummary,
        prompt: &str,
        signal: &BatchSignal,
    ) -> Result<RowUpdate, Cancelled> {
        signal.ensure_active()?;
        let request = CompletionRequest::in_conversation(row.id.clone(), prompt);
        let update = match self.completion.complete(request, &signal.inner).await {
            Ok(reply) => RowUpdate::Answered(reply),
            Err(CompletionError::Cancelled) => return Err(Cancelled),
            Err(e) => RowUpdate::Failed(format!("Error querying conversation: {e}")),
        };
        signal.ensure_active()?;
        Ok(update)
    }
}

fn build_search_prompt(digest: &serde_json::Value, search_text: &str) -> String {
    format!(
        "You are scanning one conversation from a chat archive.\n\
         Conversation JSON:\n{digest}\n\n\
         Find content matching this search: \"{search_text}\"\n\n\
         Reply with ONLY a JSON object of the shape\n\
         {{\"message_id\": \"...\", \"match_reason\": \"...\", \"relevant_snippet\": \"...\"}}\n\
         for the single best matching message, or null if nothing matches."
    )
}

#[derive(Debug, serde::Deserialize)]
struct Verdict {
    #[serde(default)]
    message_id: Option<String>,
    #[serde(default)]
    match_reason: Option<String>,
    #[serde(default)]
    relevant_snippet: Option<String>,
}

impl Verdict {
    fn is_empty(&self) -> bool {
        self.message_id.is_none() && self.match_reason.is_none() && self.relevant_snippet.is_none()
    }
}

/// Decode a classifier reply. Accepts a bare JSON object, `null`, and
/// either wrapped in a Markdown code fence; an all-null object reads
/// as no match.
fn parse_verdict(reply: &str) -> Result<Option<Verdict>, serde_json::Error> {
    let cleaned = strip_code_fence(reply);
    if cleaned == "null" {
        return Ok(None);
    }
    let object = match (cleaned.find('{'), cleaned.rfind('}')) {
        (Some(start), Some(end)) if start < end => &cleaned[start..=end],
        _ => cleaned,
    };
    let verdict: Verdict = serde_json::from_str(object)?;
    if verdict.is_empty() { Ok(None) } else { Ok(Some(verdict)) }
}

fn strip_code_fence(reply: &str) -> &str {
    let trimmed = reply.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = rest.split_once('\n').map_or(rest, |(_, body)| body);
    match body.trim_end().strip_suffix("```") {
        Some(inner) => inner.trim(),
        None => body.trim(),
    }
}
