//! Prompt execution over the hosted page.
//!
//! One prompt run walks a fixed path: record the message count, submit,
//! poll until a new message appears, poll until streaming stops, read
//! the final text. When the service is at its message limit the run
//! falls back to a programmatic completion request, retrying on a slow
//! cadence until the limit lifts.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::time::{Instant, sleep};
use tracing::{debug, warn};

use banter_script::{PromptStatement, StopCondition};

use crate::completion::{CompletionClient, CompletionError, CompletionRequest};
use crate::page::{PageError, PromptSubmitter, ResponseObserver};
use crate::session::{CancelToken, Cancelled};
use crate::sink::{LogKind, LogSink};

/// Attempt cap for prompt loops that do not set one with `/max`.
pub const DEFAULT_MAX_TRIES: u32 = 15;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("message limit reached")]
    MessageLimit,
    #[error("cancelled")]
    Cancelled,
    #[error("no response streaming detected after submit")]
    StreamNotDetected,
    #[error("timed out waiting for the response to finish")]
    ResponseTimeout,
    #[error(transparent)]
    Page(#[from] PageError),
    #[error(transparent)]
    Completion(CompletionError),
}

impl From<Cancelled> for EngineError {
    fn from(_: Cancelled) -> Self {
        EngineError::Cancelled
    }
}

/// Poll cadences and deadlines for one prompt run. Tests swap these
/// for near-zero values.
#[derive(Debug, Clone)]
pub struct EngineTiming {
    /// Cadence of the new-message poll after submit.
    pub stream_start_poll: Duration,
    /// How many new-message polls to run before giving up.
    pub stream_start_max_polls: u32,
    /// Cadence of the still-streaming poll.
    pub stream_poll: Duration,
    /// Wall-clock budget for a response to finish streaming.
    pub stream_timeout: Duration,
    /// Pause between completion retries while the limit persists.
    pub limit_retry: Duration,
}

impl Default for EngineTiming {
    fn default() -> Self {
        Self {
            stream_start_poll: Duration::from_millis(500),
            stream_start_max_polls: 60,
            stream_poll: Duration::from_millis(300),
            stream_timeout: Duration::from_secs(120),
            limit_retry: Duration::from_secs(60),
        }
    }
}

/// What a prompt run with stop conditions concluded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// A stop condition matched the response.
    Stopped,
    /// Conditions were checked and none matched.
    NotStopped,
    /// The statement carries no stop conditions.
    NotApplicable,
}

/// How a whole prompt loop ended.
#[derive(Debug)]
pub enum LoopOutcome {
    /// A stop condition matched before the attempts ran out.
    Stopped,
    /// Attempts ran out, or the statement had no stop conditions.
    NotStopped,
    /// An attempt failed; the loop does not continue past a failure.
    Failed(EngineError),
}

pub struct PromptEngine {
    observer: Arc<dyn ResponseObserver>,
    submitter: Arc<dyn PromptSubmitter>,
    completion: Arc<dyn CompletionClient>,
    log: Arc<dyn LogSink>,
    timing: EngineTiming,
}

impl PromptEngine {
    pub fn new(
        observer: Arc<dyn ResponseObserver>,
        submitter: Arc<dyn PromptSubmitter>,
        completion: Arc<dyn CompletionClient>,
        log: Arc<dyn LogSink>,
    ) -> Self {
        Self { observer, submitter, completion, log, timing: EngineTiming::default() }
    }

    pub fn with_timing(mut self, timing: EngineTiming) -> Self {
        self.timing = timing;
        self
    }

    /// Submit one prompt and wait for the complete response text.
    pub async fn run_prompt(
        &self,
        prompt: &str,
        cancel: &CancelToken,
    ) -> Result<String, EngineError> {
        cancel.ensure_active()?;
        match self.run_page_prompt(prompt, cancel).await {
            Err(EngineError::MessageLimit) => {
                self.log.log(
                    LogKind::Info,
                    "Message limit reached, switching to a direct completion request",
                );
                self.completion_fallback(prompt, cancel).await
            }
            other => other,
        }
    }

    async fn run_page_prompt(
        &self,
        prompt: &str,
        cancel: &CancelToken,
    ) -> Result<String, EngineError> {
        let baseline = self.observer.message_count().await?;
        debug!(baseline, "submitting prompt");
        self.submitter.submit(prompt).await?;
        self.wait_for_stream_start(baseline, cancel).await?;
        self.wait_for_stream_end(cancel).await?;
        Ok(self.observer.latest_message_text().await?)
    }

    /// Poll until the page shows more messages than `baseline`. Each
    /// pass also checks for the message-limit banner, which preempts
    /// everything else.
    async fn wait_for_stream_start(
        &self,
        baseline: usize,
        cancel: &CancelToken,
    ) -> Result<(), EngineError> {
        for attempt in 0..self.timing.stream_start_max_polls {
            cancel.ensure_active()?;
            if self.observer.has_limit_banner().await? {
                return Err(EngineError::MessageLimit);
            }
            if self.observer.message_count().await? > baseline {
                debug!(attempt, "response streaming detected");
                return Ok(());
            }
            sleep(self.timing.stream_start_poll).await;
        }
        Err(EngineError::StreamNotDetected)
    }

    async fn wait_for_stream_end(&self, cancel: &CancelToken) -> Result<(), EngineError> {
        let deadline = Instant::now() + self.timing.stream_timeout;
        while self.observer.is_streaming().await? {
            cancel.ensure_active()?;
            if Instant::now() >= deadline {
                return Err(EngineError::ResponseTimeout);
            }
            sleep(self.timing.stream_poll).await;
        }
        Ok(())
    }

    /// Detached completion used while the page cannot accept prompts.
    /// Keeps retrying as long as the service reports the limit.
    async fn completion_fallback(
        &self,
        prompt: &str,
        cancel: &CancelToken,
    ) -> Result<String, EngineError> {
        loop {
            cancel.ensure_active()?;
            match self.completion.complete(CompletionRequest::user(prompt), cancel).await {
                Ok(text) => return Ok(text),
                Err(CompletionError::RateLimited) => {
                    debug!(retry_in = ?self.timing.limit_retry, "limit still active");
                    self.log.log(LogKind::Info, "Still rate limited, will retry shortly");
                    self.sleep_cancellable(self.timing.limit_retry, cancel).await?;
                }
                Err(CompletionError::Cancelled) => return Err(EngineError::Cancelled),
                Err(e) => return Err(EngineError::Completion(e)),
            }
        }
    }

    /// Sleep in short slices so a cancel lands within one poll
    /// interval instead of after a full backoff pause.
    async fn sleep_cancellable(
        &self,
        total: Duration,
        cancel: &CancelToken,
    ) -> Result<(), EngineError> {
        let deadline = Instant::now() + total;
        loop {
            cancel.ensure_active()?;
            let now = Instant::now();
            if now >= deadline {
                return Ok(());
            }
            sleep((deadline - now).min(self.timing.stream_poll)).await;
        }
    }

    /// Run one prompt and judge its response against stop conditions.
    /// Conditions are checked in order; the first match wins.
    pub async fn run_stoppable(
        &self,
        prompt: &str,
        stops: &[StopCondition],
        cancel: &CancelToken,
    ) -> Result<StopOutcome, EngineError> {
        let response = self.run_prompt(prompt, cancel).await?;
        if stops.is_empty() {
            return Ok(StopOutcome::NotApplicable);
        }
        for condition in stops {
            if condition.satisfied_by(&response) {
                debug!(target = %condition.target, "stop condition matched");
                return Ok(StopOutcome::Stopped);
            }
        }
        Ok(StopOutcome::NotStopped)
    }

    /// Run a prompt statement to completion: repeat until a stop
    /// condition matches or the attempt cap is reached. Statements
    /// without stop conditions run once.
    ///
    /// Failures come back as [`LoopOutcome::Failed`]; only
    /// cancellation surfaces as an error.
    pub async fn run_prompt_loop(
        &self,
        statement: &PromptStatement,
        cancel: &CancelToken,
    ) -> Result<LoopOutcome, EngineError> {
        let max_tries = statement.max_tries.unwrap_or(DEFAULT_MAX_TRIES);
        for attempt in 1..=max_tries {
            cancel.ensure_active()?;
            self.log.log(LogKind::Info, &format!("Prompt attempt {attempt}/{max_tries}"));
            match self.run_stoppable(&statement.text, &statement.stop_conditions, cancel).await {
                Ok(StopOutcome::Stopped) => {
                    self.log.log(LogKind::Info, "Stop condition met");
                    return Ok(LoopOutcome::Stopped);
                }
                Ok(StopOutcome::NotApplicable) => return Ok(LoopOutcome::NotStopped),
                Ok(StopOutcome::NotStopped) => {}
                Err(EngineError::Cancelled) => return Err(EngineError::Cancelled),
                Err(e) => {
                    warn!(error = %e, "prompt attempt failed");
                    return Ok(LoopOutcome::Failed(e));
                }
            }
        }
        Ok(LoopOutcome::NotStopped)
    }
}
