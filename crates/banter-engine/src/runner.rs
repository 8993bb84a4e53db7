//! Script execution: parse, then run statements strictly in order.

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info};

use banter_script::{
    AliasCmd, Command, CommandRegistry, CommandStatement, ParseError, PromptStatement, QueryCmd,
    SearchCmd, Statement, parse,
};

use crate::annotations::{AliasStore, StarStore, unix_now};
use crate::batch::{BatchError, BatchPipeline};
use crate::history::ScriptHistory;
use crate::page::{PageContext, PageError, ResponseObserver};
use crate::prompt::{EngineError, LoopOutcome, PromptEngine};
use crate::protocol::StarredMessage;
use crate::retrieval::{ConversationClient, RetrievalError};
use crate::session::{AlreadyRunning, CancelToken, Cancelled, ExecutionSession};
use crate::sink::{LogKind, LogSink, SessionStatus, StatusSink};
use crate::store::KeyValueStore;

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error(transparent)]
    AlreadyRunning(#[from] AlreadyRunning),
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error("Command {name} failed")]
    CommandFailed { name: String },
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error("Error retrieving conversation data: {0}")]
    Retrieval(#[from] RetrievalError),
    #[error(transparent)]
    Page(#[from] PageError),
    #[error(transparent)]
    Batch(#[from] BatchError),
}

impl From<Cancelled> for RunnerError {
    fn from(_: Cancelled) -> Self {
        RunnerError::Engine(EngineError::Cancelled)
    }
}

/// How a run ended. Cancellation is an outcome here, not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every statement ran.
    Completed,
    /// A stop condition ended the script before its last statement.
    StoppedEarly,
    /// The user cancelled; remaining statements were skipped.
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub outcome: RunOutcome,
    /// Statements that ran to a terminal state.
    pub executed: usize,
}

/// Everything a runner talks to. Swapped wholesale in tests.
pub struct RunnerServices {
    pub engine: PromptEngine,
    pub batch: BatchPipeline,
    pub context: Arc<dyn PageContext>,
    pub conversations: Arc<dyn ConversationClient>,
    pub observer: Arc<dyn ResponseObserver>,
    pub store: Arc<dyn KeyValueStore>,
    pub status: Arc<dyn StatusSink>,
    pub log: Arc<dyn LogSink>,
}

pub struct ScriptRunner {
    session: ExecutionSession,
    registry: CommandRegistry,
    engine: PromptEngine,
    batch: BatchPipeline,
    context: Arc<dyn PageContext>,
    conversations: Arc<dyn ConversationClient>,
    observer: Arc<dyn ResponseObserver>,
    aliases: AliasStore,
    stars: StarStore,
    history: ScriptHistory,
    status: Arc<dyn StatusSink>,
    log: Arc<dyn LogSink>,
}

impl ScriptRunner {
    pub fn new(registry: CommandRegistry, services: RunnerServices) -> Self {
        Self {
            session: ExecutionSession::new(),
            registry,
            engine: services.engine,
            batch: services.batch,
            context: services.context,
            conversations: services.conversations,
            observer: services.observer,
            aliases: AliasStore::new(services.store.clone()),
            stars: StarStore::new(services.store.clone()),
            history: ScriptHistory::new(services.store),
            status: services.status,
            log: services.log,
        }
    }

    pub fn is_running(&self) -> bool {
        self.session.is_running()
    }

    /// Ask the run in flight to wind down. Safe to call at any time.
    pub fn cancel(&self) {
        self.session.cancel();
    }

    pub fn history(&self) -> &ScriptHistory {
        &self.history
    }

    pub fn registry(&self) -> &CommandRegistry {
        &self.registry
    }

    /// Parse and run a script. Fails fast if a run is already in
    /// flight. Exactly one terminal status lands in the status sink,
    /// whichever way the run ends.
    pub async fn run(&self, text: &str) -> Result<RunSummary, RunnerError> {
        let guard = self.session.begin()?;
        let token = self.session.token();
        self.status.set_status(SessionStatus::Working, None);

        let result = self.run_statements(text, &token).await;
        drop(guard);

        match result {
            Ok(summary) => {
                match summary.outcome {
                    RunOutcome::Completed => {
                        self.log.log(
                            LogKind::Info,
                            &format!("Script finished ({} statements)", summary.executed),
                        );
                        self.status.set_status(SessionStatus::Ready, None);
                    }
                    RunOutcome::StoppedEarly => {
                        self.log.log(LogKind::Info, "Script stopped early by a stop condition");
                        self.status.set_status(SessionStatus::Ready, None);
                    }
                    RunOutcome::Cancelled => {
                        self.log.log(LogKind::Info, "Script cancelled");
                        self.status.set_status(SessionStatus::Cancelled, Some("Script cancelled"));
                    }
                }
                Ok(summary)
            }
            Err(e) => {
                let message = e.to_string();
                self.log.log(LogKind::Error, &message);
                self.status.set_status(SessionStatus::Error, Some(&message));
                Err(e)
            }
        }
    }

    async fn run_statements(
        &self,
        text: &str,
        token: &CancelToken,
    ) -> Result<RunSummary, RunnerError> {
        let script = parse(text, &self.registry)?;
        self.history.record(text);
        info!(statements = script.len(), "running script");

        let mut executed = 0;
        for statement in &script.statements {
            if token.is_cancelled() {
                return Ok(RunSummary { outcome: RunOutcome::Cancelled, executed });
            }
            match statement {
                Statement::Prompt(prompt) => {
                    if prompt.text.trim().is_empty() {
                        continue;
                    }
                    match self.engine.run_prompt_loop(prompt, token).await {
                        Ok(LoopOutcome::Stopped) => {
                            return Ok(RunSummary {
                                outcome: RunOutcome::StoppedEarly,
                                executed: executed + 1,
                            });
                        }
                        Ok(LoopOutcome::NotStopped) => {}
                        Ok(LoopOutcome::Failed(e)) => return Err(e.into()),
                        Err(EngineError::Cancelled) => {
                            return Ok(RunSummary { outcome: RunOutcome::Cancelled, executed });
                        }
                        Err(e) => return Err(e.into()),
                    }
                }
                Statement::Command(command) => {
                    match self.execute_command(command, token).await {
                        Ok(true) => {}
                        Ok(false) => {
                            return Err(RunnerError::CommandFailed { name: command.name.clone() });
                        }
                        Err(RunnerError::Engine(EngineError::Cancelled)) => {
                            return Ok(RunSummary { outcome: RunOutcome::Cancelled, executed });
                        }
                        Err(e) => return Err(e),
                    }
                }
            }
            executed += 1;
        }
        Ok(RunSummary { outcome: RunOutcome::Completed, executed })
    }

    /// Dispatch one command statement. `Ok(false)` means the handler
    /// reported failure, which aborts the rest of the script.
    async fn execute_command(
        &self,
        statement: &CommandStatement,
        token: &CancelToken,
    ) -> Result<bool, RunnerError> {
        debug!(command = %statement.name, "executing command");
        match &statement.command {
            Command::Search(cmd) => self.run_search(cmd, token).await,
            Command::Query(cmd) => self.run_query(cmd, token).await,
            Command::Artifacts => self.run_artifacts(token).await,
            Command::Alias(alias) => self.run_alias(statement, alias, token).await,
            Command::Star => self.run_star().await,
            Command::ListStarred => {
                let stars = self.stars.list();
                if stars.is_empty() {
                    self.log.log(LogKind::Info, "No starred messages");
                } else {
                    for star in stars {
                        self.log.log(
                            LogKind::Info,
                            &format!("[{}] {}", star.starred_at, preview(&star.text, 100)),
                        );
                    }
                }
                Ok(true)
            }
            Command::Help => {
                for spec in self.registry.specs() {
                    self.log.log(
                        LogKind::Info,
                        &format!("/{} (/{}): {}", spec.full, spec.abbreviation, spec.summary),
                    );
                }
                Ok(true)
            }
        }
    }

    async fn run_search(&self, cmd: &SearchCmd, token: &CancelToken) -> Result<bool, RunnerError> {
        let organization_id = self.context.organization_id().await?;
        let project_id = self.context.project_id().await?;
        let rows = self
            .conversations
            .list_conversations(&organization_id, project_id.as_deref())
            .await?;
        if rows.is_empty() {
            self.log.log(LogKind::Info, "No conversations found in this project");
            return Ok(true);
        }
        self.batch.search(&organization_id, &rows, &cmd.search_text, token).await?;
        Ok(true)
    }

    async fn run_query(&self, cmd: &QueryCmd, token: &CancelToken) -> Result<bool, RunnerError> {
        let organization_id = self.context.organization_id().await?;
        let project_id = self.context.project_id().await?;
        let rows = self
            .conversations
            .list_conversations(&organization_id, project_id.as_deref())
            .await?;
        if rows.is_empty() {
            self.log.log(LogKind::Info, "No conversations found in this project");
            return Ok(true);
        }
        self.batch.query_all(&rows, &cmd.prompt, token).await?;
        Ok(true)
    }

    async fn run_artifacts(&self, token: &CancelToken) -> Result<bool, RunnerError> {
        let organization_id = self.context.organization_id().await?;
        let Some(conversation_id) = self.context.conversation_id().await? else {
            self.log.log(LogKind::Error, "Open a conversation to list its artifacts");
            return Ok(false);
        };
        token.ensure_active()?;
        let conversation = self.conversations.conversation(&organization_id, &conversation_id).await?;
        let artifacts = crate::artifacts::extract_artifacts(&conversation);
        if artifacts.is_empty() {
            self.log.log(LogKind::Info, "No artifacts in this conversation");
        } else {
            for artifact in &artifacts {
                self.log.log(
                    LogKind::Info,
                    &format!(
                        "[{}] {} ({} chars)",
                        artifact.kind, artifact.title, artifact.content.chars().count()
                    ),
                );
            }
        }
        Ok(true)
    }

    async fn run_alias(
        &self,
        statement: &CommandStatement,
        alias: &AliasCmd,
        token: &CancelToken,
    ) -> Result<bool, RunnerError> {
        match alias {
            AliasCmd::Define { name, text } => {
                self.aliases.define(name, text);
                self.log.log(LogKind::Info, &format!("Alias @{name} saved"));
                Ok(true)
            }
            AliasCmd::Delete { name } => {
                if self.aliases.delete(name) {
                    self.log.log(LogKind::Info, &format!("Alias @{name} removed"));
                    Ok(true)
                } else {
                    self.log.log(LogKind::Error, &format!("No alias named @{name}"));
                    Ok(false)
                }
            }
            AliasCmd::List => {
                let aliases = self.aliases.list();
                if aliases.is_empty() {
                    self.log.log(LogKind::Info, "No aliases stored");
                } else {
                    for (name, text) in aliases {
                        self.log.log(LogKind::Info, &format!("@{name} = {}", preview(&text, 80)));
                    }
                }
                Ok(true)
            }
            AliasCmd::Run { name } => {
                let Some(text) = self.aliases.get(name) else {
                    self.log.log(LogKind::Error, &format!("No alias named @{name}"));
                    return Ok(false);
                };
                let prompt = PromptStatement {
                    text,
                    stop_conditions: statement.stop_conditions.clone(),
                    max_tries: None,
                };
                match self.engine.run_prompt_loop(&prompt, token).await? {
                    LoopOutcome::Stopped | LoopOutcome::NotStopped => Ok(true),
                    LoopOutcome::Failed(e) => Err(e.into()),
                }
            }
        }
    }

    async fn run_star(&self) -> Result<bool, RunnerError> {
        let text = self.observer.latest_message_text().await?;
        if text.trim().is_empty() {
            self.log.log(LogKind::Error, "No assistant message to star");
            return Ok(false);
        }
        let conversation_id = self.context.conversation_id().await?;
        self.stars.add(StarredMessage { conversation_id, text, starred_at: unix_now() });
        self.log.log(LogKind::Info, "Message starred");
        Ok(true)
    }
}

fn preview(text: &str, max: usize) -> String {
    let mut preview: String = text.chars().take(max).collect();
    if text.chars().count() > max {
        preview.push_str("...");
    }
    preview.replace('\n', " ")
}
