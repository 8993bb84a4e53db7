use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use banter_engine::annotations::StarStore;
use banter_engine::batch::BatchPipeline;
use banter_engine::completion::{CompletionClient, CompletionError, CompletionRequest};
use banter_engine::page::{PageContext, PageError, PromptSubmitter, ResponseObserver};
use banter_engine::prompt::{EngineTiming, PromptEngine};
use banter_engine::protocol::{Conversation, ConversationSummary, Message, Sender};
use banter_engine::retrieval::{ConversationClient, RetrievalError};
use banter_engine::runner::{RunOutcome, RunnerError, RunnerServices, ScriptRunner};
use banter_engine::session::CancelToken;
use banter_engine::sink::{
    LogKind, LogSink, ResultSink, RowSeed, RowUpdate, SessionStatus, StatusSink,
};
use banter_engine::store::MemoryStore;
use banter_script::CommandRegistry;

/// Scripted page standing in for the hosted chat tab: observer,
/// submitter and context in one.
struct FakeHost {
    organization: String,
    project: Option<String>,
    conversation: Option<String>,
    streaming_per_reply: usize,
    message_count: AtomicUsize,
    streaming_left: AtomicUsize,
    replies: Mutex<VecDeque<String>>,
    latest: Mutex<String>,
    submitted: Mutex<Vec<String>>,
    banner: AtomicBool,
}

impl FakeHost {
    fn with_streaming(replies: &[&str], streaming_per_reply: usize) -> Arc<Self> {
        Arc::new(Self {
            organization: "org-1".to_string(),
            project: Some("proj-7".to_string()),
            conversation: Some("conv-9".to_string()),
            streaming_per_reply,
            message_count: AtomicUsize::new(0),
            streaming_left: AtomicUsize::new(0),
            replies: Mutex::new(replies.iter().map(|s| s.to_string()).collect()),
            latest: Mutex::new(String::new()),
            submitted: Mutex::new(Vec::new()),
            banner: AtomicBool::new(false),
        })
    }

    fn new(replies: &[&str]) -> Arc<Self> {
        Self::with_streaming(replies, 1)
    }

    /// A page whose responses stream for a long time, keeping the run
    /// busy while a test interferes with it.
    fn slow(replies: &[&str]) -> Arc<Self> {
        Self::with_streaming(replies, 200)
    }

    fn submissions(&self) -> Vec<String> {
        self.submitted.lock().unwrap().clone()
    }
}

#[async_trait]
impl ResponseObserver for FakeHost {
    async fn message_count(&self) -> Result<usize, PageError> {
        Ok(self.message_count.load(Ordering::SeqCst))
    }

    async fn is_streaming(&self) -> Result<bool, PageError> {
        let left = self.streaming_left.load(Ordering::SeqCst);
        if left > 0 {
            self.streaming_left.store(left - 1, Ordering::SeqCst);
            return Ok(true);
        }
        Ok(false)
    }

    async fn latest_message_text(&self) -> Result<String, PageError> {
        Ok(self.latest.lock().unwrap().clone())
    }

    async fn has_limit_banner(&self) -> Result<bool, PageError> {
        Ok(self.banner.load(Ordering::SeqCst))
    }
}

#[async_trait]
impl PromptSubmitter for FakeHost {
    async fn submit(&self, text: &str) -> Result<(), PageError> {
        self.submitted.lock().unwrap().push(text.to_string());
        self.message_count.fetch_add(1, Ordering::SeqCst);
        self.streaming_left.store(self.streaming_per_reply, Ordering::SeqCst);
        if let Some(next) = self.replies.lock().unwrap().pop_front() {
            *self.latest.lock().unwrap() = next;
        }
        Ok(())
    }
}

#[async_trait]
impl PageContext for FakeHost {
    async fn organization_id(&self) -> Result<String, PageError> {
        Ok(self.organization.clone())
    }

    async fn project_id(&self) -> Result<Option<String>, PageError> {
        Ok(self.project.clone())
    }

    async fn conversation_id(&self) -> Result<Option<String>, PageError> {
        Ok(self.conversation.clone())
    }
}

#[derive(Default)]
struct FakeArchive {
    listings: Vec<ConversationSummary>,
    conversations: HashMap<String, Conversation>,
    fail_listing: bool,
    listing_calls: Mutex<Vec<(String, Option<String>)>>,
}

#[async_trait]
impl ConversationClient for FakeArchive {
    async fn list_conversations(
        &self,
        organization_id: &str,
        project_id: Option<&str>,
    ) -> Result<Vec<ConversationSummary>, RetrievalError> {
        self.listing_calls
            .lock()
            .unwrap()
            .push((organization_id.to_string(), project_id.map(String::from)));
        if self.fail_listing {
            return Err(RetrievalError::Api { status: 500, message: "listing down".to_string() });
        }
        Ok(self.listings.clone())
    }

    async fn conversation(
        &self,
        _organization_id: &str,
        conversation_id: &str,
    ) -> Result<Conversation, RetrievalError> {
        self.conversations.get(conversation_id).cloned().ok_or(RetrievalError::Api {
            status: 404,
            message: format!("no conversation {conversation_id}"),
        })
    }
}

#[derive(Default)]
struct FakeCompletion {
    replies: Mutex<VecDeque<Result<String, CompletionError>>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

#[async_trait]
impl CompletionClient for FakeCompletion {
    async fn complete(
        &self,
        request: CompletionRequest,
        _cancel: &CancelToken,
    ) -> Result<String, CompletionError> {
        self.requests.lock().unwrap().push(request);
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Err(CompletionError::Transport("no scripted reply".into())))
    }
}

#[derive(Default)]
struct RecordingStatus {
    updates: Mutex<Vec<(SessionStatus, Option<String>)>>,
}

impl RecordingStatus {
    fn all(&self) -> Vec<(SessionStatus, Option<String>)> {
        self.updates.lock().unwrap().clone()
    }

    fn terminal(&self) -> Option<(SessionStatus, Option<String>)> {
        self.updates.lock().unwrap().last().cloned()
    }
}

impl StatusSink for RecordingStatus {
    fn set_status(&self, status: SessionStatus, details: Option<&str>) {
        self.updates.lock().unwrap().push((status, details.map(String::from)));
    }
}

#[derive(Default)]
struct RecordingLog {
    lines: Mutex<Vec<(LogKind, String)>>,
}

impl RecordingLog {
    fn messages(&self) -> Vec<String> {
        self.lines.lock().unwrap().iter().map(|(_, m)| m.clone()).collect()
    }
}

impl LogSink for RecordingLog {
    fn log(&self, kind: LogKind, message: &str) {
        self.lines.lock().unwrap().push((kind, message.to_string()));
    }
}

#[derive(Default)]
struct RecordingResults {
    seeds: Mutex<Vec<RowSeed>>,
    events: Mutex<Vec<(String, RowUpdate)>>,
}

impl RecordingResults {
    fn terminal_for(&self, conversation_id: &str) -> Option<RowUpdate> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _)| id == conversation_id)
            .map(|(_, update)| update.clone())
            .last()
    }
}

impl ResultSink for RecordingResults {
    fn begin(&self, rows: &[RowSeed]) {
        *self.seeds.lock().unwrap() = rows.to_vec();
    }

    fn update(&self, conversation_id: &str, update: RowUpdate) {
        self.events.lock().unwrap().push((conversation_id.to_string(), update));
    }
}

struct Harness {
    runner: Arc<ScriptRunner>,
    page: Arc<FakeHost>,
    completion: Arc<FakeCompletion>,
    archive: Arc<FakeArchive>,
    status: Arc<RecordingStatus>,
    log: Arc<RecordingLog>,
    results: Arc<RecordingResults>,
    store: Arc<MemoryStore>,
}

fn fast_timing() -> EngineTiming {
    EngineTiming {
        stream_start_poll: Duration::from_millis(1),
        stream_start_max_polls: 5,
        stream_poll: Duration::from_millis(1),
        stream_timeout: Duration::from_secs(2),
        limit_retry: Duration::from_millis(5),
    }
}

fn build(page: Arc<FakeHost>, completion: Arc<FakeCompletion>, archive: Arc<FakeArchive>) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let status = Arc::new(RecordingStatus::default());
    let log = Arc::new(RecordingLog::default());
    let results = Arc::new(RecordingResults::default());
    let engine = PromptEngine::new(page.clone(), page.clone(), completion.clone(), log.clone())
        .with_timing(fast_timing());
    let batch =
        BatchPipeline::new(archive.clone(), completion.clone(), results.clone(), log.clone());
    let services = RunnerServices {
        engine,
        batch,
        context: page.clone(),
        conversations: archive.clone(),
        observer: page.clone(),
        store: store.clone(),
        status: status.clone(),
        log: log.clone(),
    };
    let runner = Arc::new(ScriptRunner::new(CommandRegistry::standard(), services));
    Harness { runner, page, completion, archive, status, log, results, store }
}

fn simple_harness(replies: &[&str]) -> Harness {
    build(FakeHost::new(replies), Arc::new(FakeCompletion::default()), Arc::new(FakeArchive::default()))
}

fn summary_row(id: &str, name: &str) -> ConversationSummary {
    ConversationSummary {
        id: id.to_string(),
        name: name.to_string(),
        updated_at: None,
        project_id: None,
    }
}

fn transcript(id: &str, texts: &[(Sender, &str)]) -> Conversation {
    let messages = texts
        .iter()
        .enumerate()
        .map(|(i, (sender, text))| Message {
            id: format!("m{i}"),
            sender: *sender,
            text: text.to_string(),
            created_at: None,
        })
        .collect();
    Conversation { id: id.to_string(), name: format!("conversation {id}"), messages }
}

#[tokio::test]
async fn test_prompt_script_runs_statements_in_order() {
    let harness = simple_harness(&["first reply", "second reply"]);
    let summary = harness.runner.run("alpha; beta").await.unwrap();

    assert_eq!(summary.outcome, RunOutcome::Completed);
    assert_eq!(summary.executed, 2);
    assert_eq!(harness.page.submissions(), vec!["alpha", "beta"]);
    assert_eq!(
        harness.status.all(),
        vec![(SessionStatus::Working, None), (SessionStatus::Ready, None)]
    );
}

#[tokio::test]
async fn test_parse_error_runs_nothing() {
    let harness = simple_harness(&[]);
    let err = harness.runner.run("hello; /bogus extra").await.unwrap_err();

    assert!(matches!(err, RunnerError::Parse(_)));
    assert!(harness.page.submissions().is_empty(), "no statement may run on a parse error");
    let (status, details) = harness.status.terminal().unwrap();
    assert_eq!(status, SessionStatus::Error);
    assert_eq!(details.as_deref(), Some("Unknown command: /bogus"));
}

#[tokio::test]
async fn test_stop_condition_ends_script_early() {
    let harness = simple_harness(&["everything is DONE here", "unused"]);
    let summary = harness.runner.run("first /stop_if DONE; second").await.unwrap();

    assert_eq!(summary.outcome, RunOutcome::StoppedEarly);
    assert_eq!(summary.executed, 1);
    assert_eq!(harness.page.submissions(), vec!["first"]);
    assert_eq!(harness.status.terminal().unwrap().0, SessionStatus::Ready);
}

#[tokio::test]
async fn test_reentrant_run_fails_fast() {
    let page = FakeHost::slow(&["slow reply"]);
    let harness = build(page, Arc::new(FakeCompletion::default()), Arc::new(FakeArchive::default()));

    let first = {
        let runner = harness.runner.clone();
        tokio::spawn(async move { runner.run("take your time").await })
    };
    while harness.page.submissions().is_empty() {
        tokio::time::sleep(Duration::from_millis(2)).await;
    }

    let err = harness.runner.run("me too").await.unwrap_err();
    assert!(matches!(err, RunnerError::AlreadyRunning(_)));

    harness.runner.cancel();
    let outcome = first.await.unwrap().unwrap();
    assert_eq!(outcome.outcome, RunOutcome::Cancelled);
    assert!(!harness.runner.is_running());

    // Session is immediately reusable.
    let summary = harness.runner.run("again").await.unwrap();
    assert_eq!(summary.outcome, RunOutcome::Completed);
}

#[tokio::test]
async fn test_cancel_is_an_outcome_not_an_error() {
    let page = FakeHost::slow(&["slow reply"]);
    let harness = build(page, Arc::new(FakeCompletion::default()), Arc::new(FakeArchive::default()));

    let run = {
        let runner = harness.runner.clone();
        tokio::spawn(async move { runner.run("one; two; three").await })
    };
    while harness.page.submissions().is_empty() {
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    harness.runner.cancel();

    let summary = run.await.unwrap().unwrap();
    assert_eq!(summary.outcome, RunOutcome::Cancelled);
    assert_eq!(harness.page.submissions(), vec!["one"], "remaining statements must not run");
    let (status, details) = harness.status.terminal().unwrap();
    assert_eq!(status, SessionStatus::Cancelled);
    assert_eq!(details.as_deref(), Some("Script cancelled"));
}

#[tokio::test]
async fn test_command_failure_aborts_script() {
    let harness = simple_harness(&["unused"]);
    let err = harness.runner.run("@- missing; next prompt").await.unwrap_err();

    match err {
        RunnerError::CommandFailed { name } => assert_eq!(name, "@-"),
        other => panic!("expected a command failure, got {other:?}"),
    }
    assert!(harness.page.submissions().is_empty());
    let (status, details) = harness.status.terminal().unwrap();
    assert_eq!(status, SessionStatus::Error);
    assert_eq!(details.as_deref(), Some("Command @- failed"));
}

#[tokio::test]
async fn test_alias_define_and_run() {
    let harness = simple_harness(&["ok"]);
    let summary = harness.runner.run("@+ greet wave politely").await.unwrap();
    assert_eq!(summary.outcome, RunOutcome::Completed);
    assert!(harness.log.messages().iter().any(|m| m == "Alias @greet saved"));
    assert!(harness.page.submissions().is_empty(), "defining an alias submits nothing");

    harness.runner.run("@greet").await.unwrap();
    assert_eq!(harness.page.submissions(), vec!["wave politely"]);
}

#[tokio::test]
async fn test_unknown_alias_fails_the_script() {
    let harness = simple_harness(&[]);
    let err = harness.runner.run("@nope").await.unwrap_err();
    assert!(matches!(err, RunnerError::CommandFailed { .. }));
    assert!(harness.log.messages().iter().any(|m| m == "No alias named @nope"));
}

#[tokio::test]
async fn test_search_command_reports_rows() {
    let verdict = r#"{"message_id": "m1", "match_reason": "mentions athena", "relevant_snippet": "athena owns it"}"#;
    let completion = Arc::new(FakeCompletion {
        replies: Mutex::new(VecDeque::from([
            Ok(verdict.to_string()),
            Ok("null".to_string()),
        ])),
        requests: Mutex::new(Vec::new()),
    });
    let archive = Arc::new(FakeArchive {
        listings: vec![summary_row("c1", "Alpha"), summary_row("c2", "Beta")],
        conversations: HashMap::from([
            ("c1".to_string(), transcript("c1", &[(Sender::Human, "who owns athena?")])),
            ("c2".to_string(), transcript("c2", &[(Sender::Human, "lunch plans")])),
        ]),
        ..FakeArchive::default()
    });
    let harness = build(FakeHost::new(&[]), completion, archive);

    let summary = harness.runner.run("/search_project athena").await.unwrap();
    assert_eq!(summary.outcome, RunOutcome::Completed);

    assert_eq!(
        harness.archive.listing_calls.lock().unwrap().clone(),
        vec![("org-1".to_string(), Some("proj-7".to_string()))]
    );
    let seeds = harness.results.seeds.lock().unwrap().clone();
    let titles: Vec<&str> = seeds.iter().map(|s| s.title.as_str()).collect();
    assert_eq!(titles, ["Alpha", "Beta"]);

    match harness.results.terminal_for("c1") {
        Some(RowUpdate::Matched(result)) => {
            assert_eq!(result.conversation_id, "c1");
            assert_eq!(result.message_id, "m1");
        }
        other => panic!("expected a match for c1, got {other:?}"),
    }
    assert_eq!(harness.results.terminal_for("c2"), Some(RowUpdate::NoMatch));
    assert!(
        harness
            .log
            .messages()
            .iter()
            .any(|m| m == "Search finished: 1 matched, 0 errors across 2 conversations"),
        "summary line missing: {:?}",
        harness.log.messages()
    );
}

#[tokio::test]
async fn test_search_with_empty_project_is_a_no_op() {
    let harness = simple_harness(&[]);
    let summary = harness.runner.run("/sp anything").await.unwrap();
    assert_eq!(summary.outcome, RunOutcome::Completed);
    assert!(harness.results.seeds.lock().unwrap().is_empty());
    assert!(harness.log.messages().iter().any(|m| m == "No conversations found in this project"));
}

#[tokio::test]
async fn test_listing_failure_is_wrapped_with_context() {
    let archive = Arc::new(FakeArchive { fail_listing: true, ..FakeArchive::default() });
    let harness = build(FakeHost::new(&[]), Arc::new(FakeCompletion::default()), archive);

    let err = harness.runner.run("/search_project x").await.unwrap_err();
    assert!(matches!(err, RunnerError::Retrieval(_)));
    let (status, details) = harness.status.terminal().unwrap();
    assert_eq!(status, SessionStatus::Error);
    assert!(details.unwrap().starts_with("Error retrieving conversation data:"));
}

#[tokio::test]
async fn test_query_command_records_answers_per_conversation() {
    let completion = Arc::new(FakeCompletion {
        replies: Mutex::new(VecDeque::from([
            Ok("we decided on rust".to_string()),
            Err(CompletionError::Api { status: 500, message: "boom".to_string() }),
        ])),
        requests: Mutex::new(Vec::new()),
    });
    let archive = Arc::new(FakeArchive {
        listings: vec![summary_row("c1", "Alpha"), summary_row("c2", "Beta")],
        ..FakeArchive::default()
    });
    let harness = build(FakeHost::new(&[]), completion, archive);

    let summary = harness.runner.run("/query_project what was decided?").await.unwrap();
    assert_eq!(summary.outcome, RunOutcome::Completed);

    assert_eq!(
        harness.results.terminal_for("c1"),
        Some(RowUpdate::Answered("we decided on rust".to_string()))
    );
    assert!(matches!(harness.results.terminal_for("c2"), Some(RowUpdate::Failed(_))));

    let requests = harness.completion.requests.lock().unwrap().clone();
    let targets: Vec<Option<String>> =
        requests.iter().map(|r| r.conversation_id.clone()).collect();
    assert_eq!(targets, vec![Some("c1".to_string()), Some("c2".to_string())]);
}

#[tokio::test]
async fn test_artifacts_command_lists_blocks() {
    let text = r#"Sure: <antArtifact identifier="plan" type="text/markdown" title="The Plan">step one</antArtifact>"#;
    let archive = Arc::new(FakeArchive {
        conversations: HashMap::from([
            ("conv-9".to_string(), transcript("conv-9", &[(Sender::Assistant, text)])),
        ]),
        ..FakeArchive::default()
    });
    let harness = build(FakeHost::new(&[]), Arc::new(FakeCompletion::default()), archive);

    harness.runner.run("/artifacts").await.unwrap();
    assert!(
        harness.log.messages().iter().any(|m| m.contains("The Plan")),
        "artifact listing missing: {:?}",
        harness.log.messages()
    );
}

#[tokio::test]
async fn test_star_records_the_latest_assistant_message() {
    let harness = simple_harness(&[]);
    *harness.page.latest.lock().unwrap() = "brilliant insight".to_string();

    harness.runner.run("/star").await.unwrap();

    let stars = StarStore::new(harness.store.clone()).list();
    assert_eq!(stars.len(), 1);
    assert_eq!(stars[0].text, "brilliant insight");
    assert_eq!(stars[0].conversation_id.as_deref(), Some("conv-9"));

    harness.runner.run("/list_starred").await.unwrap();
    assert!(harness.log.messages().iter().any(|m| m.contains("brilliant insight")));
}

#[tokio::test]
async fn test_star_without_a_message_fails() {
    let harness = simple_harness(&[]);
    let err = harness.runner.run("/star").await.unwrap_err();
    assert!(matches!(err, RunnerError::CommandFailed { .. }));
    assert!(harness.log.messages().iter().any(|m| m == "No assistant message to star"));
}

#[tokio::test]
async fn test_help_lists_every_command() {
    let harness = simple_harness(&[]);
    harness.runner.run("/help").await.unwrap();
    let messages = harness.log.messages();
    for expected in ["/search_project", "/query_project", "/repeat", "/alias", "/star"] {
        assert!(
            messages.iter().any(|m| m.contains(expected)),
            "{expected} missing from help output"
        );
    }
}

#[tokio::test]
async fn test_scripts_land_in_history() {
    let harness = simple_harness(&["a", "b"]);
    harness.runner.run("alpha").await.unwrap();
    harness.runner.run("beta").await.unwrap();
    assert_eq!(harness.runner.history().recent(5), vec!["beta", "alpha"]);
}
