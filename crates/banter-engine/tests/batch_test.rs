use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use banter_engine::batch::{BatchError, BatchPipeline};
use banter_engine::completion::{CompletionClient, CompletionError, CompletionRequest};
use banter_engine::protocol::{Conversation, ConversationSummary, Message, Sender};
use banter_engine::retrieval::{ConversationClient, RetrievalError};
use banter_engine::session::CancelToken;
use banter_engine::sink::{LogKind, LogSink, ResultSink, RowSeed, RowUpdate};
use tokio::time::Instant;

#[derive(Default)]
struct FakeArchive {
    conversations: HashMap<String, Conversation>,
}

#[async_trait]
impl ConversationClient for FakeArchive {
    async fn list_conversations(
        &self,
        _organization_id: &str,
        _project_id: Option<&str>,
    ) -> Result<Vec<ConversationSummary>, RetrievalError> {
        Ok(vec![])
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

/// Completion fake that takes a configurable time per call, checking
/// the cancel token the way a streaming client would.
struct SlowCompletion {
    delay: Duration,
    replies: Mutex<VecDeque<Result<String, CompletionError>>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl SlowCompletion {
    fn scripted(replies: Vec<Result<String, CompletionError>>) -> Arc<Self> {
        Arc::new(Self {
            delay: Duration::ZERO,
            replies: Mutex::new(replies.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    fn slow(replies: Vec<Result<String, CompletionError>>) -> Arc<Self> {
        Arc::new(Self {
            delay: Duration::from_millis(100),
            replies: Mutex::new(replies.into()),
            requests: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl CompletionClient for SlowCompletion {
    async fn complete(
        &self,
        request: CompletionRequest,
        cancel: &CancelToken,
    ) -> Result<String, CompletionError> {
        self.requests.lock().unwrap().push(request);
        let deadline = Instant::now() + self.delay;
        while Instant::now() < deadline {
            if cancel.is_cancelled() {
                return Err(CompletionError::Cancelled);
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Err(CompletionError::Transport("no scripted reply".into())))
    }
}

#[derive(Default)]
struct RecordingResults {
    seeds: Mutex<Vec<RowSeed>>,
    events: Mutex<Vec<(String, RowUpdate)>>,
}

impl RecordingResults {
    fn events_for(&self, conversation_id: &str) -> Vec<RowUpdate> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _)| id == conversation_id)
            .map(|(_, update)| update.clone())
            .collect()
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

#[derive(Default)]
struct RecordingLog {
    lines: Mutex<Vec<String>>,
}

impl LogSink for RecordingLog {
    fn log(&self, _kind: LogKind, message: &str) {
        self.lines.lock().unwrap().push(message.to_string());
    }
}

fn summary_row(id: &str) -> ConversationSummary {
    ConversationSummary {
        id: id.to_string(),
        name: format!("conversation {id}"),
        updated_at: None,
        project_id: None,
    }
}

fn transcript(id: &str, text: &str) -> Conversation {
    Conversation {
        id: id.to_string(),
        name: format!("conversation {id}"),
        messages: vec![Message {
            id: "m1".to_string(),
            sender: Sender::Human,
            text: text.to_string(),
            created_at: None,
        }],
    }
}

fn archive_for(rows: &[&str]) -> Arc<FakeArchive> {
    let conversations = rows
        .iter()
        .map(|id| (id.to_string(), transcript(id, "some chatter")))
        .collect();
    Arc::new(FakeArchive { conversations })
}

fn build_pipeline(
    archive: Arc<FakeArchive>,
    completion: Arc<SlowCompletion>,
) -> (Arc<BatchPipeline>, Arc<RecordingResults>, Arc<RecordingLog>) {
    let results = Arc::new(RecordingResults::default());
    let log = Arc::new(RecordingLog::default());
    let pipeline =
        Arc::new(BatchPipeline::new(archive, completion, results.clone(), log.clone()));
    (pipeline, results, log)
}

async fn wait_for(mut condition: impl FnMut() -> bool, what: &str) {
    for _ in 0..1000 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    panic!("timed out waiting for {what}");
}

#[tokio::test]
async fn test_search_walks_rows_in_order() {
    let verdict = r#"{"message_id": "m1", "match_reason": "on topic", "relevant_snippet": "here"}"#;
    let completion = SlowCompletion::scripted(vec![
        Ok(verdict.to_string()),
        Ok("null".to_string()),
        Ok("not even json".to_string()),
    ]);
    let (pipeline, results, _log) = build_pipeline(archive_for(&["c1", "c2", "c3"]), completion);

    let rows = vec![summary_row("c1"), summary_row("c2"), summary_row("c3")];
    let outcome = pipeline.search("org", &rows, "topic", &CancelToken::new()).await.unwrap();

    assert_eq!(outcome.rows, 3);
    assert_eq!(outcome.completed, 3);
    assert_eq!(outcome.failed, 1);
    assert!(!outcome.cancelled);

    assert!(matches!(
        results.events_for("c1").as_slice(),
        [RowUpdate::Working, RowUpdate::Matched(_)]
    ));
    assert_eq!(results.events_for("c2"), vec![RowUpdate::Working, RowUpdate::NoMatch]);
    match results.events_for("c3").as_slice() {
        [RowUpdate::Working, RowUpdate::Failed(message)] => {
            assert!(message.contains("Could not parse search verdict"), "got {message}");
        }
        other => panic!("unexpected events for c3: {other:?}"),
    }

    // Rows are announced up front, in listing order.
    let seeds = results.seeds.lock().unwrap().clone();
    let ids: Vec<&str> = seeds.iter().map(|s| s.conversation_id.as_str()).collect();
    assert_eq!(ids, ["c1", "c2", "c3"]);
}

#[tokio::test]
async fn test_search_isolates_row_errors() {
    let verdict = r#"{"message_id": "m1", "match_reason": "on topic", "relevant_snippet": "here"}"#;
    let completion =
        SlowCompletion::scripted(vec![Ok(verdict.to_string()), Ok("null".to_string())]);
    // c2 is missing from the archive, so its fetch fails.
    let (pipeline, results, _log) = build_pipeline(archive_for(&["c1", "c3"]), completion);

    let rows = vec![summary_row("c1"), summary_row("c2"), summary_row("c3")];
    let outcome = pipeline.search("org", &rows, "topic", &CancelToken::new()).await.unwrap();

    assert_eq!(outcome.completed, 3);
    assert_eq!(outcome.failed, 1);
    match results.events_for("c2").as_slice() {
        [RowUpdate::Working, RowUpdate::Failed(message)] => {
            assert!(message.starts_with("Error retrieving conversation:"), "got {message}");
        }
        other => panic!("unexpected events for c2: {other:?}"),
    }
    assert!(matches!(results.events_for("c3").as_slice(), [RowUpdate::Working, RowUpdate::NoMatch]));
}

#[tokio::test]
async fn test_abort_spares_processed_rows() {
    let verdict = r#"{"message_id": "m1", "match_reason": "on topic", "relevant_snippet": "here"}"#;
    let completion = SlowCompletion::slow(vec![
        Ok(verdict.to_string()),
        Ok("null".to_string()),
        Ok("null".to_string()),
    ]);
    let (pipeline, results, _log) = build_pipeline(archive_for(&["c1", "c2", "c3"]), completion);

    let rows = vec![summary_row("c1"), summary_row("c2"), summary_row("c3")];
    let run = {
        let pipeline = pipeline.clone();
        let rows = rows.clone();
        tokio::spawn(async move { pipeline.search("org", &rows, "topic", &CancelToken::new()).await })
    };

    wait_for(
        || matches!(results.events_for("c1").last(), Some(RowUpdate::Matched(_))),
        "first row to finish",
    )
    .await;
    wait_for(|| !results.events_for("c2").is_empty(), "second row to start").await;
    pipeline.abort();

    let outcome = run.await.unwrap().unwrap();
    assert!(outcome.cancelled);
    assert_eq!(outcome.completed, 1);

    // The finished row keeps its result; everything else is cancelled.
    assert!(matches!(
        results.events_for("c1").as_slice(),
        [RowUpdate::Working, RowUpdate::Matched(_)]
    ));
    assert_eq!(results.events_for("c2"), vec![RowUpdate::Working, RowUpdate::Cancelled]);
    assert_eq!(results.events_for("c3"), vec![RowUpdate::Cancelled]);
}

#[tokio::test]
async fn test_caller_cancel_stops_the_sweep() {
    let completion = SlowCompletion::slow(vec![Ok("null".to_string()), Ok("null".to_string())]);
    let (pipeline, results, _log) = build_pipeline(archive_for(&["c1", "c2"]), completion);

    let rows = vec![summary_row("c1"), summary_row("c2")];
    let token = CancelToken::new();
    let run = {
        let pipeline = pipeline.clone();
        let rows = rows.clone();
        let token = token.clone();
        tokio::spawn(async move { pipeline.search("org", &rows, "topic", &token).await })
    };

    wait_for(|| !results.events_for("c1").is_empty(), "first row to start").await;
    token.cancel();

    let outcome = run.await.unwrap().unwrap();
    assert!(outcome.cancelled);
    assert_eq!(results.events_for("c1"), vec![RowUpdate::Working, RowUpdate::Cancelled]);
    assert_eq!(results.events_for("c2"), vec![RowUpdate::Cancelled]);

    // The pipeline is free for the next batch.
    let outcome =
        pipeline.search("org", &[summary_row("c1")], "topic", &CancelToken::new()).await.unwrap();
    assert!(!outcome.cancelled);
}

#[tokio::test]
async fn test_second_batch_is_rejected_while_one_runs() {
    let completion = SlowCompletion::slow(vec![Ok("null".to_string())]);
    let (pipeline, results, _log) = build_pipeline(archive_for(&["c1"]), completion);

    let rows = vec![summary_row("c1")];
    let run = {
        let pipeline = pipeline.clone();
        let rows = rows.clone();
        tokio::spawn(async move { pipeline.search("org", &rows, "topic", &CancelToken::new()).await })
    };
    wait_for(|| !results.events_for("c1").is_empty(), "batch to start").await;

    let err = pipeline.search("org", &rows, "topic", &CancelToken::new()).await.unwrap_err();
    assert!(matches!(err, BatchError::AlreadyRunning));

    pipeline.abort();
    run.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_query_all_continues_each_conversation() {
    let completion = SlowCompletion::scripted(vec![
        Ok("first answer".to_string()),
        Err(CompletionError::Api { status: 500, message: "boom".to_string() }),
    ]);
    let (pipeline, results, _log) = build_pipeline(archive_for(&[]), completion.clone());

    let rows = vec![summary_row("c1"), summary_row("c2")];
    let outcome = pipeline.query_all(&rows, "what changed?", &CancelToken::new()).await.unwrap();

    assert_eq!(outcome.completed, 2);
    assert_eq!(outcome.failed, 1);
    assert_eq!(
        results.events_for("c1"),
        vec![RowUpdate::Working, RowUpdate::Answered("first answer".to_string())]
    );
    assert!(matches!(
        results.events_for("c2").as_slice(),
        [RowUpdate::Working, RowUpdate::Failed(_)]
    ));

    // Each request is bound to its row's conversation.
    let requests = completion.requests.lock().unwrap().clone();
    let targets: Vec<Option<String>> = requests.iter().map(|r| r.conversation_id.clone()).collect();
    assert_eq!(targets, vec![Some("c1".to_string()), Some("c2".to_string())]);
}
