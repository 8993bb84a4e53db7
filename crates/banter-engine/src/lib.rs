//! Execution engine for banter scripts.
//!
//! Parsing lives in `banter-script`; this crate runs the parsed
//! scripts against a hosted chat page. Everything the engine touches
//! sits behind a trait (page observation, prompt submission,
//! completions, retrieval, storage, progress sinks), so backends and
//! tests plug in their own implementations.

pub mod annotations;
pub mod artifacts;
pub mod batch;
pub mod completion;
pub mod format;
pub mod history;
pub mod page;
pub mod prompt;
pub mod protocol;
pub mod retrieval;
pub mod runner;
pub mod session;
pub mod sink;
pub mod store;

pub use annotations::{AliasStore, StarStore};
pub use batch::{BatchError, BatchOutcome, BatchPipeline};
pub use completion::{
    ChatMessage, CompletionClient, CompletionError, CompletionRequest, Role, SamplingOptions,
};
pub use history::ScriptHistory;
pub use page::{PageContext, PageError, PromptSubmitter, ResponseObserver};
pub use prompt::{
    DEFAULT_MAX_TRIES, EngineError, EngineTiming, LoopOutcome, PromptEngine, StopOutcome,
};
pub use protocol::{
    Artifact, Conversation, ConversationSummary, Message, SearchResult, Sender, StarredMessage,
};
pub use retrieval::{CachingConversationClient, ConversationClient, RetrievalError};
pub use runner::{RunOutcome, RunSummary, RunnerError, RunnerServices, ScriptRunner};
pub use session::{AlreadyRunning, CancelToken, Cancelled, ExecutionSession};
pub use sink::{LogKind, LogSink, ResultSink, RowSeed, RowUpdate, SessionStatus, StatusSink};
pub use store::{CacheTtl, KeyValueStore, MemoryStore};
