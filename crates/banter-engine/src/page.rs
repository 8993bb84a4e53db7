//! Capability traits over the hosted chat page.
//!
//! The engine never touches a browser directly; it talks to these
//! narrow traits so tests can script page behavior and the hosted
//! backend can implement them over a real tab.

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PageError {
    #[error("element not found: {0}")]
    ElementNotFound(String),
    #[error("page script failed: {0}")]
    Script(String),
    #[error("page context unavailable: {0}")]
    Context(String),
}

/// Read-only view of the response area, polled by the prompt engine.
#[async_trait]
pub trait ResponseObserver: Send + Sync {
    /// Number of message blocks currently rendered in the conversation.
    async fn message_count(&self) -> Result<usize, PageError>;

    /// Whether any message block is still marked as streaming.
    async fn is_streaming(&self) -> Result<bool, PageError>;

    /// Full text of the most recent assistant message.
    async fn latest_message_text(&self) -> Result<String, PageError>;

    /// Whether the service is showing its message-limit banner.
    async fn has_limit_banner(&self) -> Result<bool, PageError>;
}

/// Puts a prompt into the page input and triggers submission.
#[async_trait]
pub trait PromptSubmitter: Send + Sync {
    async fn submit(&self, text: &str) -> Result<(), PageError>;
}

/// Identifiers scraped from the page the engine is attached to.
#[async_trait]
pub trait PageContext: Send + Sync {
    async fn organization_id(&self) -> Result<String, PageError>;

    /// Project the open page belongs to, when it is a project page.
    async fn project_id(&self) -> Result<Option<String>, PageError>;

    /// Conversation open in the page, when one is open.
    async fn conversation_id(&self) -> Result<Option<String>, PageError>;
}
