//! Conversation retrieval, with a TTL cache layered over the raw
//! client so batch work does not refetch the same transcript.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

use crate::protocol::{Conversation, ConversationSummary};
use crate::store::{self, CacheTtl, KeyValueStore};

/// Cache window for fetched conversations and listings.
pub const CONVERSATION_CACHE_TTL: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("retrieval request failed: {0}")]
    Transport(String),
    #[error("retrieval service error ({status}): {message}")]
    Api { status: u16, message: String },
    #[error("malformed retrieval payload: {0}")]
    Decode(String),
}

#[async_trait]
pub trait ConversationClient: Send + Sync {
    /// List conversations in an organization, narrowed to a project
    /// when one is given.
    async fn list_conversations(
        &self,
        organization_id: &str,
        project_id: Option<&str>,
    ) -> Result<Vec<ConversationSummary>, RetrievalError>;

    /// Fetch one conversation with its full transcript.
    async fn conversation(
        &self,
        organization_id: &str,
        conversation_id: &str,
    ) -> Result<Conversation, RetrievalError>;
}

/// Caching wrapper. Hits serve stored copies inside the TTL window;
/// errors are never cached.
pub struct CachingConversationClient {
    inner: Arc<dyn ConversationClient>,
    store: Arc<dyn KeyValueStore>,
    ttl: Duration,
}

impl CachingConversationClient {
    pub fn new(inner: Arc<dyn ConversationClient>, store: Arc<dyn KeyValueStore>) -> Self {
        Self { inner, store, ttl: CONVERSATION_CACHE_TTL }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    fn listing_key(organization_id: &str, project_id: Option<&str>) -> String {
        format!("conversations:{organization_id}:{}", project_id.unwrap_or("all"))
    }

    fn conversation_key(organization_id: &str, conversation_id: &str) -> String {
        format!("conversation:{organization_id}:{conversation_id}")
    }
}

#[async_trait]
impl ConversationClient for CachingConversationClient {
    async fn list_conversations(
        &self,
        organization_id: &str,
        project_id: Option<&str>,
    ) -> Result<Vec<ConversationSummary>, RetrievalError> {
        let key = Self::listing_key(organization_id, project_id);
        if let Some(cached) = store::get_typed::<Vec<ConversationSummary>>(self.store.as_ref(), &key) {
            debug!(key, rows = cached.len(), "conversation listing served from cache");
            return Ok(cached);
        }
        let listing = self.inner.list_conversations(organization_id, project_id).await?;
        store::set_typed(self.store.as_ref(), &key, &listing, CacheTtl::For(self.ttl));
        Ok(listing)
    }

    async fn conversation(
        &self,
        organization_id: &str,
        conversation_id: &str,
    ) -> Result<Conversation, RetrievalError> {
        let key = Self::conversation_key(organization_id, conversation_id);
        if let Some(cached) = store::get_typed::<Conversation>(self.store.as_ref(), &key) {
            debug!(key, "conversation served from cache");
            return Ok(cached);
        }
        let conversation = self.inner.conversation(organization_id, conversation_id).await?;
        store::set_typed(self.store.as_ref(), &key, &conversation, CacheTtl::For(self.ttl));
        Ok(conversation)
    }
}
