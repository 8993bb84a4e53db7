//! Programmatic completion requests, used when the page cannot be
//! driven (message limit) and for batch classification work.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::session::CancelToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

/// Sampling knobs forwarded verbatim to the completion service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SamplingOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    /// Conversation to continue, or `None` for a detached one-shot.
    pub conversation_id: Option<String>,
    pub messages: Vec<ChatMessage>,
    pub options: SamplingOptions,
}

impl CompletionRequest {
    /// One-shot request carrying a single user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            conversation_id: None,
            messages: vec![ChatMessage { role: Role::User, content: content.into() }],
            options: SamplingOptions::default(),
        }
    }

    /// Request that continues an existing conversation.
    pub fn in_conversation(conversation_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self { conversation_id: Some(conversation_id.into()), ..Self::user(content) }
    }
}

#[derive(Debug, Error)]
pub enum CompletionError {
    #[error("message limit reached")]
    RateLimited,
    #[error("cancelled")]
    Cancelled,
    #[error("completion request failed: {0}")]
    Transport(String),
    #[error("completion service error ({status}): {message}")]
    Api { status: u16, message: String },
    #[error("completion returned no text")]
    Empty,
}

/// Text-in, text-out completion client.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// Run one completion to its end and return the accumulated text.
    /// Implementations check `cancel` between progress steps and give
    /// up with [`CompletionError::Cancelled`] once it trips.
    async fn complete(
        &self,
        request: CompletionRequest,
        cancel: &CancelToken,
    ) -> Result<String, CompletionError>;
}
