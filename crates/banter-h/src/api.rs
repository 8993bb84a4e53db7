//! Same-origin HTTP API client, authenticated with the browser's
//! session cookies. Backs the engine's completion and retrieval
//! collaborators when the page itself cannot be driven.

use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::debug;

use banter_engine::completion::{CompletionClient, CompletionError, CompletionRequest};
use banter_engine::protocol::{Conversation, ConversationSummary};
use banter_engine::retrieval::{ConversationClient, RetrievalError};
use banter_engine::session::CancelToken;

pub struct ApiClient {
    http: reqwest::Client,
    base: String,
    cookie: String,
}

#[derive(Serialize)]
struct CompletionBody<'a> {
    messages: &'a [banter_engine::completion::ChatMessage],
    #[serde(skip_serializing_if = "Option::is_none")]
    conversation_id: Option<&'a str>,
    #[serde(flatten)]
    options: &'a banter_engine::completion::SamplingOptions,
}

#[derive(Deserialize)]
struct CompletionEvent {
    #[serde(default)]
    completion: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

impl ApiClient {
    /// `base` is the origin of the chat site (no trailing slash);
    /// `cookie` is a ready `Cookie` header value, typically from
    /// [`crate::BrowserSession::cookie_header`].
    pub fn new(base: impl Into<String>, cookie: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base: base.into().trim_end_matches('/').to_string(),
            cookie: cookie.into(),
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
    ) -> Result<T, RetrievalError> {
        let url = format!("{}{}", self.base, path);
        debug!(%url, "api fetch");
        let response = self
            .http
            .get(&url)
            .header(reqwest::header::COOKIE, &self.cookie)
            .send()
            .await
            .map_err(|e| RetrievalError::Transport(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(RetrievalError::Api { status: status.as_u16(), message });
        }
        response
            .json()
            .await
            .map_err(|e| RetrievalError::Decode(e.to_string()))
    }
}

#[async_trait]
impl ConversationClient for ApiClient {
    async fn list_conversations(
        &self,
        organization_id: &str,
        project_id: Option<&str>,
    ) -> Result<Vec<ConversationSummary>, RetrievalError> {
        let listing: Vec<ConversationSummary> = self
            .get_json(&format!("/api/organizations/{organization_id}/chat_conversations"))
            .await?;
        Ok(match project_id {
            Some(project) => listing
                .into_iter()
                .filter(|row| row.project_id.as_deref() == Some(project))
                .collect(),
            None => listing,
        })
    }

    async fn conversation(
        &self,
        organization_id: &str,
        conversation_id: &str,
    ) -> Result<Conversation, RetrievalError> {
        self.get_json(&format!(
            "/api/organizations/{organization_id}/chat_conversations/{conversation_id}?rendering_mode=raw"
        ))
        .await
    }
}

#[async_trait]
impl CompletionClient for ApiClient {
    /// Stream one completion to its end and return the accumulated
    /// text. The response arrives as server-sent events; the token is
    /// checked between chunks so a cancel lands mid-stream.
    async fn complete(
        &self,
        request: CompletionRequest,
        cancel: &CancelToken,
    ) -> Result<String, CompletionError> {
        cancel
            .ensure_active()
            .map_err(|_| CompletionError::Cancelled)?;
        let body = CompletionBody {
            messages: &request.messages,
            conversation_id: request.conversation_id.as_deref(),
            options: &request.options,
        };
        let response = self
            .http
            .post(format!("{}/api/completion", self.base))
            .header(reqwest::header::COOKIE, &self.cookie)
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .json(&body)
            .send()
            .await
            .map_err(|e| CompletionError::Transport(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(CompletionError::RateLimited);
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(CompletionError::Api { status: status.as_u16(), message });
        }

        let mut stream = response.bytes_stream();
        let mut buffer = String::new();
        let mut text = String::new();
        while let Some(chunk) = stream.next().await {
            if cancel.is_cancelled() {
                return Err(CompletionError::Cancelled);
            }
            let chunk = chunk.map_err(|e| CompletionError::Transport(e.to_string()))?;
            buffer.push_str(&String::from_utf8_lossy(&chunk));
            while let Some(newline) = buffer.find('\n') {
                let line = buffer[..newline].to_string();
                buffer.drain(..=newline);
                match apply_sse_line(&line) {
                    Ok(Some(fragment)) => text.push_str(&fragment),
                    Ok(None) => {}
                    Err(message) => {
                        return Err(CompletionError::Api { status: status.as_u16(), message });
                    }
                }
            }
        }
        if text.is_empty() {
            return Err(CompletionError::Empty);
        }
        Ok(text)
    }
}

/// One SSE line in, one completion fragment out (when the line carries
/// one). Non-`data:` lines and unparseable payloads are skipped; an
/// in-band error event becomes `Err`.
fn apply_sse_line(line: &str) -> Result<Option<String>, String> {
    let Some(payload) = line.strip_prefix("data:") else {
        return Ok(None);
    };
    let payload = payload.trim();
    if payload.is_empty() || payload == "[DONE]" {
        return Ok(None);
    }
    let Ok(event) = serde_json::from_str::<CompletionEvent>(payload) else {
        return Ok(None);
    };
    if let Some(error) = event.error {
        return Err(error);
    }
    Ok(event.completion)
}
