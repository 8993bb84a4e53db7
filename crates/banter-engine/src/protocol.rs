//! Record types exchanged with the hosted chat service.

use serde::{Deserialize, Serialize};

/// One row in a conversation listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationSummary {
    #[serde(alias = "uuid")]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub updated_at: Option<String>,
    #[serde(default)]
    pub project_id: Option<String>,
}

/// A full conversation with its message transcript.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    #[serde(alias = "uuid")]
    pub id: String,
    pub name: String,
    #[serde(default, alias = "chat_messages")]
    pub messages: Vec<Message>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(alias = "uuid")]
    pub id: String,
    pub sender: Sender,
    pub text: String,
    #[serde(default)]
    pub created_at: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    Human,
    Assistant,
}

/// A positive verdict from the search classifier, tied back to its row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub conversation_id: String,
    pub message_id: String,
    pub match_reason: String,
    pub relevant_snippet: String,
}

/// An artifact block lifted out of an assistant message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    pub identifier: String,
    pub kind: String,
    pub title: String,
    pub content: String,
}

/// An assistant message the user marked for later.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StarredMessage {
    pub conversation_id: Option<String>,
    pub text: String,
    pub starred_at: u64,
}
