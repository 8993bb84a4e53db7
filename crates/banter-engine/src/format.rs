//! Conversation formatting for classification prompts.

use lazy_static::lazy_static;
use regex::Regex;
use serde_json::{Value, json};

use crate::protocol::{Conversation, Sender};

/// Messages longer than this are dropped from digests; they blow the
/// prompt budget without improving classification.
pub const MAX_MESSAGE_CHARS: usize = 4000;

lazy_static! {
    static ref TITLED_ARTIFACT: Regex = Regex::new(
        r#"(?s)<antArtifact\b[^>]*?title="([^"]*)"[^>]*>.*?</antArtifact>"#
    )
    .unwrap();
    static ref ANY_ARTIFACT: Regex =
        Regex::new(r"(?s)<antArtifact\b[^>]*>.*?</antArtifact>").unwrap();
    static ref THINKING_BLOCK: Regex =
        Regex::new(r"(?s)<antThinking>.*?</antThinking>").unwrap();
}

/// Replace artifact blocks with short placeholders and drop internal
/// thinking markup, so digests carry prose rather than payloads.
pub fn strip_markup(text: &str) -> String {
    let text = TITLED_ARTIFACT.replace_all(text, "[artifact: $1]");
    let text = ANY_ARTIFACT.replace_all(&text, "[artifact]");
    let text = THINKING_BLOCK.replace_all(&text, "");
    text.into_owned()
}

/// Compact JSON view of a conversation for embedding in a prompt.
/// Empty and over-length messages are dropped.
pub fn conversation_digest(conversation: &Conversation) -> Value {
    let messages: Vec<Value> = conversation
        .messages
        .iter()
        .filter_map(|message| {
            let text = strip_markup(&message.text);
            let text = text.trim();
            if text.is_empty() || text.chars().count() > MAX_MESSAGE_CHARS {
                return None;
            }
            let sender = match message.sender {
                Sender::Human => "human",
                Sender::Assistant => "assistant",
            };
            Some(json!({ "id": message.id, "sender": sender, "text": text }))
        })
        .collect();
    json!({
        "conversation_id": conversation.id,
        "name": conversation.name,
        "messages": messages,
    })
}
