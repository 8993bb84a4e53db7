//! Extraction of artifact blocks from assistant messages.

use std::collections::HashMap;

use lazy_static::lazy_static;
use regex::Regex;

use crate::protocol::{Artifact, Conversation, Sender};

lazy_static! {
    static ref ARTIFACT_TAG: Regex =
        Regex::new(r"(?s)<antArtifact\b([^>]*)>(.*?)</antArtifact>").unwrap();
    static ref TAG_ATTR: Regex = Regex::new(r#"([a-zA-Z_-]+)="([^"]*)""#).unwrap();
}

/// Pull every artifact block out of a conversation, in message order.
/// Only assistant messages are scanned.
pub fn extract_artifacts(conversation: &Conversation) -> Vec<Artifact> {
    let mut artifacts = Vec::new();
    for message in &conversation.messages {
        if message.sender != Sender::Assistant {
            continue;
        }
        for captures in ARTIFACT_TAG.captures_iter(&message.text) {
            let attrs: HashMap<&str, &str> = TAG_ATTR
                .captures_iter(captures.get(1).map_or("", |m| m.as_str()))
                .filter_map(|attr| {
                    Some((attr.get(1)?.as_str(), attr.get(2)?.as_str()))
                })
                .collect();
            artifacts.push(Artifact {
                identifier: attrs.get("identifier").unwrap_or(&"").to_string(),
                kind: attrs.get("type").unwrap_or(&"").to_string(),
                title: attrs.get("title").unwrap_or(&"").to_string(),
                content: captures.get(2).map_or("", |m| m.as_str()).trim().to_string(),
            });
        }
    }
    artifacts
}
