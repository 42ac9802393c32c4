//! ChatGPT `conversations.json` export and `backend-api/conversation/{id}` payloads.

use serde::Deserialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use tracing::debug;
use zebra_common::{Author, Conversation, Error, Message, Result, Source};

use crate::time::to_millis;

#[derive(Debug, Deserialize)]
struct RawConversation {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    conversation_id: Option<String>,
    #[serde(default)]
    current_node: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    create_time: Value,
    #[serde(default)]
    update_time: Value,
    #[serde(default)]
    mapping: BTreeMap<String, RawNode>,
}

#[derive(Debug, Deserialize)]
struct RawNode {
    #[serde(default)]
    message: Option<RawMessage>,
    #[serde(default)]
    parent: Option<String>,
    #[serde(default)]
    children: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RawMessage {
    author: RawAuthor,
    #[serde(default)]
    create_time: Value,
    #[serde(default)]
    content: Option<RawContent>,
}

#[derive(Debug, Deserialize)]
struct RawAuthor {
    role: String,
}

#[derive(Debug, Default, Deserialize)]
struct RawContent {
    #[serde(default)]
    parts: Vec<Value>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    thoughts: Vec<RawThought>,
}

#[derive(Debug, Deserialize)]
struct RawThought {
    #[serde(default)]
    content: String,
}

pub fn normalize(value: Value) -> Result<Conversation> {
    let raw: RawConversation = serde_json::from_value(value)?;

    let id = raw
        .id
        .or(raw.conversation_id)
        .or(raw.current_node)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| Error::Other("chatgpt conversation has no id".into()))?;

    let created_at = to_millis(&raw.create_time).unwrap_or(0);
    let updated_at = to_millis(&raw.update_time).unwrap_or(created_at);
    let messages = collect_messages(&raw.mapping, created_at);
    debug!("chatgpt conversation {id}: {} messages", messages.len());

    let mut conversation = Conversation::new(id, Source::ChatGpt, created_at, updated_at)
        .with_title(raw.title.unwrap_or_default())
        .with_messages(messages);
    conversation.url = Some(format!("https://chatgpt.com/c/{}", conversation.id));
    Ok(conversation)
}

/// Walk the message tree from its roots, keeping user and assistant turns that
/// carry text, in chronological order.
fn collect_messages(mapping: &BTreeMap<String, RawNode>, fallback_time: i64) -> Vec<Message> {
    let mut pending: Vec<&str> = mapping
        .iter()
        .filter(|(_, node)| {
            node.parent
                .as_deref()
                .is_none_or(|parent| !mapping.contains_key(parent))
        })
        .map(|(key, _)| key.as_str())
        .collect();
    pending.reverse();

    let mut visited = HashSet::new();
    let mut messages = Vec::new();

    while let Some(key) = pending.pop() {
        if !visited.insert(key) {
            continue;
        }
        let Some(node) = mapping.get(key) else {
            continue;
        };

        if let Some(message) = node.message.as_ref().and_then(|m| to_message(m, fallback_time)) {
            messages.push(message);
        }
        pending.extend(node.children.iter().rev().map(String::as_str));
    }

    messages.sort_by_key(|m| m.created_at);
    messages
}

fn to_message(raw: &RawMessage, fallback_time: i64) -> Option<Message> {
    let author = match raw.author.role.as_str() {
        "user" => Author::User,
        "system" | "tool" => return None,
        _ => Author::Assistant,
    };

    let content = raw.content.as_ref().map(text_of).unwrap_or_default();
    if content.trim().is_empty() {
        return None;
    }

    Some(Message {
        created_at: to_millis(&raw.create_time).unwrap_or(fallback_time),
        author,
        content,
    })
}

fn text_of(content: &RawContent) -> String {
    let parts: Vec<&str> = content
        .parts
        .iter()
        .filter_map(|part| match part {
            Value::String(s) => Some(s.as_str()),
            Value::Object(map) => map.get("text").and_then(Value::as_str),
            _ => None,
        })
        .filter(|s| !s.is_empty())
        .collect();
    if !parts.is_empty() {
        return parts.join("\n");
    }

    if let Some(text) = content.text.as_deref().filter(|t| !t.is_empty()) {
        return text.to_string();
    }

    content
        .thoughts
        .iter()
        .map(|t| t.content.as_str())
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}
