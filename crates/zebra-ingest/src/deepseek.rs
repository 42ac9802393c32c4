//! DeepSeek exports. Two shapes are accepted: the data export, whose `mapping`
//! tree hangs off a `"root"` node, and the `chat/history_messages` API reply.

use serde::Deserialize;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use tracing::debug;
use zebra_common::{Author, Conversation, Error, Message, Result, Source};

use crate::time::to_millis;

const ROOT: &str = "root";

#[derive(Debug, Deserialize)]
struct RawExport {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    inserted_at: Value,
    #[serde(default)]
    updated_at: Value,
    #[serde(default)]
    mapping: HashMap<String, RawNode>,
}

#[derive(Debug, Deserialize)]
struct RawNode {
    #[serde(default)]
    children: Vec<String>,
    #[serde(default)]
    message: Option<RawMessage>,
}

#[derive(Debug, Default, Deserialize)]
struct RawMessage {
    #[serde(default)]
    role: Option<String>,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    fragments: Vec<RawFragment>,
    #[serde(default)]
    inserted_at: Value,
}

#[derive(Debug, Deserialize)]
struct RawFragment {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize)]
struct ApiReply {
    data: ApiData,
}

#[derive(Debug, Deserialize)]
struct ApiData {
    biz_data: ApiBizData,
}

#[derive(Debug, Deserialize)]
struct ApiBizData {
    chat_session: ApiSession,
    #[serde(default)]
    chat_messages: Vec<RawMessage>,
}

#[derive(Debug, Deserialize)]
struct ApiSession {
    id: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    inserted_at: Value,
    #[serde(default)]
    updated_at: Value,
}

pub fn normalize(value: Value) -> Result<Conversation> {
    if value.get("data").is_some() {
        let reply: ApiReply = serde_json::from_value(value)?;
        let session = reply.data.biz_data.chat_session;
        let messages = reply.data.biz_data.chat_messages.iter().collect();
        return Ok(build(
            session.id,
            session.title,
            &session.inserted_at,
            &session.updated_at,
            messages,
        ));
    }

    let raw: RawExport = serde_json::from_value(value)?;
    let id = raw
        .id
        .filter(|id| !id.is_empty())
        .ok_or_else(|| Error::Other("deepseek conversation has no id".into()))?;
    let thread = main_thread(&raw.mapping);
    Ok(build(id, raw.title, &raw.inserted_at, &raw.updated_at, thread))
}

/// Messages on the first-child path below the root node.
fn main_thread(mapping: &HashMap<String, RawNode>) -> Vec<&RawMessage> {
    let mut thread = Vec::new();
    let mut visited = HashSet::new();
    let mut next = mapping
        .get(ROOT)
        .and_then(|root| root.children.first())
        .map(String::as_str);

    while let Some(key) = next {
        if !visited.insert(key) {
            break;
        }
        let Some(node) = mapping.get(key) else {
            break;
        };
        if let Some(message) = &node.message {
            thread.push(message);
        }
        next = node.children.first().map(String::as_str);
    }
    thread
}

fn build(
    id: String,
    title: Option<String>,
    inserted_at: &Value,
    updated_at: &Value,
    thread: Vec<&RawMessage>,
) -> Conversation {
    let created_at = to_millis(inserted_at).unwrap_or(0);
    let updated_at = to_millis(updated_at).unwrap_or(created_at);

    let mut messages = Vec::new();
    for (turn, raw) in thread.into_iter().enumerate() {
        let content = text_of(raw);
        if content.trim().is_empty() {
            continue;
        }
        messages.push(Message {
            created_at: to_millis(&raw.inserted_at).unwrap_or(created_at),
            author: author_of(raw, turn),
            content,
        });
    }
    debug!("deepseek conversation {id}: {} messages", messages.len());

    Conversation::new(id, Source::DeepSeek, created_at, updated_at)
        .with_title(title.unwrap_or_default())
        .with_messages(messages)
}

/// Explicit role first, then fragment type, then strict user/assistant alternation.
fn author_of(raw: &RawMessage, turn: usize) -> Author {
    let hint = raw
        .role
        .as_deref()
        .or_else(|| raw.fragments.first().map(|f| f.kind.as_str()))
        .map(str::to_ascii_lowercase);

    match hint.as_deref() {
        Some("user" | "request") => Author::User,
        Some("assistant" | "response" | "think") => Author::Assistant,
        _ if turn % 2 == 0 => Author::User,
        _ => Author::Assistant,
    }
}

fn text_of(raw: &RawMessage) -> String {
    if raw.fragments.is_empty() {
        return raw.content.clone().unwrap_or_default();
    }
    raw.fragments
        .iter()
        .map(|f| f.content.as_str())
        .filter(|c| !c.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}
