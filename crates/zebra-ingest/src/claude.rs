//! Claude.ai data export (`conversations.json`).

use serde::Deserialize;
use serde_json::Value;
use tracing::debug;
use zebra_common::{Author, Conversation, Error, Message, Result, Source};

use crate::time::to_millis;

#[derive(Debug, Deserialize)]
struct RawConversation {
    #[serde(default)]
    uuid: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    created_at: Value,
    #[serde(default)]
    updated_at: Value,
    #[serde(default)]
    chat_messages: Vec<RawMessage>,
}

#[derive(Debug, Deserialize)]
struct RawMessage {
    #[serde(default)]
    sender: String,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    content: Vec<RawBlock>,
    #[serde(default)]
    created_at: Value,
}

#[derive(Debug, Deserialize)]
struct RawBlock {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

pub fn normalize(value: Value) -> Result<Conversation> {
    let raw: RawConversation = serde_json::from_value(value)?;
    let id = raw
        .uuid
        .filter(|id| !id.is_empty())
        .ok_or_else(|| Error::Other("claude conversation has no uuid".into()))?;

    let created_at = to_millis(&raw.created_at).unwrap_or(0);
    let updated_at = to_millis(&raw.updated_at).unwrap_or(created_at);

    let messages: Vec<Message> = raw
        .chat_messages
        .iter()
        .filter_map(|m| to_message(m, created_at))
        .collect();
    debug!("claude conversation {id}: {} messages", messages.len());

    let mut conversation = Conversation::new(id, Source::Claude, created_at, updated_at)
        .with_title(raw.name.unwrap_or_default())
        .with_messages(messages);
    conversation.url = Some(format!("https://claude.ai/chat/{}", conversation.id));
    Ok(conversation)
}

fn to_message(raw: &RawMessage, fallback_time: i64) -> Option<Message> {
    let author = match raw.sender.as_str() {
        "human" | "user" => Author::User,
        _ => Author::Assistant,
    };

    let blocks: Vec<&str> = raw
        .content
        .iter()
        .filter(|b| b.kind == "text")
        .filter_map(|b| b.text.as_deref())
        .filter(|t| !t.is_empty())
        .collect();
    let content = if blocks.is_empty() {
        raw.text.clone().unwrap_or_default()
    } else {
        blocks.join("\n")
    };
    if content.trim().is_empty() {
        return None;
    }

    Some(Message {
        created_at: to_millis(&raw.created_at).unwrap_or(fallback_time),
        author,
        content,
    })
}
