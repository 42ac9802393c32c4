use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::Source;

/// Title stored when the upstream conversation has none.
pub const DEFAULT_TITLE: &str = "Untitled Conversation";

/// One turn of a conversation. Timestamps are milliseconds since the epoch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub created_at: i64,
    pub author: Author,
    /// Markdown text.
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Author {
    User,
    Assistant,
}

/// A normalized conversation as stored in the archive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub source: Source,
    #[serde(default = "default_title")]
    pub title: String,
    pub created_at: i64,
    pub updated_at: i64,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub meta: Option<String>,
    #[serde(default)]
    pub tags: Option<String>,
    #[serde(default)]
    pub messages: Vec<Message>,
    /// Precomputed JSON payload. Takes precedence over `messages` on write and
    /// carries the stored text on read.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

fn default_title() -> String {
    DEFAULT_TITLE.to_string()
}

impl Conversation {
    pub fn new(id: impl Into<String>, source: Source, created_at: i64, updated_at: i64) -> Self {
        Self {
            id: id.into(),
            source,
            title: default_title(),
            created_at,
            updated_at,
            url: None,
            meta: None,
            tags: None,
            messages: Vec::new(),
            content: None,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        let title = title.into();
        if !title.trim().is_empty() {
            self.title = title;
        }
        self
    }

    pub fn with_messages(mut self, messages: Vec<Message>) -> Self {
        self.messages = messages;
        self
    }

    /// JSON text persisted in the `content` column. Blank messages never reach storage.
    pub fn content_json(&self) -> Result<String> {
        if let Some(content) = &self.content {
            // Reads decode this column as messages, so anything else is refused here.
            serde_json::from_str::<Vec<Message>>(content).map_err(|e| {
                Error::Constraint(format!(
                    "content of {} is not a message array: {e}",
                    self.id
                ))
            })?;
            return Ok(content.clone());
        }

        let kept: Vec<&Message> = self
            .messages
            .iter()
            .filter(|m| !m.content.trim().is_empty())
            .collect();
        Ok(serde_json::to_string(&kept)?)
    }
}
