use zebra_common::{Conversation, DEFAULT_TITLE, Error, Message, Result, Source};

use crate::value::SqlValue;

/// Column list shared by every query that materializes a `Conversation`.
pub const CONVERSATION_COLUMNS: &str =
    "id, source, title, created_at, updated_at, url, meta, tags, content";

/// Same columns qualified with the `c` alias.
pub const CONVERSATION_COLUMNS_C: &str =
    "c.id, c.source, c.title, c.created_at, c.updated_at, c.url, c.meta, c.tags, c.content";

/// Typed view of one `conversations` row, mapped positionally exactly once.
#[derive(Debug)]
pub struct ConversationRow {
    pub id: String,
    pub source: Option<String>,
    pub title: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
    pub url: Option<String>,
    pub meta: Option<String>,
    pub tags: Option<String>,
    pub content: String,
}

impl TryFrom<Vec<SqlValue>> for ConversationRow {
    type Error = Error;

    fn try_from(values: Vec<SqlValue>) -> Result<Self> {
        if values.len() != 9 {
            return Err(Error::Database(format!(
                "conversation row has {} columns, expected 9",
                values.len()
            )));
        }
        let mut cols = values.into_iter();

        Ok(Self {
            id: required_text(cols.next(), "id")?,
            source: optional_text(cols.next(), "source")?,
            title: optional_text(cols.next(), "title")?,
            created_at: integer(cols.next(), "created_at")?,
            updated_at: integer(cols.next(), "updated_at")?,
            url: optional_text(cols.next(), "url")?,
            meta: optional_text(cols.next(), "meta")?,
            tags: optional_text(cols.next(), "tags")?,
            content: required_text(cols.next(), "content")?,
        })
    }
}

impl ConversationRow {
    pub fn into_conversation(self) -> Result<Conversation> {
        let messages: Vec<Message> = serde_json::from_str(&self.content)?;

        Ok(Conversation {
            id: self.id,
            source: Source::from(self.source.unwrap_or_default()),
            title: self.title.unwrap_or_else(|| DEFAULT_TITLE.to_string()),
            created_at: self.created_at,
            updated_at: self.updated_at,
            url: self.url,
            meta: self.meta,
            tags: self.tags,
            messages,
            content: Some(self.content),
        })
    }
}

pub fn rows_to_conversations(rows: Vec<Vec<SqlValue>>) -> Result<Vec<Conversation>> {
    rows.into_iter()
        .map(|row| ConversationRow::try_from(row)?.into_conversation())
        .collect()
}

fn required_text(value: Option<SqlValue>, column: &str) -> Result<String> {
    match value {
        Some(SqlValue::Text(s)) => Ok(s),
        other => Err(unexpected(column, other)),
    }
}

fn optional_text(value: Option<SqlValue>, column: &str) -> Result<Option<String>> {
    match value {
        Some(SqlValue::Text(s)) => Ok(Some(s)),
        Some(SqlValue::Null) => Ok(None),
        other => Err(unexpected(column, other)),
    }
}

fn integer(value: Option<SqlValue>, column: &str) -> Result<i64> {
    match value {
        Some(SqlValue::Null) => Ok(0),
        Some(v) => v.as_i64().ok_or_else(|| unexpected(column, Some(v))),
        None => Err(unexpected(column, None)),
    }
}

fn unexpected(column: &str, value: Option<SqlValue>) -> Error {
    let found = value.as_ref().map_or("nothing", SqlValue::type_name);
    Error::Database(format!("unexpected {found} in column {column}"))
}
