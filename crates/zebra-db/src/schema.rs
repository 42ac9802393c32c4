//! Fixed, versionless schema. Every statement is `IF NOT EXISTS`, so provisioning
//! runs on every open and never drops data.

use rusqlite::Connection;
use serde::Serialize;
use tracing::debug;
use zebra_common::{Error, Result};

use crate::engine::Database;
use crate::value::SqlValue;

/// A named group of DDL statements applied together.
pub struct SchemaStep {
    pub name: &'static str,
    pub sql: &'static str,
}

pub const CONVERSATIONS_TABLE: SchemaStep = SchemaStep {
    name: "tables",
    sql: "CREATE TABLE IF NOT EXISTS conversations (
            id TEXT PRIMARY KEY,
            source TEXT,
            title TEXT,
            created_at INTEGER,
            updated_at INTEGER,
            url TEXT,
            meta TEXT,
            tags TEXT,
            content TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS images (
            filename TEXT PRIMARY KEY,
            data BLOB NOT NULL
        );",
};

pub const INDEXES: SchemaStep = SchemaStep {
    name: "indexes",
    sql: "CREATE INDEX IF NOT EXISTS conversations_index_0
            ON conversations(source, title, created_at);

        CREATE INDEX IF NOT EXISTS conversations_updated_at_idx
            ON conversations(updated_at DESC);",
};

pub const FULL_TEXT_INDEX: SchemaStep = SchemaStep {
    name: "full_text_index",
    sql: "CREATE VIRTUAL TABLE IF NOT EXISTS conversations_fts_idx USING fts5(
            rowid_original_conversations UNINDEXED,
            title,
            content,
            tokenize = 'unicode61'
        );",
};

/// REPLACE only fires the delete trigger with `recursive_triggers` enabled, which
/// `Database::open` sets on every connection.
pub const FULL_TEXT_TRIGGERS: SchemaStep = SchemaStep {
    name: "full_text_triggers",
    sql: "CREATE TRIGGER IF NOT EXISTS conversations_fts_insert
        AFTER INSERT ON conversations BEGIN
            INSERT INTO conversations_fts_idx (rowid_original_conversations, title, content)
            VALUES (new.id, new.title, new.content);
        END;

        CREATE TRIGGER IF NOT EXISTS conversations_fts_delete
        AFTER DELETE ON conversations BEGIN
            DELETE FROM conversations_fts_idx WHERE rowid_original_conversations = old.id;
        END;

        CREATE TRIGGER IF NOT EXISTS conversations_fts_update
        AFTER UPDATE ON conversations BEGIN
            UPDATE conversations_fts_idx
            SET rowid_original_conversations = new.id,
                title = new.title,
                content = new.content
            WHERE rowid_original_conversations = old.id;
        END;",
};

pub const JSON_GUARDS: SchemaStep = SchemaStep {
    name: "json_guards",
    sql: "CREATE TRIGGER IF NOT EXISTS conversations_content_json_insert
        BEFORE INSERT ON conversations
        WHEN json_valid(new.content) = 0 BEGIN
            SELECT RAISE(ABORT, 'conversation content must be valid JSON');
        END;

        CREATE TRIGGER IF NOT EXISTS conversations_content_json_update
        BEFORE UPDATE OF content ON conversations
        WHEN json_valid(new.content) = 0 BEGIN
            SELECT RAISE(ABORT, 'conversation content must be valid JSON');
        END;",
};

pub const STEPS: &[SchemaStep] = &[
    CONVERSATIONS_TABLE,
    INDEXES,
    FULL_TEXT_INDEX,
    FULL_TEXT_TRIGGERS,
    JSON_GUARDS,
];

/// Every object `provision` creates, by name.
pub const SCHEMA_OBJECTS: &[&str] = &[
    "conversations",
    "images",
    "conversations_index_0",
    "conversations_updated_at_idx",
    "conversations_fts_idx",
    "conversations_fts_insert",
    "conversations_fts_delete",
    "conversations_fts_update",
    "conversations_content_json_insert",
    "conversations_content_json_update",
];

/// Apply every schema step to a freshly opened connection.
pub fn provision(conn: &Connection) -> Result<()> {
    for step in STEPS {
        debug!("applying schema step {}", step.name);
        conn.execute_batch(step.sql).map_err(|e| {
            Error::Initialization(format!("schema step {} failed: {e}", step.name))
        })?;
    }
    Ok(())
}

/// Which of `SCHEMA_OBJECTS` exist in the open database.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SchemaReport {
    pub present: Vec<String>,
    pub missing: Vec<String>,
}

impl SchemaReport {
    pub fn is_complete(&self) -> bool {
        self.missing.is_empty()
    }
}

pub async fn verify(db: &Database) -> Result<SchemaReport> {
    let rows = db
        .execute("SELECT name FROM sqlite_master WHERE name IS NOT NULL", vec![])
        .await?;

    let existing: Vec<String> = rows
        .into_iter()
        .filter_map(|row| match row.into_iter().next() {
            Some(SqlValue::Text(name)) => Some(name),
            _ => None,
        })
        .collect();

    let (present, missing) = SCHEMA_OBJECTS
        .iter()
        .map(|name| name.to_string())
        .partition(|name| existing.contains(name));

    Ok(SchemaReport { present, missing })
}
