use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};
use zebra_common::{Conversation, Result, Source};

use crate::engine::Database;
use crate::row::{CONVERSATION_COLUMNS, ConversationRow, rows_to_conversations};
use crate::value::{Rows, SqlValue};

/// Keeps `IN (...)` lists well below SQLite's bound-parameter ceiling.
const FRESHNESS_CHUNK: usize = 500;

const UPSERT_SQL: &str = "INSERT OR REPLACE INTO conversations (
        id, source, title, created_at, updated_at, url, meta, tags, content
    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)";

/// Upstream identity of a conversation, compared against the archive to decide
/// whether it needs downloading again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FreshnessProbe {
    pub id: String,
    pub updated_at: i64,
}

/// CRUD surface over the `conversations` table.
#[derive(Clone)]
pub struct ConversationStore {
    db: Arc<Database>,
}

impl ConversationStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub async fn upsert_one(&self, conversation: &Conversation) -> Result<bool> {
        let params = upsert_params(conversation)?;
        self.db.execute(UPSERT_SQL, params).await?;
        debug!("upserted conversation {}", conversation.id);
        Ok(true)
    }

    /// Upsert every conversation inside one transaction: either all rows land or
    /// none do.
    pub async fn upsert_many(&self, conversations: &[Conversation]) -> Result<bool> {
        if conversations.is_empty() {
            return Ok(true);
        }

        let batch = conversations
            .iter()
            .map(upsert_params)
            .collect::<Result<Vec<_>>>()?;
        let total = batch.len();

        self.db
            .run_in_transaction(move |tx| {
                Box::pin(async move {
                    for params in batch {
                        tx.execute(UPSERT_SQL, params).await?;
                    }
                    Ok(())
                })
            })
            .await?;

        info!("upserted {total} conversations");
        Ok(true)
    }

    /// Page through conversations, newest `updated_at` first. Returns exactly
    /// `limit` rows while that many remain; a `limit` of zero is an empty page.
    pub async fn list(
        &self,
        limit: usize,
        offset: usize,
        source: Option<&Source>,
    ) -> Result<Vec<Conversation>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let rows = self
            .db
            .execute(
                &format!(
                    "SELECT {CONVERSATION_COLUMNS}
                     FROM conversations
                     WHERE (?1 IS NULL OR source = ?1)
                     ORDER BY updated_at DESC, id ASC
                     LIMIT ?2 OFFSET ?3"
                ),
                vec![
                    source_param(source),
                    limit.into(),
                    offset.into(),
                ],
            )
            .await?;

        rows_to_conversations(rows)
    }

    pub async fn get_by_id(&self, id: &str) -> Result<Option<Conversation>> {
        let rows = self
            .db
            .execute(
                &format!("SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE id = ?1"),
                vec![id.into()],
            )
            .await?;

        rows.into_iter()
            .next()
            .map(|row| ConversationRow::try_from(row)?.into_conversation())
            .transpose()
    }

    /// Delete by id. Succeeds whether or not the row existed; the full-text index
    /// follows through its trigger.
    pub async fn delete_by_id(&self, id: &str) -> Result<bool> {
        self.db
            .execute("DELETE FROM conversations WHERE id = ?1", vec![id.into()])
            .await?;
        debug!("deleted conversation {id}");
        Ok(true)
    }

    /// Arbitrary SQL for diagnostics. Errors are returned as the engine reports them.
    pub async fn raw_query(&self, sql: &str, params: Vec<SqlValue>) -> Result<Rows> {
        self.db.execute(sql, params).await
    }

    pub async fn count(&self, source: Option<&Source>) -> Result<u64> {
        let rows = self
            .db
            .execute(
                "SELECT count(*) FROM conversations WHERE (?1 IS NULL OR source = ?1)",
                vec![source_param(source)],
            )
            .await?;

        Ok(first_integer(&rows).unwrap_or(0).max(0) as u64)
    }

    /// Most recent `updated_at` in the archive, if any rows exist.
    pub async fn latest_updated_at(&self, source: Option<&Source>) -> Result<Option<i64>> {
        let rows = self
            .db
            .execute(
                "SELECT max(updated_at) FROM conversations WHERE (?1 IS NULL OR source = ?1)",
                vec![source_param(source)],
            )
            .await?;

        Ok(first_integer(&rows))
    }

    /// Ids from `candidates` that are missing locally or stored with an older
    /// `updated_at`, in the order given.
    pub async fn stale_ids(&self, candidates: &[FreshnessProbe]) -> Result<Vec<String>> {
        let mut stored: HashMap<String, i64> = HashMap::new();

        for chunk in candidates.chunks(FRESHNESS_CHUNK) {
            let placeholders = vec!["?"; chunk.len()].join(", ");
            let params = chunk.iter().map(|c| SqlValue::from(c.id.as_str())).collect();
            let rows = self
                .db
                .execute(
                    &format!(
                        "SELECT id, updated_at FROM conversations WHERE id IN ({placeholders})"
                    ),
                    params,
                )
                .await?;

            for row in rows {
                let mut cols = row.into_iter();
                if let (Some(SqlValue::Text(id)), Some(updated_at)) = (cols.next(), cols.next()) {
                    stored.insert(id, updated_at.as_i64().unwrap_or(i64::MIN));
                }
            }
        }

        Ok(candidates
            .iter()
            .filter(|c| stored.get(&c.id).is_none_or(|local| *local < c.updated_at))
            .map(|c| c.id.clone())
            .collect())
    }
}

fn upsert_params(conversation: &Conversation) -> Result<Vec<SqlValue>> {
    Ok(vec![
        conversation.id.as_str().into(),
        conversation.source.as_str().into(),
        conversation.title.as_str().into(),
        conversation.created_at.into(),
        conversation.updated_at.into(),
        conversation.url.clone().into(),
        conversation.meta.clone().into(),
        conversation.tags.clone().into(),
        conversation.content_json()?.into(),
    ])
}

fn source_param(source: Option<&Source>) -> SqlValue {
    source.map(Source::as_str).into()
}

fn first_integer(rows: &Rows) -> Option<i64> {
    rows.first()
        .and_then(|row| row.first())
        .and_then(SqlValue::as_i64)
}

#[cfg(test)]
mod tests {
    use super::{ConversationStore, FreshnessProbe};
    use crate::engine::Database;
    use std::sync::Arc;
    use zebra_common::{Author, Conversation, Error, Message, Source};
    use zebra_config::ExecutionStrategy;

    fn store() -> ConversationStore {
        let db = Database::in_memory(ExecutionStrategy::InProcess).expect("open");
        ConversationStore::new(Arc::new(db))
    }

    fn conversation(id: &str, source: Source, updated_at: i64, text: &str) -> Conversation {
        Conversation::new(id, source, updated_at, updated_at)
            .with_title(format!("title {id}"))
            .with_messages(vec![Message {
                created_at: updated_at,
                author: Author::User,
                content: text.to_string(),
            }])
    }

    #[tokio::test]
    async fn upsert_replaces_existing_row() {
        let store = store();
        store
            .upsert_one(&conversation("c1", Source::ChatGpt, 100, "first draft"))
            .await
            .expect("first upsert");
        store
            .upsert_one(&conversation("c1", Source::ChatGpt, 200, "second draft"))
            .await
            .expect("second upsert");

        assert_eq!(store.count(None).await.expect("count"), 1);
        let stored = store
            .get_by_id("c1")
            .await
            .expect("get")
            .expect("row exists");
        assert_eq!(stored.updated_at, 200);
        assert_eq!(stored.messages[0].content, "second draft");
    }

    #[tokio::test]
    async fn list_filters_by_source_and_orders_by_updated_at() {
        let store = store();
        store
            .upsert_many(&[
                conversation("a", Source::Claude, 10, "a"),
                conversation("b", Source::ChatGpt, 30, "b"),
                conversation("c", Source::Claude, 20, "c"),
            ])
            .await
            .expect("upsert batch");

        let all = store.list(10, 0, None).await.expect("list");
        let ids: Vec<&str> = all.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "c", "a"]);

        let claude = store
            .list(10, 0, Some(&Source::Claude))
            .await
            .expect("list claude");
        assert!(claude.iter().all(|c| c.source == Source::Claude));
        assert_eq!(claude.len(), 2);

        let none = store
            .list(10, 0, Some(&Source::DeepSeek))
            .await
            .expect("empty source");
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let store = store();
        store
            .upsert_one(&conversation("gone", Source::DeepSeek, 1, "x"))
            .await
            .expect("upsert");

        assert!(store.delete_by_id("gone").await.expect("delete"));
        assert!(store.delete_by_id("gone").await.expect("second delete"));
        assert!(store.delete_by_id("never-existed").await.expect("missing"));
        assert!(store.get_by_id("gone").await.expect("get").is_none());
    }

    #[tokio::test]
    async fn invalid_precomputed_content_is_a_constraint_violation() {
        let store = store();
        let mut bad = conversation("bad", Source::Claude, 1, "x");
        bad.content = Some("[{\"unterminated\"".to_string());

        let err = store.upsert_one(&bad).await.expect_err("must reject");
        assert!(matches!(err, Error::Constraint(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn raw_query_errors_propagate_unwrapped() {
        let store = store();
        let err = store
            .raw_query("SELECT * FROM no_such_table", vec![])
            .await
            .expect_err("unknown table");
        assert!(matches!(err, Error::Query(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn stale_ids_reports_missing_and_outdated_rows() {
        let store = store();
        store
            .upsert_many(&[
                conversation("same", Source::ChatGpt, 100, "x"),
                conversation("old", Source::ChatGpt, 100, "x"),
            ])
            .await
            .expect("seed");

        let stale = store
            .stale_ids(&[
                FreshnessProbe {
                    id: "same".into(),
                    updated_at: 100,
                },
                FreshnessProbe {
                    id: "old".into(),
                    updated_at: 150,
                },
                FreshnessProbe {
                    id: "new".into(),
                    updated_at: 1,
                },
            ])
            .await
            .expect("freshness check");

        assert_eq!(stale, vec!["old".to_string(), "new".to_string()]);
        assert_eq!(
            store
                .latest_updated_at(Some(&Source::ChatGpt))
                .await
                .expect("latest"),
            Some(100)
        );
        assert_eq!(
            store
                .latest_updated_at(Some(&Source::Claude))
                .await
                .expect("latest"),
            None
        );
    }

    #[tokio::test]
    async fn large_pages_are_not_truncated() {
        let store = store();
        let batch: Vec<Conversation> = (0..600)
            .map(|i| conversation(&format!("c{i:03}"), Source::ChatGpt, i, "x"))
            .collect();
        store.upsert_many(&batch).await.expect("seed");

        assert_eq!(store.list(1000, 0, None).await.expect("list").len(), 600);

        let mut seen = Vec::new();
        let mut offset = 0;
        loop {
            let page = store.list(501, offset, None).await.expect("page");
            let full = page.len() == 501;
            offset += page.len();
            seen.extend(page.into_iter().map(|c| c.id));
            if !full {
                break;
            }
        }
        assert_eq!(seen.len(), 600);
        assert_eq!(seen.first().map(String::as_str), Some("c599"));

        assert!(store.list(0, 0, None).await.expect("zero").is_empty());
    }

    #[tokio::test]
    async fn content_without_message_shape_is_rejected_before_writing() {
        let store = store();
        store
            .upsert_one(&conversation("good", Source::Claude, 1, "hello"))
            .await
            .expect("good row");

        let mut bad = conversation("bad", Source::Claude, 2, "hello");
        bad.content = Some(
            r#"[{"created_at":1,"author":"user","content":"hello"},{"author":"assistant","content":"no timestamp"}]"#
                .to_string(),
        );
        let err = store.upsert_one(&bad).await.expect_err("must reject");
        assert!(matches!(err, Error::Constraint(_)), "got {err:?}");

        let err = store
            .upsert_many(&[conversation("other", Source::Claude, 3, "x"), bad])
            .await
            .expect_err("batch rejected");
        assert!(matches!(err, Error::Constraint(_)), "got {err:?}");

        let listed = store.list(10, 0, None).await.expect("list still readable");
        let ids: Vec<&str> = listed.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["good"]);
    }
}
