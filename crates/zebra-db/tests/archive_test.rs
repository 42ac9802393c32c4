use std::sync::Arc;

use zebra_common::{Author, Conversation, Error, Message, Source};
use zebra_config::{ExecutionStrategy, StorageConfig};
use zebra_db::{ConversationStore, Database, SearchEngine, SearchSession, SqlValue, schema};

const STRATEGIES: [ExecutionStrategy; 2] = [ExecutionStrategy::InProcess, ExecutionStrategy::Worker];

fn open_on_disk(dir: &tempfile::TempDir, strategy: ExecutionStrategy) -> Arc<Database> {
    let config = StorageConfig {
        path: Some(dir.path().join("archive").join("zebra.sqlite3")),
        execution: strategy,
        ..StorageConfig::default()
    };
    Arc::new(Database::open(&config).expect("failed to open on-disk database"))
}

fn chat(id: &str, source: Source, updated_at: i64, title: &str, text: &str) -> Conversation {
    Conversation::new(id, source, updated_at, updated_at)
        .with_title(title)
        .with_messages(vec![
            Message {
                created_at: updated_at,
                author: Author::User,
                content: text.to_string(),
            },
            Message {
                created_at: updated_at + 1,
                author: Author::Assistant,
                content: "Happy to help.".to_string(),
            },
        ])
}

async fn fts_rows(db: &Database, id: &str) -> i64 {
    let rows = db
        .execute(
            "SELECT count(*) FROM conversations_fts_idx WHERE rowid_original_conversations = ?1",
            vec![id.into()],
        )
        .await
        .expect("count fts rows");
    rows[0][0].as_i64().expect("integer count")
}

#[tokio::test]
async fn saved_conversation_is_searchable_and_listed() {
    for strategy in STRATEGIES {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = open_on_disk(&dir, strategy);
        let store = ConversationStore::new(Arc::clone(&db));

        store
            .upsert_one(&chat(
                "c1",
                Source::ChatGpt,
                1_700_000_000_000,
                "Trip planning",
                "Plan a week in Kyoto",
            ))
            .await
            .expect("save");

        let session = SearchSession::new(Arc::new(SearchEngine::new(Arc::clone(&db), 10)));
        let page = session.new_search("kyoto", None).await.expect("search");
        assert_eq!(page.conversations.len(), 1);
        assert_eq!(page.conversations[0].title, "Trip planning");
        assert!(!page.has_more);

        let listed = store
            .list(10, 0, Some(&Source::ChatGpt))
            .await
            .expect("list");
        assert_eq!(listed[0].id, "c1");
        assert_eq!(listed[0].messages.len(), 2);
    }
}

#[tokio::test]
async fn full_text_index_follows_replace_and_delete() {
    for strategy in STRATEGIES {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = open_on_disk(&dir, strategy);
        let store = ConversationStore::new(Arc::clone(&db));
        let engine = SearchEngine::new(Arc::clone(&db), 10);

        store
            .upsert_one(&chat("c1", Source::Claude, 1, "Gardening", "tomato seedlings"))
            .await
            .expect("save");
        store
            .upsert_one(&chat("c1", Source::Claude, 2, "Gardening", "pepper seedlings"))
            .await
            .expect("replace");

        assert_eq!(fts_rows(&db, "c1").await, 1);
        assert!(
            engine
                .page("tomato", None, 0)
                .await
                .expect("old text")
                .is_empty()
        );
        assert_eq!(engine.page("pepper", None, 0).await.expect("new text").len(), 1);

        store.delete_by_id("c1").await.expect("delete");
        assert_eq!(fts_rows(&db, "c1").await, 0);
        assert!(
            engine
                .page("pepper", None, 0)
                .await
                .expect("deleted")
                .is_empty()
        );
    }
}

#[tokio::test]
async fn pagination_covers_every_row_exactly_once() {
    for strategy in STRATEGIES {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = open_on_disk(&dir, strategy);
        let store = ConversationStore::new(Arc::clone(&db));

        let batch: Vec<Conversation> = (0..25)
            .map(|i| chat(&format!("c{i:02}"), Source::DeepSeek, i, "Notes", "weekly review"))
            .collect();
        store.upsert_many(&batch).await.expect("batch");

        let session = SearchSession::new(Arc::new(SearchEngine::new(Arc::clone(&db), 10)));
        let mut seen = Vec::new();
        let mut page = session.new_search("review", None).await.expect("first");
        let mut sizes = vec![page.conversations.len()];
        seen.extend(page.conversations.drain(..).map(|c| c.id));

        while let Some(mut next) = session.load_more().await.expect("load more") {
            sizes.push(next.conversations.len());
            seen.extend(next.conversations.drain(..).map(|c| c.id));
        }

        assert_eq!(sizes, vec![10, 10, 5]);
        seen.sort();
        seen.dedup();
        assert_eq!(seen.len(), 25);

        let mut listed = Vec::new();
        for offset in [0, 10, 20] {
            listed.extend(store.list(10, offset, None).await.expect("list page"));
        }
        let ids: Vec<&str> = listed.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids.len(), 25);
        assert_eq!(ids[0], "c24");
        assert_eq!(ids[24], "c00");
    }
}

#[tokio::test]
async fn failed_batch_leaves_no_partial_writes() {
    for strategy in STRATEGIES {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = open_on_disk(&dir, strategy);
        let store = ConversationStore::new(Arc::clone(&db));

        let mut broken = chat("bad", Source::Claude, 3, "Broken", "x");
        broken.content = Some("{oops".to_string());
        let batch = vec![
            chat("ok1", Source::Claude, 1, "Fine", "first"),
            chat("ok2", Source::Claude, 2, "Fine", "second"),
            broken,
        ];

        let err = store.upsert_many(&batch).await.expect_err("invalid content");
        assert!(matches!(err, Error::Constraint(_)), "got {err:?}");
        assert_eq!(store.count(None).await.expect("count"), 0);

        // A statement failing mid-transaction undoes the rows written before it.
        let err = db
            .run_in_transaction(|tx| {
                Box::pin(async move {
                    for id in ["ok1", "ok2", "bad"] {
                        let content = if id == "bad" { "{oops" } else { "[]" };
                        tx.execute(
                            "INSERT INTO conversations (id, source, title, created_at, updated_at, content)
                             VALUES (?1, 'claude', 'Fine', 1, 1, ?2)",
                            vec![id.into(), content.into()],
                        )
                        .await?;
                    }
                    Ok(())
                })
            })
            .await
            .expect_err("trigger rejects invalid json");
        assert!(matches!(err, Error::Constraint(_)), "got {err:?}");
        assert_eq!(store.count(None).await.expect("count"), 0);
        assert_eq!(fts_rows(&db, "ok1").await, 0);

        store
            .upsert_many(&batch[..2])
            .await
            .expect("store is usable after the rollback");
        assert_eq!(store.count(None).await.expect("count"), 2);
    }
}

#[tokio::test]
async fn data_survives_reopen() {
    let dir = tempfile::tempdir().expect("tempdir");
    {
        let db = open_on_disk(&dir, ExecutionStrategy::Worker);
        ConversationStore::new(db)
            .upsert_one(&chat("keep", Source::ChatGpt, 5, "Persisted", "still here"))
            .await
            .expect("save");
    }

    let db = open_on_disk(&dir, ExecutionStrategy::InProcess);
    assert!(schema::verify(&db).await.expect("verify").is_complete());
    let restored = ConversationStore::new(db)
        .get_by_id("keep")
        .await
        .expect("get")
        .expect("row survived");
    assert_eq!(restored.title, "Persisted");
}

#[tokio::test]
async fn raw_queries_return_row_major_values() {
    let dir = tempfile::tempdir().expect("tempdir");
    let db = open_on_disk(&dir, ExecutionStrategy::Worker);
    let store = ConversationStore::new(Arc::clone(&db));
    store
        .upsert_one(&chat("r1", Source::Claude, 9, "Raw", "x"))
        .await
        .expect("save");

    let rows = store
        .raw_query(
            "SELECT id, updated_at, url FROM conversations WHERE source = ?1",
            vec!["claude".into()],
        )
        .await
        .expect("query");
    assert_eq!(
        rows,
        vec![vec![
            SqlValue::Text("r1".into()),
            SqlValue::Integer(9),
            SqlValue::Null
        ]]
    );

    let err = store
        .raw_query("SELEC nonsense", vec![])
        .await
        .expect_err("syntax error");
    assert!(matches!(err, Error::Query(_)), "got {err:?}");
}
