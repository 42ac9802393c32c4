//! Local commands that operate on the archive directly, without a gateway.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::info;
use zebra_common::{Conversation, Source};
use zebra_db::{
    ConversationStore, Database, ImageStore, SearchEngine, SearchSession, SqlValue, schema,
};

pub async fn import(db: Arc<Database>, source: &str, file: &Path) -> Result<usize> {
    let source = Source::from(source.to_string());
    let raw = tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("failed to read {}", file.display()))?;

    let conversations = zebra_ingest::parse_export(&source, &raw)?;
    ConversationStore::new(db).upsert_many(&conversations).await?;
    info!("imported {} conversations from {}", conversations.len(), file.display());
    Ok(conversations.len())
}

pub async fn list(
    db: Arc<Database>,
    limit: usize,
    offset: usize,
    source: Option<&str>,
) -> Result<()> {
    let source = Source::parse_filter(source);
    let conversations = ConversationStore::new(db)
        .list(limit, offset, source.as_ref())
        .await?;

    if conversations.is_empty() {
        println!("(no conversations)");
    }
    for conversation in &conversations {
        println!("{}", summary_line(conversation));
    }
    Ok(())
}

pub async fn show(db: Arc<Database>, id: &str) -> Result<()> {
    match ConversationStore::new(db).get_by_id(id).await? {
        Some(mut conversation) => {
            conversation.content = None;
            println!("{}", serde_json::to_string_pretty(&conversation)?);
        }
        None => anyhow::bail!("conversation {id} not found"),
    }
    Ok(())
}

pub async fn search(
    db: Arc<Database>,
    page_size: usize,
    query: &str,
    source: Option<&str>,
    all: bool,
) -> Result<()> {
    let session = SearchSession::new(Arc::new(SearchEngine::new(db, page_size)));
    let mut page = session
        .new_search(query, Source::parse_filter(source))
        .await?;
    let mut shown = 0;

    loop {
        for conversation in &page.conversations {
            println!("{}", summary_line(conversation));
        }
        shown += page.conversations.len();

        if !all || !page.has_more {
            break;
        }
        match session.load_more().await? {
            Some(next) => page = next,
            None => break,
        }
    }

    if shown == 0 {
        println!("(no matches)");
    } else if page.has_more {
        println!("... more results, rerun with --all");
    }
    Ok(())
}

pub async fn delete(db: Arc<Database>, id: &str) -> Result<()> {
    ConversationStore::new(db).delete_by_id(id).await?;
    println!("deleted {id}");
    Ok(())
}

pub async fn query(db: Arc<Database>, sql: &str, params: &[String]) -> Result<()> {
    let params = params.iter().map(|p| parse_param(p)).collect();
    let rows = ConversationStore::new(db).raw_query(sql, params).await?;
    for row in rows {
        println!("{}", serde_json::to_string(&row)?);
    }
    Ok(())
}

pub async fn status(db: Arc<Database>) -> Result<()> {
    let store = ConversationStore::new(Arc::clone(&db));
    let conversations = store.count(None).await?;
    let latest = store.latest_updated_at(None).await?;
    let images = ImageStore::new(Arc::clone(&db)).list().await?.len();
    let report = schema::verify(&db).await?;

    println!("database:      {}", db.location());
    println!("execution:     {:?}", db.strategy());
    println!("conversations: {conversations}");
    println!("last updated:  {}", format_millis(latest));
    println!("images:        {images}");
    if report.is_complete() {
        println!("schema:        ok ({} objects)", report.present.len());
    } else {
        println!("schema:        missing {}", report.missing.join(", "));
    }
    Ok(())
}

/// Command-line parameters are JSON when they parse as a scalar, text otherwise.
pub fn parse_param(raw: &str) -> SqlValue {
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Null) => SqlValue::Null,
        Ok(Value::Number(n)) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => n.as_f64().map_or_else(|| SqlValue::from(raw), SqlValue::Real),
        },
        Ok(Value::String(s)) => SqlValue::Text(s),
        _ => SqlValue::from(raw),
    }
}

fn format_millis(millis: Option<i64>) -> String {
    millis
        .and_then(DateTime::<Utc>::from_timestamp_millis)
        .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "-".to_string())
}

fn summary_line(conversation: &Conversation) -> String {
    let updated = format_millis(Some(conversation.updated_at));
    format!(
        "{updated}  {:<8}  {}  {}",
        conversation.source.as_str(),
        conversation.id,
        conversation.title
    )
}
