use std::sync::Arc;
use tracing::debug;
use zebra_common::{Error, Result};

use crate::engine::Database;
use crate::value::SqlValue;

/// Attachment cache keyed by filename. Rows live independently of conversations.
#[derive(Clone)]
pub struct ImageStore {
    db: Arc<Database>,
}

impl ImageStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub async fn save(&self, filename: &str, data: Vec<u8>) -> Result<bool> {
        if filename.trim().is_empty() {
            return Err(Error::Other("image filename cannot be empty".into()));
        }

        let size = data.len();
        self.db
            .execute(
                "INSERT OR REPLACE INTO images (filename, data) VALUES (?1, ?2)",
                vec![filename.into(), SqlValue::Blob(data)],
            )
            .await?;
        debug!("saved image {filename} ({size} bytes)");
        Ok(true)
    }

    pub async fn get(&self, filename: &str) -> Result<Option<Vec<u8>>> {
        let rows = self
            .db
            .execute(
                "SELECT data FROM images WHERE filename = ?1",
                vec![filename.into()],
            )
            .await?;

        match rows.into_iter().next().and_then(|row| row.into_iter().next()) {
            None => Ok(None),
            Some(SqlValue::Blob(data)) => Ok(Some(data)),
            Some(other) => Err(Error::Database(format!(
                "image {filename} holds {} instead of a blob",
                other.type_name()
            ))),
        }
    }

    pub async fn list(&self) -> Result<Vec<String>> {
        let rows = self
            .db
            .execute("SELECT filename FROM images ORDER BY filename", vec![])
            .await?;

        Ok(rows
            .into_iter()
            .filter_map(|row| match row.into_iter().next() {
                Some(SqlValue::Text(name)) => Some(name),
                _ => None,
            })
            .collect())
    }

    pub async fn delete(&self, filename: &str) -> Result<bool> {
        self.db
            .execute(
                "DELETE FROM images WHERE filename = ?1",
                vec![filename.into()],
            )
            .await?;
        Ok(true)
    }
}
