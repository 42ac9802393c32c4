use futures::future::BoxFuture;
use std::sync::Arc;
use tracing::{debug, warn};
use zebra_common::Result;

use crate::engine::{Database, StorageBackend};
use crate::value::{Rows, SqlValue};

/// Statement executor bound to an open transaction.
pub struct Transaction {
    backend: Arc<dyn StorageBackend>,
}

impl Transaction {
    pub async fn execute(&self, sql: &str, params: Vec<SqlValue>) -> Result<Rows> {
        self.backend.execute(sql, params).await
    }
}

/// Rolls back if the transaction future is dropped before it finished.
struct AbandonGuard {
    backend: Arc<dyn StorageBackend>,
    armed: bool,
}

impl Drop for AbandonGuard {
    fn drop(&mut self) {
        if self.armed {
            warn!("transaction abandoned before completion, rolling back");
            self.backend.abort_transaction();
        }
    }
}

impl Database {
    /// Run `body` between `BEGIN` and `COMMIT`. Any error from `body` (or from the
    /// commit itself) rolls the transaction back and is returned unchanged; a failed
    /// rollback is only logged.
    ///
    /// `body` must issue its statements through the `Transaction` it receives:
    /// calling `Database::execute` from inside would wait on the gate this call holds.
    pub async fn run_in_transaction<T, F>(&self, body: F) -> Result<T>
    where
        T: Send,
        F: for<'t> FnOnce(&'t Transaction) -> BoxFuture<'t, Result<T>> + Send,
    {
        let _gate = self.gate.lock().await;

        self.backend.execute_batch("BEGIN IMMEDIATE").await?;
        let mut guard = AbandonGuard {
            backend: Arc::clone(&self.backend),
            armed: true,
        };

        let tx = Transaction {
            backend: Arc::clone(&self.backend),
        };
        let outcome = match body(&tx).await {
            Ok(value) => match self.backend.execute_batch("COMMIT").await {
                Ok(()) => {
                    debug!("transaction committed");
                    Ok(value)
                }
                Err(e) => {
                    self.rollback(&e).await;
                    Err(e)
                }
            },
            Err(e) => {
                self.rollback(&e).await;
                Err(e)
            }
        };

        guard.armed = false;
        outcome
    }

    async fn rollback(&self, cause: &zebra_common::Error) {
        debug!("rolling back transaction: {cause}");
        if let Err(e) = self.backend.execute_batch("ROLLBACK").await {
            warn!("rollback failed after `{cause}`: {e}");
            self.backend.abort_transaction();
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::engine::Database;
    use crate::value::SqlValue;
    use zebra_common::Error;
    use zebra_config::ExecutionStrategy;

    async fn scratch(strategy: ExecutionStrategy) -> Database {
        let db = Database::in_memory(strategy).expect("open");
        db.execute_batch("CREATE TABLE scratch (v INTEGER NOT NULL)")
            .await
            .expect("create scratch table");
        db
    }

    async fn count(db: &Database) -> i64 {
        let rows = db
            .execute("SELECT count(*) FROM scratch", vec![])
            .await
            .expect("count");
        rows[0][0].as_i64().expect("integer count")
    }

    #[tokio::test]
    async fn commit_applies_every_statement() {
        for strategy in [ExecutionStrategy::InProcess, ExecutionStrategy::Worker] {
            let db = scratch(strategy).await;
            let inserted = db
                .run_in_transaction(|tx| {
                    Box::pin(async move {
                        for v in 0..3_i64 {
                            tx.execute("INSERT INTO scratch (v) VALUES (?1)", vec![v.into()])
                                .await?;
                        }
                        Ok(3)
                    })
                })
                .await
                .expect("transaction should commit");

            assert_eq!(inserted, 3);
            assert_eq!(count(&db).await, 3);
        }
    }

    #[tokio::test]
    async fn failure_rolls_back_and_returns_original_error() {
        for strategy in [ExecutionStrategy::InProcess, ExecutionStrategy::Worker] {
            let db = scratch(strategy).await;
            let err = db
                .run_in_transaction(|tx| {
                    Box::pin(async move {
                        tx.execute("INSERT INTO scratch (v) VALUES (1)", vec![])
                            .await?;
                        tx.execute("INSERT INTO scratch (v) VALUES (?1)", vec![SqlValue::Null])
                            .await?;
                        Ok(())
                    })
                })
                .await
                .expect_err("NOT NULL violation should abort");

            assert!(matches!(err, Error::Constraint(_)), "got {err:?}");
            assert_eq!(count(&db).await, 0);
        }
    }

    #[tokio::test]
    async fn no_transaction_outlives_the_call() {
        let db = scratch(ExecutionStrategy::InProcess).await;
        let _ = db
            .run_in_transaction(|_tx| {
                Box::pin(async move { Err::<(), _>(Error::Other("body failed".into())) })
            })
            .await;

        // A nested BEGIN would fail if the previous transaction were still open.
        db.run_in_transaction(|tx| {
            Box::pin(async move {
                tx.execute("INSERT INTO scratch (v) VALUES (7)", vec![])
                    .await?;
                Ok(())
            })
        })
        .await
        .expect("second transaction should start cleanly");
        assert_eq!(count(&db).await, 1);
    }

    #[tokio::test]
    async fn dropped_transaction_is_rolled_back() {
        let db = scratch(ExecutionStrategy::Worker).await;
        {
            let pending = db.run_in_transaction(|tx| {
                Box::pin(async move {
                    tx.execute("INSERT INTO scratch (v) VALUES (1)", vec![])
                        .await?;
                    futures::future::pending::<()>().await;
                    Ok(())
                })
            });
            let _ = tokio::time::timeout(std::time::Duration::from_millis(50), pending).await;
        }

        assert_eq!(count(&db).await, 0);
        db.run_in_transaction(|tx| {
            Box::pin(async move {
                tx.execute("INSERT INTO scratch (v) VALUES (2)", vec![])
                    .await?;
                Ok(())
            })
        })
        .await
        .expect("transaction after an abandoned one should succeed");
        assert_eq!(count(&db).await, 1);
    }
}
