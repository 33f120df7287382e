//! Storage handles.
//!
//! [`Executor`] is the seam between query descriptions and storage. [`Db`]
//! is the handle the application holds (a `PostgreSQL` pool or the memory
//! store); [`Transaction`] groups several writes so they commit or roll back
//! together.

use async_trait::async_trait;
use sqlx::{PgPool, Postgres};
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::expr::{AggregateExpr, Node};
use super::memory::{MemoryStore, Tables};
use super::postgres;
use super::query::Query;
use super::schema::{ModelMeta, Schema};
use super::value::{Record, Value};
use super::{RepositoryError, Result};

/// Runs query descriptions against storage.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Rows matching `query`.
    async fn fetch(&self, query: &Query) -> Result<Vec<Record>>;

    /// Aggregates over the rows matching `query`, keyed by name.
    async fn aggregate(
        &self,
        query: &Query,
        aggregates: &[(String, AggregateExpr)],
    ) -> Result<Record>;

    /// Insert one row and return it as stored (with its new `id`).
    async fn insert(
        &self,
        meta: &'static ModelMeta,
        values: Vec<(&'static str, Value)>,
    ) -> Result<Record>;

    /// Assign columns on every row matching `query`.
    async fn update(&self, query: &Query, assignments: &[(&'static str, Node)]) -> Result<u64>;

    /// Delete every row matching `query`, honouring `on_delete` rules.
    async fn delete(&self, query: &Query) -> Result<u64>;

    /// Rows of `meta` from hand-written SQL.
    async fn fetch_raw(
        &self,
        meta: &'static ModelMeta,
        sql: &str,
        params: Vec<Value>,
    ) -> Result<Vec<Record>>;
}

/// Application storage handle.
#[derive(Debug, Clone)]
pub enum Db {
    Postgres(PgPool),
    Memory(MemoryStore),
}

impl Db {
    /// In-process storage for `schema`.
    #[must_use]
    pub fn memory(schema: Schema) -> Self {
        Self::Memory(MemoryStore::new(schema))
    }

    /// Start a transaction.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if a connection cannot be
    /// acquired.
    pub async fn begin(&self) -> Result<Transaction> {
        let kind = match self {
            Self::Postgres(pool) => TxKind::Postgres(Mutex::new(Some(pool.begin().await?))),
            Self::Memory(store) => {
                let origin = store.lock_owned().await;
                TxKind::Memory {
                    working: MemoryStore::detached(origin.clone()),
                    origin,
                }
            }
        };
        Ok(Transaction { kind })
    }

    /// Check that storage is reachable.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the database does not answer.
    pub async fn ping(&self) -> Result<()> {
        match self {
            Self::Postgres(pool) => {
                sqlx::query("SELECT 1").execute(pool).await?;
                Ok(())
            }
            Self::Memory(_) => Ok(()),
        }
    }
}

#[async_trait]
impl Executor for Db {
    async fn fetch(&self, query: &Query) -> Result<Vec<Record>> {
        match self {
            Self::Postgres(pool) => postgres::fetch(&mut *pool.acquire().await?, query).await,
            Self::Memory(store) => store.fetch(query).await,
        }
    }

    async fn aggregate(
        &self,
        query: &Query,
        aggregates: &[(String, AggregateExpr)],
    ) -> Result<Record> {
        match self {
            Self::Postgres(pool) => {
                postgres::aggregate(&mut *pool.acquire().await?, query, aggregates).await
            }
            Self::Memory(store) => store.aggregate(query, aggregates).await,
        }
    }

    async fn insert(
        &self,
        meta: &'static ModelMeta,
        values: Vec<(&'static str, Value)>,
    ) -> Result<Record> {
        match self {
            Self::Postgres(pool) => postgres::insert(&mut *pool.acquire().await?, meta, values).await,
            Self::Memory(store) => store.insert(meta, values).await,
        }
    }

    async fn update(&self, query: &Query, assignments: &[(&'static str, Node)]) -> Result<u64> {
        match self {
            Self::Postgres(pool) => {
                postgres::update(&mut *pool.acquire().await?, query, assignments).await
            }
            Self::Memory(store) => store.update(query, assignments).await,
        }
    }

    async fn delete(&self, query: &Query) -> Result<u64> {
        match self {
            Self::Postgres(pool) => postgres::delete(&mut *pool.acquire().await?, query).await,
            Self::Memory(store) => store.delete(query).await,
        }
    }

    async fn fetch_raw(
        &self,
        meta: &'static ModelMeta,
        sql: &str,
        params: Vec<Value>,
    ) -> Result<Vec<Record>> {
        match self {
            Self::Postgres(pool) => {
                postgres::fetch_raw(&mut *pool.acquire().await?, meta, sql, params).await
            }
            Self::Memory(_) => Err(RepositoryError::Unsupported(
                "raw SQL requires the PostgreSQL backend".to_owned(),
            )),
        }
    }
}

enum TxKind {
    Postgres(Mutex<Option<sqlx::Transaction<'static, Postgres>>>),
    /// Holds the store's lock until commit or rollback, so memory
    /// transactions are serialised against every other access.
    Memory {
        origin: OwnedMutexGuard<Tables>,
        working: MemoryStore,
    },
}

/// A unit of work. Dropping it without [`commit`](Self::commit) rolls
/// everything back.
pub struct Transaction {
    kind: TxKind,
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let backend = match self.kind {
            TxKind::Postgres(_) => "postgres",
            TxKind::Memory { .. } => "memory",
        };
        f.debug_struct("Transaction")
            .field("backend", &backend)
            .finish()
    }
}

fn finished() -> RepositoryError {
    RepositoryError::InvalidQuery("transaction already finished".to_owned())
}

impl Transaction {
    /// Persist every write made through this transaction.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the commit fails.
    pub async fn commit(self) -> Result<()> {
        match self.kind {
            TxKind::Postgres(tx) => {
                let tx = tx.into_inner().ok_or_else(finished)?;
                tx.commit().await?;
            }
            TxKind::Memory {
                mut origin,
                working,
            } => {
                *origin = working.snapshot().await;
            }
        }
        Ok(())
    }

    /// Discard every write made through this transaction.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the rollback fails.
    pub async fn rollback(self) -> Result<()> {
        if let TxKind::Postgres(tx) = self.kind {
            let tx = tx.into_inner().ok_or_else(finished)?;
            tx.rollback().await?;
        }
        Ok(())
    }
}

#[async_trait]
impl Executor for Transaction {
    async fn fetch(&self, query: &Query) -> Result<Vec<Record>> {
        match &self.kind {
            TxKind::Postgres(tx) => {
                let mut guard = tx.lock().await;
                let tx = guard.as_mut().ok_or_else(finished)?;
                postgres::fetch(&mut **tx, query).await
            }
            TxKind::Memory { working, .. } => working.fetch(query).await,
        }
    }

    async fn aggregate(
        &self,
        query: &Query,
        aggregates: &[(String, AggregateExpr)],
    ) -> Result<Record> {
        match &self.kind {
            TxKind::Postgres(tx) => {
                let mut guard = tx.lock().await;
                let tx = guard.as_mut().ok_or_else(finished)?;
                postgres::aggregate(&mut **tx, query, aggregates).await
            }
            TxKind::Memory { working, .. } => working.aggregate(query, aggregates).await,
        }
    }

    async fn insert(
        &self,
        meta: &'static ModelMeta,
        values: Vec<(&'static str, Value)>,
    ) -> Result<Record> {
        match &self.kind {
            TxKind::Postgres(tx) => {
                let mut guard = tx.lock().await;
                let tx = guard.as_mut().ok_or_else(finished)?;
                postgres::insert(&mut **tx, meta, values).await
            }
            TxKind::Memory { working, .. } => working.insert(meta, values).await,
        }
    }

    async fn update(&self, query: &Query, assignments: &[(&'static str, Node)]) -> Result<u64> {
        match &self.kind {
            TxKind::Postgres(tx) => {
                let mut guard = tx.lock().await;
                let tx = guard.as_mut().ok_or_else(finished)?;
                postgres::update(&mut **tx, query, assignments).await
            }
            TxKind::Memory { working, .. } => working.update(query, assignments).await,
        }
    }

    async fn delete(&self, query: &Query) -> Result<u64> {
        match &self.kind {
            TxKind::Postgres(tx) => {
                let mut guard = tx.lock().await;
                let tx = guard.as_mut().ok_or_else(finished)?;
                postgres::delete(&mut **tx, query).await
            }
            TxKind::Memory { working, .. } => working.delete(query).await,
        }
    }

    async fn fetch_raw(
        &self,
        meta: &'static ModelMeta,
        sql: &str,
        params: Vec<Value>,
    ) -> Result<Vec<Record>> {
        match &self.kind {
            TxKind::Postgres(tx) => {
                let mut guard = tx.lock().await;
                let tx = guard.as_mut().ok_or_else(finished)?;
                postgres::fetch_raw(&mut **tx, meta, sql, params).await
            }
            TxKind::Memory { .. } => Err(RepositoryError::Unsupported(
                "raw SQL requires the PostgreSQL backend".to_owned(),
            )),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::db::Model;
    use crate::models::{Collection, SCHEMA};

    async fn collection_count(db: &(impl Executor + ?Sized)) -> i64 {
        Collection::objects().count(db).await.unwrap()
    }

    fn title(value: &str) -> Vec<(&'static str, Value)> {
        vec![
            ("title", Value::from(value)),
            ("featured_product_id", Value::Null),
        ]
    }

    #[tokio::test]
    async fn test_memory_transaction_commit() {
        let db = Db::memory(SCHEMA);
        let tx = db.begin().await.unwrap();
        tx.insert(Collection::meta(), title("Beauty")).await.unwrap();
        assert_eq!(collection_count(&tx).await, 1);

        tx.commit().await.unwrap();
        assert_eq!(collection_count(&db).await, 1);
    }

    #[tokio::test]
    async fn test_memory_transaction_keeps_outside_writes() {
        let db = Db::memory(SCHEMA);
        let tx = db.begin().await.unwrap();

        let outside = tokio::spawn({
            let db = db.clone();
            async move {
                db.insert(Collection::meta(), title("Outside"))
                    .await
                    .unwrap()
                    .id()
                    .unwrap()
            }
        });
        tokio::task::yield_now().await;
        assert!(!outside.is_finished());

        let inside = tx
            .insert(Collection::meta(), title("Inside"))
            .await
            .unwrap()
            .id()
            .unwrap();
        tx.commit().await.unwrap();

        let outside = outside.await.unwrap();
        assert_eq!(collection_count(&db).await, 2);
        assert_ne!(inside, outside);
    }

    #[tokio::test]
    async fn test_memory_transaction_drop_rolls_back() {
        let db = Db::memory(SCHEMA);
        {
            let tx = db.begin().await.unwrap();
            tx.insert(Collection::meta(), title("Grocery")).await.unwrap();
        }
        assert_eq!(collection_count(&db).await, 0);

        let tx = db.begin().await.unwrap();
        tx.insert(Collection::meta(), title("Grocery")).await.unwrap();
        tx.rollback().await.unwrap();
        assert_eq!(collection_count(&db).await, 0);
    }

    #[tokio::test]
    async fn test_raw_sql_unsupported_in_memory() {
        let db = Db::memory(SCHEMA);
        let err = db
            .fetch_raw(Collection::meta(), "SELECT * FROM store_collection", vec![])
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::Unsupported(_)));
    }
}
