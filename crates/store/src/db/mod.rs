//! Data access for the store `PostgreSQL` database.
//!
//! # Database: `storefront`
//!
//! ## Tables
//!
//! - `store_collection`, `store_product`, `store_promotion`,
//!   `store_product_promotions` - catalogue
//! - `store_customer`, `store_order`, `store_orderitem` - sales
//! - `store_cart`, `store_cartitem` - anonymous carts
//! - `tags_tag`, `tags_taggeditem` - generic tagging keyed by
//!   (entity type, entity id)
//!
//! # Layers
//!
//! Typed builders ([`Col`], [`ForeignKey`], [`Many`], [`Expr`], [`Q`]) build
//! a lazy [`QuerySet`]. Terminal operations hand the untyped [`Query`] to an
//! [`Executor`]: the `PostgreSQL` backend compiles it with [`sql`], the
//! memory backend evaluates it directly. Repositories wrap the query layer
//! per entity.
//!
//! # Migrations
//!
//! Migrations are stored in `crates/store/migrations/` and run via:
//! ```bash
//! cargo run -p storefront-cli -- migrate
//! ```

pub mod carts;
pub mod collections;
pub mod customers;
pub mod executor;
pub mod expr;
pub mod filter;
pub mod memory;
pub mod orders;
pub mod postgres;
pub mod products;
pub mod query;
pub mod schema;
pub mod sql;
pub mod tags;
pub mod value;

use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use thiserror::Error;

pub use carts::CartRepository;
pub use collections::CollectionRepository;
pub use customers::CustomerRepository;
pub use executor::{Db, Executor, Transaction};
pub use expr::{Agg, Assignment, Col, Expr, FieldRef, ForeignKey, Many, Node, OrderBy};
pub use filter::{Condition, Q};
pub use memory::MemoryStore;
pub use orders::OrderRepository;
pub use products::ProductRepository;
pub use query::{Annotated, Deferred, Query, QuerySet, Subquery};
pub use schema::{FieldKind, Model, ModelMeta, OnDelete, Schema};
pub use tags::TagRepository;
pub use value::{FromValue, Record, Value};

/// URL selecting the in-process memory backend.
pub const MEMORY_URL: &str = "memory://";

/// Errors that can occur during repository operations.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// Database error from sqlx.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Data in the database is corrupted or invalid.
    #[error("data corruption: {0}")]
    DataCorruption(String),

    /// Requested entity was not found.
    #[error("not found")]
    NotFound,

    /// A single-row lookup matched several rows.
    #[error("get() returned more than one {0}")]
    MultipleObjectsReturned(&'static str),

    /// Constraint violation (e.g., unique email).
    #[error("constraint violation: {0}")]
    Conflict(String),

    /// Delete blocked by a protected reference.
    #[error("protected: {0}")]
    Protected(String),

    /// Dangling reference or missing required value.
    #[error("integrity error: {0}")]
    Integrity(String),

    #[error("{model} has no field named `{field}`")]
    UnknownField { model: &'static str, field: String },

    #[error("{model} has no relation named `{relation}`")]
    UnknownRelation {
        model: &'static str,
        relation: String,
    },

    /// The query description cannot be executed as written.
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    /// The backend cannot run this operation.
    #[error("unsupported: {0}")]
    Unsupported(String),
}

pub type Result<T> = std::result::Result<T, RepositoryError>;

/// Create a `PostgreSQL` connection pool with sensible defaults.
///
/// # Arguments
///
/// * `database_url` - `PostgreSQL` connection string (wrapped in `SecretString`)
///
/// # Errors
///
/// Returns `sqlx::Error` if the connection cannot be established.
pub async fn create_pool(database_url: &SecretString) -> std::result::Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .min_connections(2)
        .acquire_timeout(Duration::from_secs(10))
        .connect(database_url.expose_secret())
        .await
}

/// Open the storage handle named by `database_url`.
///
/// `memory://` selects the in-process backend; anything else is treated as
/// a `PostgreSQL` connection string.
///
/// # Errors
///
/// Returns `RepositoryError::Database` if the pool cannot connect.
pub async fn connect(database_url: &SecretString) -> Result<Db> {
    if database_url.expose_secret() == MEMORY_URL {
        tracing::info!("using in-memory storage");
        return Ok(Db::memory(crate::models::SCHEMA));
    }
    let pool = create_pool(database_url).await?;
    Ok(Db::Postgres(pool))
}

/// Insert one entity from column values and return it as stored.
///
/// # Errors
///
/// Returns `Integrity` for dangling references or missing required columns
/// and `Conflict` for unique violations.
pub async fn create<M: Model, E: Executor + ?Sized>(
    db: &E,
    values: Vec<(&'static str, Value)>,
) -> Result<M> {
    let record = db.insert(M::meta(), values).await?;
    M::from_record(&record)
}
