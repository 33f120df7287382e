//! Database migration command.
//!
//! Applies `crates/store/migrations/` to the database named by
//! `STORE_DATABASE_URL` (or `DATABASE_URL`).

use secrecy::ExposeSecret;
use sqlx::PgPool;
use storefront_store::config::{ConfigError, StoreConfig};
use storefront_store::db::MEMORY_URL;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("The in-memory store has no migrations; set a PostgreSQL URL")]
    MemoryBackend,

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

/// Run store database migrations.
///
/// # Errors
///
/// Returns an error if configuration is missing, the URL names the memory
/// backend, or a migration fails.
pub async fn run() -> Result<(), MigrationError> {
    let config = StoreConfig::from_env()?;
    if config.database_url.expose_secret() == MEMORY_URL {
        return Err(MigrationError::MemoryBackend);
    }

    tracing::info!("Connecting to store database...");
    let pool = PgPool::connect(config.database_url.expose_secret()).await?;

    tracing::info!("Running store migrations...");
    sqlx::migrate!("../store/migrations").run(&pool).await?;

    tracing::info!("Store migrations complete!");
    Ok(())
}
