//! Subcommand implementations.

pub mod migrate;
pub mod report;
pub mod seed;

use storefront_store::config::{ConfigError, StoreConfig};
use storefront_store::db::{self, Db, RepositoryError};

/// Load configuration from the environment and open storage.
async fn open() -> Result<Db, OpenError> {
    let config = StoreConfig::from_env()?;
    Ok(db::connect(&config.database_url).await?)
}

#[derive(Debug, thiserror::Error)]
pub enum OpenError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Storage error: {0}")]
    Storage(#[from] RepositoryError),
}
