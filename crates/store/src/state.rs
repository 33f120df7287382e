//! Application state shared across handlers.

use std::sync::Arc;

use crate::config::StoreConfig;
use crate::db::Db;

/// Application state shared across all handlers.
///
/// This struct is cheaply cloneable via `Arc` and provides access to
/// the storage handle and configuration.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: StoreConfig,
    db: Db,
}

impl AppState {
    /// Create a new application state.
    #[must_use]
    pub fn new(config: StoreConfig, db: Db) -> Self {
        Self {
            inner: Arc::new(AppStateInner { config, db }),
        }
    }

    /// Get a reference to the store configuration.
    #[must_use]
    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }

    /// Get a reference to the storage handle.
    #[must_use]
    pub fn db(&self) -> &Db {
        &self.inner.db
    }

    /// Rows per API list page.
    #[must_use]
    pub fn page_size(&self) -> usize {
        self.inner.config.page_size
    }
}
