//! Application state management
//!
//! This module contains the shared application state that is passed
//! to all request handlers via Axum's State extractor.

use std::sync::Arc;

use crate::config::Config;
use crate::session::SessionManager;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

/// Inner state (wrapped in Arc for cheap cloning)
struct AppStateInner {
    /// The process-wide session manager
    pub manager: Arc<SessionManager>,

    /// Application configuration
    pub config: Config,
}

impl AppState {
    /// Create a new application state
    pub fn new(manager: Arc<SessionManager>, config: Config) -> Self {
        Self {
            inner: Arc::new(AppStateInner { manager, config }),
        }
    }

    /// Get a reference to the session manager
    pub fn manager(&self) -> &Arc<SessionManager> {
        &self.inner.manager
    }

    /// Get a reference to the configuration
    pub fn config(&self) -> &Config {
        &self.inner.config
    }
}
