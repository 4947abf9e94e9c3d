//! services/api/src/web/state.rs
//!
//! Defines the application's shared state.

use crate::config::Config;
use std::sync::Arc;
use study_tracker_core::ports::{ResourceCatalog, SessionStore};
use study_tracker_core::progress::ProgressAggregator;
use study_tracker_core::lifecycle::SessionLifecycleManager;

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<SessionLifecycleManager>,
    pub store: Arc<dyn SessionStore>,
    pub config: Arc<Config>,
}

impl AppState {
    /// Wires the engine onto a store and catalog. Used by the binary and by
    /// the integration tests, which substitute the in-memory store.
    pub fn new(
        store: Arc<dyn SessionStore>,
        catalog: Arc<dyn ResourceCatalog>,
        config: Arc<Config>,
    ) -> Self {
        let aggregator = ProgressAggregator::new(
            store.clone(),
            catalog,
            config.timezone(),
            config.daily_goal_secs(),
        );
        let engine = Arc::new(SessionLifecycleManager::new(store.clone(), aggregator));
        Self {
            engine,
            store,
            config,
        }
    }
}
