//! Shared application state injected into every Axum handler.

use std::sync::Arc;

use chatline_agent::ChatAgent;

use crate::auth::JwtKeys;
use crate::config::Config;
use crate::entities::SqliteStore;
use crate::services::{StreamRelay, TitleService};

/// State shared across all HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    /// Server configuration (env-derived).
    pub config: Arc<Config>,
    /// Users, conversations and messages.
    pub store: Arc<SqliteStore>,
    /// Access-token signing keys.
    pub jwt: JwtKeys,
    /// Runs chat turns against the reply agent.
    pub relay: StreamRelay,
    /// Generates titles with the title agent.
    pub titles: TitleService,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("config", &self.config)
            .field("title_jobs", self.titles.jobs())
            .finish_non_exhaustive()
    }
}

impl AppState {
    pub fn new(
        config: Config,
        store: SqliteStore,
        agent: Arc<dyn ChatAgent>,
        title_agent: Arc<dyn ChatAgent>,
    ) -> Self {
        let store = Arc::new(store);
        let jwt = JwtKeys::new(&config.jwt_secret, config.jwt_expiry_hours);
        let titles = TitleService::new(store.clone(), title_agent, config.title_threshold);
        let relay = StreamRelay::new(
            store.clone(),
            agent,
            titles.clone(),
            config.agent_idle_timeout,
        );
        Self {
            config: Arc::new(config),
            store,
            jwt,
            relay,
            titles,
        }
    }

    /// Cancel active turns and abort title jobs.
    pub fn shutdown(&self) {
        self.relay.shutdown();
        self.titles.shutdown();
    }
}
