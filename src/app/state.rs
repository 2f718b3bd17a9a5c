//! Application state shared across routes

use std::sync::Arc;

use crate::config::Config;
use crate::game::{MatchRegistry, MatchTiming};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub match_registry: MatchRegistry,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let timing = MatchTiming::from_config(&config);
        let match_registry = MatchRegistry::new(timing);

        Self {
            config: Arc::new(config),
            match_registry,
        }
    }
}
