use std::sync::Arc;

use sha2::{Digest, Sha256};

use al_domain::Config;
use al_engine::Engine;
use al_store::Store;

/// Shared application state passed to all API handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<Store>,
    pub engine: Arc<Engine>,

    /// SHA-256 of the collector key (`X-AgentsLeak-Key`). `None` means
    /// collector auth is disabled.
    pub collector_key_hash: Option<Vec<u8>>,
    /// SHA-256 of the dashboard bearer token. `None` means dashboard auth
    /// is disabled.
    pub dashboard_token_hash: Option<Vec<u8>>,
}

impl AppState {
    /// Build state from a configured engine, hashing the auth secrets once
    /// so request-path comparisons are constant-time digest compares.
    pub fn new(config: Arc<Config>, store: Arc<Store>, engine: Arc<Engine>) -> AppState {
        let hash = |secret: &Option<String>| {
            secret
                .as_deref()
                .filter(|s| !s.is_empty())
                .map(|s| Sha256::digest(s.as_bytes()).to_vec())
        };
        let collector_key_hash = hash(&config.api_key);
        let dashboard_token_hash = hash(&config.dashboard_token);
        AppState {
            config,
            store,
            engine,
            collector_key_hash,
            dashboard_token_hash,
        }
    }
}
