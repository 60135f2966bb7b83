//! Runtime configuration, loaded from `AGENTSLEAK_*` environment variables
//! with loopback-bound defaults under `~/.agentsleak`.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".agentsleak")
}

fn default_cors_origins() -> Vec<String> {
    vec![
        "http://localhost:3000".to_string(),
        "http://localhost:5173".to_string(),
        "http://127.0.0.1:3000".to_string(),
        "http://127.0.0.1:5173".to_string(),
    ]
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Host to bind the server to.
    pub host: String,
    /// Port to bind the server to.
    pub port: u16,
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Path to the rules/policies directory.
    pub rules_path: PathBuf,
    /// Logging level (tracing `EnvFilter` directive).
    pub log_level: String,
    /// Allowed CORS origins.
    pub cors_origins: Vec<String>,
    /// Collector key guarding `/api/collect/*` (`X-AgentsLeak-Key`).
    /// `None` disables collector auth.
    pub api_key: Option<String>,
    /// Bearer token guarding the dashboard API. `None` disables dashboard auth.
    pub dashboard_token: Option<String>,
    /// Maximum pending events in the async processing queue. When full,
    /// new events are dropped with a warning rather than blocking hooks.
    pub queue_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = default_data_dir();
        Config {
            host: "127.0.0.1".to_string(),
            port: 3827,
            db_path: data_dir.join("data.db"),
            rules_path: data_dir.join("rules"),
            log_level: "info".to_string(),
            cors_origins: default_cors_origins(),
            api_key: None,
            dashboard_token: None,
            queue_capacity: 10_000,
        }
    }
}

impl Config {
    /// Load configuration from `AGENTSLEAK_*` environment variables, falling
    /// back to defaults for anything unset.
    pub fn from_env() -> Config {
        let mut config = Config::default();

        if let Ok(host) = std::env::var("AGENTSLEAK_HOST") {
            config.host = host;
        }
        if let Some(port) = env_parse("AGENTSLEAK_PORT") {
            config.port = port;
        }
        if let Ok(path) = std::env::var("AGENTSLEAK_DB_PATH") {
            config.db_path = PathBuf::from(path);
        }
        if let Ok(path) = std::env::var("AGENTSLEAK_RULES_PATH") {
            config.rules_path = PathBuf::from(path);
        }
        if let Ok(level) = std::env::var("AGENTSLEAK_LOG_LEVEL") {
            config.log_level = level;
        }
        if let Ok(origins) = std::env::var("AGENTSLEAK_CORS_ORIGINS") {
            let parsed: Vec<String> = origins
                .split(',')
                .map(str::trim)
                .filter(|o| !o.is_empty())
                .map(str::to_string)
                .collect();
            if !parsed.is_empty() {
                config.cors_origins = parsed;
            }
        }
        if let Ok(key) = std::env::var("AGENTSLEAK_API_KEY") {
            if !key.is_empty() {
                config.api_key = Some(key);
            }
        }
        if let Ok(token) = std::env::var("AGENTSLEAK_DASHBOARD_TOKEN") {
            if !token.is_empty() {
                config.dashboard_token = Some(token);
            }
        }
        if let Some(capacity) = env_parse("AGENTSLEAK_QUEUE_CAPACITY") {
            config.queue_capacity = capacity;
        }

        config
    }
}

fn env_parse<T: std::str::FromStr>(var: &str) -> Option<T> {
    std::env::var(var).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_bind_loopback() {
        let config = Config::default();
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 3827);
        assert!(config.api_key.is_none());
        assert!(config.dashboard_token.is_none());
    }

    #[test]
    fn default_db_path_is_under_data_dir() {
        let config = Config::default();
        assert!(config.db_path.ends_with(".agentsleak/data.db"));
    }
}
