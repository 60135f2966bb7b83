use std::sync::Arc;

use anyhow::Context;
use axum::http::{HeaderValue, Method};
use clap::Parser;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::services::{ServeDir, ServeFile};
use tracing_subscriber::EnvFilter;

use al_domain::Config;
use al_engine::{seed, Broadcaster, Engine};
use al_gateway::api;
use al_gateway::cli::{Cli, Command};
use al_gateway::state::AppState;
use al_store::Store;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        // Default to serve when no subcommand is given.
        None | Some(Command::Serve) => {
            let config = Config::from_env();
            init_tracing(&config);
            run_server(Arc::new(config)).await
        }
        Some(Command::Version) => {
            println!("agentsleak {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn init_tracing(config: &Config) {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.log_level.clone())),
        )
        .init();
}

/// Start the monitor server with the given configuration.
async fn run_server(config: Arc<Config>) -> anyhow::Result<()> {
    tracing::info!("AgentsLeak starting");

    // ── Store ────────────────────────────────────────────────────────
    let store = Arc::new(
        Store::open(&config.db_path)
            .with_context(|| format!("opening database at {}", config.db_path.display()))?,
    );
    tracing::info!(path = %config.db_path.display(), "store ready");

    if let Err(err) = std::fs::create_dir_all(&config.rules_path) {
        tracing::warn!(path = %config.rules_path.display(), error = %err, "failed to create rules directory");
    }

    // ── Default policies ─────────────────────────────────────────────
    let seeded = seed::seed_default_policies(&store).context("seeding default policies")?;
    tracing::info!(count = seeded, "default policies seeded");

    // ── Engine ───────────────────────────────────────────────────────
    let broadcaster = Arc::new(Broadcaster::new());
    let engine = Arc::new(Engine::new(
        store.clone(),
        (*config).clone(),
        broadcaster.clone(),
    ));
    engine.start();

    // ── Stale-session reaper (5 min tick, 24 h threshold) ────────────
    {
        let store = store.clone();
        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(std::time::Duration::from_secs(300));
            interval.tick().await; // first tick fires immediately; skip it
            loop {
                interval.tick().await;
                match store.cleanup_stale_sessions(1440) {
                    Ok(0) => {}
                    Ok(closed) => tracing::info!(closed, "auto-closed stale sessions"),
                    Err(err) => tracing::error!(error = %err, "stale session cleanup failed"),
                }
            }
        });
    }

    // ── App state + auth ─────────────────────────────────────────────
    let state = AppState::new(config.clone(), store, engine.clone());
    if state.collector_key_hash.is_some() {
        tracing::info!("collector key auth enabled");
    } else {
        tracing::warn!("collector key auth DISABLED — set AGENTSLEAK_API_KEY to enable");
    }
    if state.dashboard_token_hash.is_some() {
        tracing::info!("dashboard token auth enabled");
    } else {
        tracing::warn!(
            "dashboard token auth DISABLED — set AGENTSLEAK_DASHBOARD_TOKEN to enable"
        );
    }

    // ── Router ───────────────────────────────────────────────────────
    let cors_layer = build_cors_layer(&config.cors_origins);

    // Concurrency limit (backpressure protection).
    let max_concurrent = std::env::var("AGENTSLEAK_MAX_CONCURRENT_REQUESTS")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(256);
    tracing::info!(max_concurrent, "concurrency limit set");

    // Serve the dashboard SPA when a build exists; hash-based routing means
    // unknown paths fall back to index.html.
    let dashboard_dist = std::path::Path::new("dashboard/dist");
    let router = api::router(state.clone());
    let app = if dashboard_dist.exists() {
        let index_html = dashboard_dist.join("index.html");
        let spa = ServeDir::new(dashboard_dist).not_found_service(ServeFile::new(index_html));
        router
            .fallback_service(spa)
            .layer(cors_layer)
            .layer(tower::limit::ConcurrencyLimitLayer::new(max_concurrent))
            .with_state(state)
    } else {
        tracing::info!("dashboard/dist not found — dashboard assets not served");
        router
            .layer(cors_layer)
            .layer(tower::limit::ConcurrencyLimitLayer::new(max_concurrent))
            .with_state(state)
    };

    // ── Bind ─────────────────────────────────────────────────────────
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding to {addr}"))?;
    tracing::info!(addr = %addr, "AgentsLeak listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    tracing::info!("shutting down");
    engine.stop().await;
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

/// Build a [`CorsLayer`] from the configured allowed origins. A literal
/// `"*"` as the only entry allows all origins.
fn build_cors_layer(origins: &[String]) -> CorsLayer {
    use axum::http::header;

    let methods = [
        Method::GET,
        Method::POST,
        Method::PUT,
        Method::PATCH,
        Method::DELETE,
        Method::OPTIONS,
    ];
    let headers = [
        header::CONTENT_TYPE,
        header::AUTHORIZATION,
        header::HeaderName::from_static("x-agentsleak-key"),
        header::HeaderName::from_static("x-endpoint-hostname"),
        header::HeaderName::from_static("x-endpoint-user"),
        header::HeaderName::from_static("x-agentsleak-source"),
    ];

    if origins.len() == 1 && origins[0] == "*" {
        tracing::warn!("CORS configured with wildcard \"*\" — all origins allowed");
        return CorsLayer::new()
            .allow_origin(tower_http::cors::Any)
            .allow_methods(methods)
            .allow_headers(headers);
    }

    let exact: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "invalid CORS origin, skipping");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(exact))
        .allow_methods(methods)
        .allow_headers(headers)
        .allow_credentials(true)
}
