use std::sync::Arc;

use anyhow::{Context, Result};
use rand::Rng;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

use crate::config::{Config, StoreBackend};
use crate::engine::Engine;
use crate::fetch::{HttpRuleFetcher, HttpStatusFetcher};
use crate::notify::provider::HttpChannelSender;
use crate::store::{KvStore, MemoryKvStore, SqliteKvStore};
use crate::{cleanup, db, scheduler, server, store};

const API_TOKEN_SETTING: &str = "api_token";

/// Build the KV store for the configured backend.
pub async fn open_store(config: &Config) -> Result<Arc<dyn KvStore>> {
    match config.store.backend {
        StoreBackend::Sqlite => {
            let pool = db::create_pool(config).await.context("creating database")?;
            info!(db_path = %config.db_path().display(), "database ready");
            Ok(Arc::new(SqliteKvStore::new(pool)))
        }
        StoreBackend::Memory => {
            info!("using in-memory store, caches will not survive restarts");
            Ok(Arc::new(MemoryKvStore::new()))
        }
    }
}

/// Wire the engine to the HTTP collaborators.
pub fn build_engine(config: Arc<Config>, store: Arc<dyn KvStore>) -> Engine {
    let status_fetcher = Arc::new(HttpStatusFetcher::new(config.timezone()));
    let rule_fetcher = Arc::new(HttpRuleFetcher::new(config.traffic.url.clone()));
    let sender = Arc::new(HttpChannelSender::new());
    Engine::new(config, store, status_fetcher, rule_fetcher, sender)
}

pub async fn run(config: Config) -> Result<()> {
    let store = open_store(&config).await?;

    let config = Arc::new(config);
    let engine = Arc::new(build_engine(config.clone(), store.clone()));
    let cancel = CancellationToken::new();
    let cycles = TaskTracker::new();

    let scheduler_handle = tokio::spawn(scheduler::scheduler_loop(
        engine.clone(),
        cycles.clone(),
        cancel.clone(),
    ));
    let cleanup_handle = tokio::spawn(cleanup::cleanup_loop(store.clone(), cancel.clone()));

    let server_handle = if config.api.enabled {
        let api_token = bootstrap_api_token(store.as_ref(), &config).await?;
        let app_state = server::AppState {
            engine: engine.clone(),
            api_token,
            cancel: cancel.clone(),
        };

        let router = server::build_router(app_state);
        let listener = tokio::net::TcpListener::bind(&config.api.listen)
            .await
            .with_context(|| format!("binding to {}", config.api.listen))?;

        info!(listen = %config.api.listen, "HTTP server listening");

        let server_cancel = cancel.clone();
        Some(tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async move {
                    server_cancel.cancelled().await;
                })
                .await
        }))
    } else {
        None
    };

    wait_for_shutdown().await;
    info!("shutdown signal received");

    cancel.cancel();

    // In-flight channel sends are allowed to finish within the timeout.
    let shutdown_timeout = std::time::Duration::from_secs(10);
    let drained = tokio::time::timeout(shutdown_timeout, async {
        let _ = scheduler_handle.await;
        let _ = cleanup_handle.await;
        if let Some(handle) = server_handle {
            let _ = handle.await;
        }
        cycles.close();
        cycles.wait().await;
    })
    .await;
    if drained.is_err() {
        warn!(pending_cycles = cycles.len(), "shutdown timed out with cycles still running");
    }

    store.close().await;
    info!("shutdown complete");

    Ok(())
}

/// Config value, then stored value, then a freshly generated token.
async fn bootstrap_api_token(kv: &dyn KvStore, config: &Config) -> Result<String> {
    if let Some(ref token) = config.api.token {
        store::set_setting(kv, API_TOKEN_SETTING, token).await?;
        info!("using api token from config");
        return Ok(token.clone());
    }

    if let Some(token) = store::get_setting(kv, API_TOKEN_SETTING).await? {
        info!("using stored api token");
        return Ok(token);
    }

    let token = generate_token();
    store::set_setting(kv, API_TOKEN_SETTING, &token).await?;
    warn!(
        token = %token,
        "api token generated, save it now as it won't be shown again"
    );
    Ok(token)
}

fn generate_token() -> String {
    use rand::distr::Alphanumeric;
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(32)
        .map(char::from)
        .collect()
}

async fn wait_for_shutdown() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to register SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => {},
            _ = sigterm.recv() => {},
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
}
