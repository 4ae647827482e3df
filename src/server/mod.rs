//! API server - runs as `filesyncd [config]`
//!
//! Serves the index of every monitored tree over HTTP. Each monitor also gets
//! an indexing task that keeps its store current.

pub mod auth;
pub mod handlers;

use crate::config::{Monitor, ServerConfig};
use crate::envelope::QueryDecryptor;
use crate::index::{IndexDatabase, IndexStore, Indexer};
use anyhow::{Context, Result};
use axum::{middleware, routing::get, Router};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

/// Quiet period after a filesystem event before rescanning.
pub const WATCH_DEBOUNCE: Duration = Duration::from_millis(500);

/// One monitored tree as the request handlers see it.
#[derive(Clone)]
pub struct MonitorIndex {
    pub monitor: Monitor,
    pub store: Arc<dyn IndexStore>,
}

/// Shared, read-only after startup.
#[derive(Clone)]
pub struct AppState {
    monitors: Arc<HashMap<String, MonitorIndex>>,
    decryptor: Arc<QueryDecryptor>,
}

impl AppState {
    pub fn new(monitors: HashMap<String, MonitorIndex>, decryptor: QueryDecryptor) -> Self {
        Self {
            monitors: Arc::new(monitors),
            decryptor: Arc::new(decryptor),
        }
    }

    pub fn monitor(&self, key: &str) -> Option<&MonitorIndex> {
        self.monitors.get(key)
    }

    pub fn decryptor(&self) -> &QueryDecryptor {
        &self.decryptor
    }
}

/// Routes plus the auth/decrypt pipeline.
pub fn build_router(state: AppState) -> Router {
    with_middleware(api_routes(), state)
}

/// The four index endpoints, before any middleware.
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/dirs", get(handlers::dirs))
        .route("/files", get(handlers::files))
        .route("/file_parts", get(handlers::file_parts))
        .route("/download", get(handlers::download))
}

/// Wrap `routes` in the request pipeline. Layers run outermost first:
/// trace, panic recovery, credential check, query decryption.
pub fn with_middleware(routes: Router<AppState>, state: AppState) -> Router {
    routes
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::decrypt_query,
        ))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::authenticate,
        ))
        .layer(CatchPanicLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Main server entry point
pub async fn run_server(config: ServerConfig) -> Result<()> {
    let key_path = config.private_key_path();
    let decryptor = QueryDecryptor::from_pem_file(&key_path)
        .with_context(|| format!("Failed to load private key {}", key_path.display()))?;

    let mut monitors = HashMap::new();
    let mut indexers = Vec::new();
    for (key, monitor) in config.monitor_table().iter() {
        std::fs::create_dir_all(&monitor.root)
            .with_context(|| format!("Failed to create {}", monitor.root.display()))?;
        let db = Arc::new(
            IndexDatabase::open(&monitor.root)
                .with_context(|| format!("Failed to open index for {}", monitor.root.display()))?,
        );

        indexers.push(Arc::new(Indexer::new(
            &monitor.root,
            db.clone(),
            config.block_size,
        )));
        monitors.insert(
            key.clone(),
            MonitorIndex {
                monitor: monitor.clone(),
                store: db,
            },
        );
    }

    for indexer in indexers {
        tokio::spawn(run_indexer(indexer, config.rescan_interval()));
    }

    let addr = config.listen_addr();
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!(addr = %addr, monitors = monitors.len(), "Server listening");

    axum::serve(listener, build_router(AppState::new(monitors, decryptor)))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}

/// Keep one tree's index current: scan now, then again after every
/// `interval` or (with the `watch` feature) after a burst of filesystem events.
pub async fn run_indexer(indexer: Arc<Indexer>, interval: Duration) {
    let mut wakeup = Wakeup::new(indexer.root());

    loop {
        let worker = indexer.clone();
        match tokio::task::spawn_blocking(move || worker.scan()).await {
            Ok(Ok(stats)) if stats.changed() => info!(
                root = %indexer.root().display(),
                indexed = stats.indexed,
                deleted = stats.deleted,
                "Index updated"
            ),
            Ok(Ok(stats)) => debug!(
                root = %indexer.root().display(),
                unchanged = stats.unchanged,
                "Index unchanged"
            ),
            Ok(Err(e)) => warn!(root = %indexer.root().display(), "Index scan failed: {}", e),
            Err(e) => error!(root = %indexer.root().display(), "Index scan aborted: {}", e),
        }

        wakeup.wait(interval).await;
    }
}

#[cfg(feature = "watch")]
struct Wakeup(Option<crate::index::watch::TreeWatcher>);

#[cfg(feature = "watch")]
impl Wakeup {
    fn new(root: &std::path::Path) -> Self {
        match crate::index::watch::TreeWatcher::new(root) {
            Ok(watcher) => Self(Some(watcher)),
            Err(e) => {
                warn!(root = %root.display(), "Falling back to periodic rescans: {}", e);
                Self(None)
            }
        }
    }

    async fn wait(&mut self, interval: Duration) {
        let Some(watcher) = self.0.as_mut() else {
            tokio::time::sleep(interval).await;
            return;
        };
        let alive = tokio::select! {
            _ = tokio::time::sleep(interval) => true,
            alive = watcher.changed(WATCH_DEBOUNCE) => alive,
        };
        if !alive {
            self.0 = None;
        }
    }
}

#[cfg(not(feature = "watch"))]
struct Wakeup;

#[cfg(not(feature = "watch"))]
impl Wakeup {
    fn new(_root: &std::path::Path) -> Self {
        Self
    }

    async fn wait(&mut self, interval: Duration) {
        tokio::time::sleep(interval).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_indexer_task_builds_index() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("a.txt"), "abc").unwrap();
        let db = Arc::new(IndexDatabase::open(temp.path()).unwrap());
        let indexer = Arc::new(Indexer::new(temp.path(), db.clone(), 4));

        let task = tokio::spawn(run_indexer(indexer, Duration::from_secs(3600)));

        let mut indexed = false;
        for _ in 0..100 {
            if db.get("/a.txt").unwrap().is_some() {
                indexed = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        task.abort();
        assert!(indexed);
    }
}
