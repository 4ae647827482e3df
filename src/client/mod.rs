//! Sync client: one polling worker per monitored tree.

pub mod api;
pub mod backoff;
pub mod reconcile;

pub use api::{ApiClient, RemoteIndex};
pub use backoff::Backoff;
pub use reconcile::{or_empty, CycleReport, Reconciler};

use crate::config::ClientConfig;
use crate::envelope::QueryEncryptor;
use anyhow::{Context, Result};
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Poll forever: sleep, reconcile, adjust the interval.
pub async fn run_worker<R: RemoteIndex>(mut reconciler: Reconciler<R>, mut backoff: Backoff) {
    loop {
        tokio::time::sleep(backoff.current()).await;

        let report = reconciler.run_cycle().await;
        debug!(
            root = %reconciler.root().display(),
            cursor = reconciler.cursor(),
            ?report,
            "Cycle finished"
        );
        backoff.record(report.changed);
    }
}

/// Start one worker per configured monitor.
pub fn spawn_workers(config: &ClientConfig) -> Result<Vec<JoinHandle<()>>> {
    let key_path = config.public_key_path();
    let encryptor = QueryEncryptor::from_pem_file(&key_path)
        .with_context(|| format!("Failed to load public key {}", key_path.display()))?;
    let http = reqwest::Client::builder()
        .build()
        .context("Failed to build HTTP client")?;
    let base_url = config.base_url();

    let mut handles = Vec::new();
    for monitor in config.monitor_table().values() {
        std::fs::create_dir_all(&monitor.root)
            .with_context(|| format!("Failed to create {}", monitor.root.display()))?;

        let remote = ApiClient::new(http.clone(), &base_url, &monitor.key, encryptor.clone())?;
        let reconciler = Reconciler::new(remote, &monitor.root, config.rewind_secs);
        let backoff = Backoff::new(config.initial_interval(), config.max_interval());

        info!(root = %monitor.root.display(), server = %base_url, "Starting worker");
        handles.push(tokio::spawn(run_worker(reconciler, backoff)));
    }
    Ok(handles)
}
