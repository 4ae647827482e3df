//! Filesystem event source that wakes the indexer early.

use super::db::STATE_DIR;
use crate::error::Result;
use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::Path;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::warn;

/// Recursive watcher over one monitored root.
///
/// Events that only touch the index's own state directory are dropped.
pub struct TreeWatcher {
    _watcher: RecommendedWatcher,
    rx: mpsc::UnboundedReceiver<()>,
}

impl TreeWatcher {
    pub fn new(root: &Path) -> Result<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        let state_dir = root.join(STATE_DIR);

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) => {
                let internal = !event.paths.is_empty()
                    && event.paths.iter().all(|p| p.starts_with(&state_dir));
                if !internal {
                    let _ = tx.send(());
                }
            }
            Err(e) => warn!("Watch error: {}", e),
        })?;
        watcher.watch(root, RecursiveMode::Recursive)?;

        Ok(Self {
            _watcher: watcher,
            rx,
        })
    }

    /// Wait for the next burst of events, then swallow the rest of the burst.
    ///
    /// Returns false once the watcher has shut down.
    pub async fn changed(&mut self, debounce: Duration) -> bool {
        if self.rx.recv().await.is_none() {
            return false;
        }
        while let Ok(Some(())) = tokio::time::timeout(debounce, self.rx.recv()).await {}
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_watcher_reports_file_creation() {
        let temp = TempDir::new().unwrap();
        let mut watcher = TreeWatcher::new(temp.path()).unwrap();

        std::fs::write(temp.path().join("new.txt"), "hello").unwrap();

        let fired = tokio::time::timeout(
            Duration::from_secs(5),
            watcher.changed(Duration::from_millis(50)),
        )
        .await;
        assert_eq!(fired.ok(), Some(true));
    }
}
