//! Shared fixture: a live API server over a temporary tree.
#![allow(dead_code)]

use filesync::client::ApiClient;
use filesync::config::Monitor;
use filesync::envelope::{QueryDecryptor, QueryEncryptor};
use filesync::index::{IndexDatabase, IndexStore, Indexer, ScanStats};
use filesync::server::{build_router, AppState, MonitorIndex};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use tokio::net::TcpListener;

pub const KEY: &str = "test-credential";

pub fn fixture(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures")
        .join(name)
}

pub fn encryptor() -> QueryEncryptor {
    QueryEncryptor::from_pem_file(&fixture("public_key.pem")).unwrap()
}

pub struct TestServer {
    pub base_url: String,
    pub indexer: Indexer,
    temp: TempDir,
}

impl TestServer {
    pub async fn start(block_size: u64) -> Self {
        let temp = TempDir::new().unwrap();
        let db = Arc::new(IndexDatabase::open(temp.path()).unwrap());
        Self::start_with_store(temp, db, block_size).await
    }

    pub async fn start_with_store(temp: TempDir, db: Arc<IndexDatabase>, block_size: u64) -> Self {
        let store: Arc<dyn IndexStore> = db.clone();
        let monitors = HashMap::from([(
            KEY.to_string(),
            MonitorIndex {
                monitor: Monitor {
                    key: KEY.to_string(),
                    root: temp.path().to_path_buf(),
                },
                store,
            },
        )]);
        let decryptor = QueryDecryptor::from_pem_file(&fixture("private_key.pem")).unwrap();
        let app = build_router(AppState::new(monitors, decryptor));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url: format!("http://{}", addr),
            indexer: Indexer::new(temp.path(), db, block_size),
            temp,
        }
    }

    pub fn root(&self) -> &Path {
        self.temp.path()
    }

    pub fn db(&self) -> &Arc<IndexDatabase> {
        self.indexer.db()
    }

    /// Write a file under the root with a fixed mtime.
    pub fn write(&self, rel: &str, content: &[u8], mtime: i64) {
        let path = self.root().join(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(&path, content).unwrap();
        filetime::set_file_mtime(&path, filetime::FileTime::from_unix_time(mtime, 0)).unwrap();
    }

    pub fn scan(&self, now: i64) -> ScanStats {
        self.indexer.scan_at(now).unwrap()
    }

    pub fn client(&self) -> ApiClient {
        self.client_with_key(KEY)
    }

    pub fn client_with_key(&self, key: &str) -> ApiClient {
        ApiClient::new(reqwest::Client::new(), &self.base_url, key, encryptor()).unwrap()
    }
}
