//! Server and client configuration files (`filesyncd.toml`, `filesync.toml`).

use crate::error::{Result, SyncError};
use crate::integrity::{DEFAULT_BLOCK_SIZE, MAX_BLOCK_SIZE};
use crate::path::expand_tilde;
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_PORT: u16 = 6776;
pub const DEFAULT_SERVER_CONFIG: &str = "filesyncd.toml";
pub const DEFAULT_CLIENT_CONFIG: &str = "filesync.toml";

/// A credential and the tree it selects.
#[derive(Clone, PartialEq, Eq)]
pub struct Monitor {
    pub key: String,
    pub root: PathBuf,
}

// The key is a credential; keep it out of logs.
impl fmt::Debug for Monitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Monitor")
            .field("key", &"<redacted>")
            .field("root", &self.root)
            .finish()
    }
}

/// Credential -> monitor table, built once at startup.
pub type MonitorTable = Arc<HashMap<String, Monitor>>;

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_ip")]
    pub ip: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_private_key")]
    pub private_key_file: PathBuf,

    /// Bytes per indexed block
    #[serde(default = "default_block_size")]
    pub block_size: u64,

    #[serde(default = "default_rescan_interval")]
    pub rescan_interval_secs: u64,

    #[serde(default)]
    pub monitors: HashMap<String, PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    #[serde(default = "default_ip")]
    pub ip: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_public_key")]
    pub public_key_file: PathBuf,

    /// Backoff cap
    #[serde(default = "default_max_scan_interval")]
    pub max_scan_interval_secs: u64,

    /// Backoff starting value, restored after every cycle that changed something
    #[serde(default = "default_initial_scan_interval")]
    pub initial_scan_interval_secs: u64,

    /// How far behind the cursor each poll starts
    #[serde(default = "default_rewind")]
    pub rewind_secs: i64,

    #[serde(default)]
    pub monitors: HashMap<String, PathBuf>,
}

fn default_ip() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_private_key() -> PathBuf {
    PathBuf::from("private_key.pem")
}

fn default_public_key() -> PathBuf {
    PathBuf::from("public_key.pem")
}

fn default_block_size() -> u64 {
    DEFAULT_BLOCK_SIZE
}

fn default_rescan_interval() -> u64 {
    30
}

fn default_max_scan_interval() -> u64 {
    300
}

fn default_initial_scan_interval() -> u64 {
    1
}

fn default_rewind() -> i64 {
    3600
}

impl ServerConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let config: Self = load_toml(path)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| SyncError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.block_size == 0 {
            return Err(SyncError::Config("block_size must be positive".to_string()));
        }
        if self.block_size > MAX_BLOCK_SIZE {
            return Err(SyncError::Config(format!(
                "block_size {} exceeds the maximum of {}",
                self.block_size, MAX_BLOCK_SIZE
            )));
        }
        if self.rescan_interval_secs == 0 {
            return Err(SyncError::Config(
                "rescan_interval_secs must be positive".to_string(),
            ));
        }
        check_monitors(&self.monitors)
    }

    pub fn private_key_path(&self) -> PathBuf {
        expand_tilde(&self.private_key_file)
    }

    pub fn rescan_interval(&self) -> Duration {
        Duration::from_secs(self.rescan_interval_secs)
    }

    pub fn monitor_table(&self) -> MonitorTable {
        Arc::new(build_monitors(&self.monitors))
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }
}

impl ClientConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let config: Self = load_toml(path)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| SyncError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.initial_scan_interval_secs == 0 {
            return Err(SyncError::Config(
                "initial_scan_interval_secs must be positive".to_string(),
            ));
        }
        if self.max_scan_interval_secs < self.initial_scan_interval_secs {
            return Err(SyncError::Config(
                "max_scan_interval_secs is below initial_scan_interval_secs".to_string(),
            ));
        }
        if self.rewind_secs < 0 {
            return Err(SyncError::Config("rewind_secs must not be negative".to_string()));
        }
        check_monitors(&self.monitors)
    }

    pub fn public_key_path(&self) -> PathBuf {
        expand_tilde(&self.public_key_file)
    }

    pub fn initial_interval(&self) -> Duration {
        Duration::from_secs(self.initial_scan_interval_secs)
    }

    pub fn max_interval(&self) -> Duration {
        Duration::from_secs(self.max_scan_interval_secs)
    }

    pub fn monitor_table(&self) -> MonitorTable {
        Arc::new(build_monitors(&self.monitors))
    }

    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.ip, self.port)
    }
}

fn load_toml<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let path = expand_tilde(path);
    let content = std::fs::read_to_string(&path)
        .map_err(|e| SyncError::Config(format!("cannot read {}: {}", path.display(), e)))?;
    toml::from_str(&content)
        .map_err(|e| SyncError::Config(format!("invalid {}: {}", path.display(), e)))
}

fn check_monitors(monitors: &HashMap<String, PathBuf>) -> Result<()> {
    if monitors.is_empty() {
        return Err(SyncError::Config("no monitors configured".to_string()));
    }
    if monitors.keys().any(|k| k.is_empty()) {
        return Err(SyncError::Config("monitor key must not be empty".to_string()));
    }
    Ok(())
}

fn build_monitors(monitors: &HashMap<String, PathBuf>) -> HashMap<String, Monitor> {
    monitors
        .iter()
        .map(|(key, root)| {
            (
                key.clone(),
                Monitor {
                    key: key.clone(),
                    root: expand_tilde(root),
                },
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_defaults() {
        let config = ServerConfig::from_toml(
            r#"
private_key_file = "private_key.pem"

[monitors]
"secret" = "/srv/tree"
"#,
        )
        .unwrap();

        assert_eq!(config.ip, "127.0.0.1");
        assert_eq!(config.port, 6776);
        assert_eq!(config.block_size, 64 * 1024);
        assert_eq!(config.rescan_interval(), Duration::from_secs(30));
        assert_eq!(config.listen_addr(), "127.0.0.1:6776");

        let table = config.monitor_table();
        assert_eq!(table["secret"].root, PathBuf::from("/srv/tree"));
    }

    #[test]
    fn test_client_defaults() {
        let config = ClientConfig::from_toml(
            r#"
ip = "10.0.0.2"
public_key_file = "public_key.pem"

[monitors]
"secret" = "/mirror"
"#,
        )
        .unwrap();

        assert_eq!(config.base_url(), "http://10.0.0.2:6776");
        assert_eq!(config.initial_interval(), Duration::from_secs(1));
        assert_eq!(config.max_interval(), Duration::from_secs(300));
        assert_eq!(config.rewind_secs, 3600);
    }

    #[test]
    fn test_empty_monitors_rejected() {
        let err = ClientConfig::from_toml(r#"public_key_file = "k.pem""#).unwrap_err();
        assert!(matches!(err, SyncError::Config(_)));

        let err = ServerConfig::from_toml(
            r#"
private_key_file = "k.pem"
[monitors]
"#,
        )
        .unwrap_err();
        assert!(matches!(err, SyncError::Config(_)));
    }

    #[test]
    fn test_key_files_default_to_working_dir() {
        let server = ServerConfig::from_toml(
            r#"
[monitors]
"secret" = "/srv"
"#,
        )
        .unwrap();
        assert_eq!(server.private_key_path(), PathBuf::from("private_key.pem"));

        let client = ClientConfig::from_toml(
            r#"
[monitors]
"secret" = "/mirror"
"#,
        )
        .unwrap();
        assert_eq!(client.public_key_path(), PathBuf::from("public_key.pem"));
    }

    #[test]
    fn test_block_size_bounds() {
        let config = |block_size: u64| {
            ServerConfig::from_toml(&format!(
                "block_size = {}\n[monitors]\n\"secret\" = \"/srv\"\n",
                block_size
            ))
        };

        assert!(matches!(config(0), Err(SyncError::Config(_))));
        assert!(matches!(config(MAX_BLOCK_SIZE + 1), Err(SyncError::Config(_))));
        assert!(matches!(config(1_000_000_000_000), Err(SyncError::Config(_))));
        assert_eq!(config(MAX_BLOCK_SIZE).unwrap().block_size, MAX_BLOCK_SIZE);
    }

    #[test]
    fn test_inverted_backoff_rejected() {
        let err = ClientConfig::from_toml(
            r#"
public_key_file = "k.pem"
initial_scan_interval_secs = 10
max_scan_interval_secs = 5
[monitors]
"secret" = "/mirror"
"#,
        )
        .unwrap_err();
        assert!(matches!(err, SyncError::Config(_)));
    }

    #[test]
    fn test_load_from_file() {
        let temp = tempfile::TempDir::new().unwrap();
        let path = temp.path().join("filesync.toml");
        std::fs::write(
            &path,
            r#"
public_key_file = "public_key.pem"
rewind_secs = 60
[monitors]
"k1" = "/a"
"k2" = "/b"
"#,
        )
        .unwrap();

        let config = ClientConfig::load(&path).unwrap();
        assert_eq!(config.rewind_secs, 60);
        assert_eq!(config.monitor_table().len(), 2);

        let err = ClientConfig::load(&temp.path().join("missing.toml")).unwrap_err();
        assert!(matches!(err, SyncError::Config(_)));
    }

    #[test]
    fn test_monitor_debug_hides_key() {
        let monitor = Monitor {
            key: "hunter2".to_string(),
            root: PathBuf::from("/srv"),
        };
        assert!(!format!("{:?}", monitor).contains("hunter2"));
    }
}
