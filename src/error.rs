use thiserror::Error;

/// Errors raised by the sync library.
///
/// Startup failures (`Config`, `Key`) are fatal to the binaries. Everything
/// else is recovered at the call that produced it and logged.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Key error: {0}")]
    Key(String),

    #[error("Unauthorized access")]
    Unauthorized,

    #[error("Failed to decrypt query: {0}")]
    Decrypt(String),

    #[error("Index store error: {0}")]
    Store(#[from] fjall::Error),

    #[error("Index encoding error: {0}")]
    Encoding(#[from] bincode::Error),

    #[error("Request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Server returned {status} for {endpoint}")]
    Status {
        endpoint: &'static str,
        status: reqwest::StatusCode,
    },

    #[cfg(feature = "watch")]
    #[error("Watch error: {0}")]
    Watch(#[from] notify::Error),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SyncError>;
