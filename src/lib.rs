pub mod client;
pub mod config;
pub mod envelope;
pub mod error;
pub mod index;
pub mod integrity;
pub mod logging;
pub mod path;
pub mod server;

pub use error::{Result, SyncError};
