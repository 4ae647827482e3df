//! HTTP access to a server's index.

use crate::envelope::{QueryEncryptor, QUERY_PARAM};
use crate::error::{Result, SyncError};
use crate::index::{IndexedFile, IndexedFilePart};
use crate::server::auth::AUTH_HEADER;
use async_trait::async_trait;
use futures::StreamExt;
use std::io::SeekFrom;
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use url::Url;

/// What the reconciler needs from a server.
#[async_trait]
pub trait RemoteIndex: Send + Sync {
    /// Directory rows with `lastIndexed > last_indexed`.
    async fn dirs(&self, last_indexed: i64) -> Result<Vec<IndexedFile>>;

    /// File rows with `lastIndexed > last_indexed` below `file_path`.
    async fn files(&self, last_indexed: i64, file_path: &str) -> Result<Vec<IndexedFile>>;

    /// Block list of one file, ordered by `seq`.
    async fn file_parts(&self, file_path: &str) -> Result<Vec<IndexedFilePart>>;

    /// Write up to `length` bytes of the remote file, starting at `start`, into
    /// `out` at the same offset. Returns the number of bytes written.
    async fn download(
        &self,
        file_path: &str,
        start: u64,
        length: u64,
        out: &mut tokio::fs::File,
    ) -> Result<u64>;
}

/// [`RemoteIndex`] over HTTP for one monitor credential.
#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base: Url,
    key: String,
    encryptor: QueryEncryptor,
}

impl ApiClient {
    pub fn new(
        http: reqwest::Client,
        base_url: &str,
        key: impl Into<String>,
        encryptor: QueryEncryptor,
    ) -> Result<Self> {
        let base = Url::parse(base_url)
            .map_err(|e| SyncError::Config(format!("invalid server address {}: {}", base_url, e)))?;
        Ok(Self {
            http,
            base,
            key: key.into(),
            encryptor,
        })
    }

    async fn get(&self, endpoint: &'static str, params: &[(&str, &str)]) -> Result<reqwest::Response> {
        let query = self.encryptor.seal(params)?;
        let url = self
            .base
            .join(endpoint)
            .map_err(|e| SyncError::Config(format!("invalid endpoint {}: {}", endpoint, e)))?;

        let response = self
            .http
            .get(url)
            .header(AUTH_HEADER, &self.key)
            .query(&[(QUERY_PARAM, query)])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(SyncError::Status { endpoint, status });
        }
        Ok(response)
    }
}

#[async_trait]
impl RemoteIndex for ApiClient {
    async fn dirs(&self, last_indexed: i64) -> Result<Vec<IndexedFile>> {
        let bound = last_indexed.to_string();
        let response = self.get("/dirs", &[("last_indexed", bound.as_str())]).await?;
        Ok(response.json().await?)
    }

    async fn files(&self, last_indexed: i64, file_path: &str) -> Result<Vec<IndexedFile>> {
        let bound = last_indexed.to_string();
        let response = self
            .get("/files", &[("last_indexed", bound.as_str()), ("file_path", file_path)])
            .await?;
        Ok(response.json().await?)
    }

    async fn file_parts(&self, file_path: &str) -> Result<Vec<IndexedFilePart>> {
        let response = self.get("/file_parts", &[("file_path", file_path)]).await?;
        Ok(response.json().await?)
    }

    async fn download(
        &self,
        file_path: &str,
        start: u64,
        length: u64,
        out: &mut tokio::fs::File,
    ) -> Result<u64> {
        let start_param = start.to_string();
        let length_param = length.to_string();
        let response = self
            .get(
                "/download",
                &[
                    ("file_path", file_path),
                    ("start", start_param.as_str()),
                    ("length", length_param.as_str()),
                ],
            )
            .await?;

        out.seek(SeekFrom::Start(start)).await?;

        let mut remaining = length;
        let mut body = response.bytes_stream();
        while remaining > 0 {
            let Some(chunk) = body.next().await else {
                break;
            };
            let chunk = chunk?;
            let take = remaining.min(chunk.len() as u64) as usize;
            out.write_all(&chunk[..take]).await?;
            remaining -= take as u64;
        }
        out.flush().await?;

        Ok(length - remaining)
    }
}
