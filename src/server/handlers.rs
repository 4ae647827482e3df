//! Endpoint handlers. Each one runs after [`super::auth`] has attached the
//! caller's [`MonitorIndex`] and [`QueryParams`] to the request.

use super::auth::{ApiError, QueryParams};
use super::MonitorIndex;
use crate::error::{Result, SyncError};
use crate::index::{IndexStore, IndexedFile, IndexedFilePart};
use crate::path::{resolve, slash_suffix};
use axum::{
    body::Body,
    http::header,
    response::Response,
    Extension, Json,
};
use std::io::{ErrorKind, SeekFrom};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::io::ReaderStream;
use tracing::{debug, error};

/// GET /dirs?last_indexed=N
pub async fn dirs(
    Extension(index): Extension<MonitorIndex>,
    Extension(params): Extension<QueryParams>,
) -> std::result::Result<Json<Vec<IndexedFile>>, ApiError> {
    let bound = params.int("last_indexed");
    let dirs = query_store(&index, move |store| store.dirs_since(bound)).await?;
    Ok(Json(dirs))
}

/// GET /files?last_indexed=N&file_path=prefix
pub async fn files(
    Extension(index): Extension<MonitorIndex>,
    Extension(params): Extension<QueryParams>,
) -> std::result::Result<Json<Vec<IndexedFile>>, ApiError> {
    let bound = params.int("last_indexed");
    let prefix = slash_suffix(params.get("file_path"));
    let files = query_store(&index, move |store| store.files_since(bound, &prefix)).await?;
    Ok(Json(files))
}

/// GET /file_parts?file_path=path
pub async fn file_parts(
    Extension(index): Extension<MonitorIndex>,
    Extension(params): Extension<QueryParams>,
) -> std::result::Result<Json<Vec<IndexedFilePart>>, ApiError> {
    let file_path = params.get("file_path").to_owned();
    let parts = query_store(&index, move |store| store.file_parts(&file_path)).await?;
    Ok(Json(parts))
}

/// GET /download?file_path=path&start=S&length=L
///
/// Streams `[start, start + length)` clipped to the end of the file. No index
/// lookup is made.
pub async fn download(
    Extension(index): Extension<MonitorIndex>,
    Extension(params): Extension<QueryParams>,
) -> std::result::Result<Response, ApiError> {
    let file_path = params.get("file_path");
    let start = params.int("start").max(0) as u64;
    let length = params.int("length").max(0) as u64;

    let path = resolve(&index.monitor.root, file_path)?;
    let path = match contained(&index.monitor.root, &path).await {
        Ok(path) => path,
        Err(SyncError::Io(e)) if e.kind() == ErrorKind::NotFound => {
            return Err(ApiError::not_found())
        }
        Err(e) => return Err(e.into()),
    };
    let mut file = match tokio::fs::File::open(&path).await {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::NotFound => return Err(ApiError::not_found()),
        Err(e) => return Err(SyncError::from(e).into()),
    };

    let metadata = file.metadata().await.map_err(SyncError::from)?;
    if !metadata.is_file() {
        return Err(ApiError::not_found());
    }

    let n = length.min(metadata.len().saturating_sub(start));
    file.seek(SeekFrom::Start(start))
        .await
        .map_err(SyncError::from)?;
    debug!(path = %file_path, start, length = n, "Serving range");

    Response::builder()
        .header(header::CONTENT_TYPE, "application/octet-stream")
        .header(header::CONTENT_LENGTH, n)
        .body(Body::from_stream(ReaderStream::new(file.take(n))))
        .map_err(|e| {
            error!("Failed to build download response: {}", e);
            ApiError::internal()
        })
}

/// Follow symlinks in `path` and make sure the result is still under `root`.
async fn contained(root: &Path, path: &Path) -> Result<PathBuf> {
    let root = tokio::fs::canonicalize(root).await?;
    let target = tokio::fs::canonicalize(path).await?;
    if !target.starts_with(&root) {
        return Err(SyncError::InvalidPath(format!(
            "symlink target escapes root directory: {}",
            path.display()
        )));
    }
    Ok(target)
}

/// Run a store query off the async runtime.
async fn query_store<T, F>(index: &MonitorIndex, query: F) -> std::result::Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce(&dyn IndexStore) -> Result<T> + Send + 'static,
{
    let store = index.store.clone();
    tokio::task::spawn_blocking(move || query(store.as_ref()))
        .await
        .map_err(|e| {
            error!(root = %index.monitor.root.display(), "Index query aborted: {}", e);
            ApiError::internal()
        })?
        .map_err(ApiError::from)
}
