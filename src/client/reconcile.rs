//! One monitor's reconciliation cycle.
//!
//! A cycle asks the server for directories indexed since `cursor - rewind`.
//! Only when that list is non-empty does it fetch the matching file rows and
//! walk them in order:
//!
//! - deleted entries are removed locally (a missing path is fine);
//! - files with no local copy are created and downloaded in full;
//! - files whose size matches and whose remote mtime is older than the local
//!   one are assumed unchanged;
//! - anything else is resized to the remote size and its blocks are compared
//!   in `seq` order. The first block whose checksum differs is downloaded and
//!   the scan stops there; later cycles pick up the rest.
//!
//! A partially patched file keeps the remote mtime so the next cycle diffs it
//! again. Only a pass that finds every block matching stamps it with the
//! current time.
//!
//! Every remote call that fails is logged and treated as an empty answer.

use super::api::RemoteIndex;
use crate::error::Result;
use crate::index::scanner::mtime_secs;
use crate::index::{IndexedFile, IndexedFilePart};
use crate::integrity::block_checksum;
use crate::path::resolve;
use filetime::FileTime;
use std::io::{ErrorKind, SeekFrom};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::{debug, info, warn};

/// What one cycle did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CycleReport {
    /// A file was created or rewritten; resets the backoff.
    pub changed: bool,
    pub dirs_created: usize,
    pub dirs_removed: usize,
    pub files_created: usize,
    pub files_removed: usize,
    pub blocks_fetched: usize,
    /// Entries left alone: unchanged, conflicting or failing locally.
    pub skipped: usize,
}

/// Unwrap a remote call, substituting an empty answer on failure.
pub fn or_empty<T: Default>(call: &str, result: Result<T>) -> T {
    match result {
        Ok(value) => value,
        Err(e) => {
            warn!(call, "Remote call failed, continuing without data: {}", e);
            T::default()
        }
    }
}

pub struct Reconciler<R> {
    remote: R,
    root: PathBuf,
    cursor: i64,
    rewind: i64,
}

impl<R: RemoteIndex> Reconciler<R> {
    pub fn new(remote: R, root: impl Into<PathBuf>, rewind: i64) -> Self {
        Self {
            remote,
            root: root.into(),
            cursor: 0,
            rewind,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Highest `lastIndexed` seen on a file row so far.
    pub fn cursor(&self) -> i64 {
        self.cursor
    }

    pub async fn run_cycle(&mut self) -> CycleReport {
        let mut report = CycleReport::default();
        let bound = self.cursor - self.rewind;

        let dirs = or_empty("dirs", self.remote.dirs(bound).await);
        if dirs.is_empty() {
            return report;
        }
        for dir in &dirs {
            self.apply_dir(dir, &mut report).await;
        }

        let files = or_empty("files", self.remote.files(bound, "/").await);
        for file in &files {
            self.cursor = self.cursor.max(file.last_indexed);
            self.apply_file(file, &mut report).await;
        }

        if report.changed {
            info!(
                root = %self.root.display(),
                created = report.files_created,
                blocks = report.blocks_fetched,
                removed = report.files_removed + report.dirs_removed,
                "Synced changes"
            );
        }
        report
    }

    fn local_path(&self, entry: &IndexedFile, report: &mut CycleReport) -> Option<PathBuf> {
        match resolve(&self.root, &entry.file_path) {
            Ok(path) => Some(path),
            Err(e) => {
                warn!(path = %entry.file_path, "Ignoring entry: {}", e);
                report.skipped += 1;
                None
            }
        }
    }

    async fn apply_dir(&self, dir: &IndexedFile, report: &mut CycleReport) {
        let Some(path) = self.local_path(dir, report) else {
            return;
        };

        if dir.is_deleted() {
            if path == self.root {
                report.skipped += 1;
                return;
            }
            match remove_path(&path).await {
                Ok(true) => report.dirs_removed += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!(path = %path.display(), "Failed to remove directory: {}", e);
                    report.skipped += 1;
                }
            }
            return;
        }

        if fs::metadata(&path).await.map(|m| m.is_dir()).unwrap_or(false) {
            return;
        }
        match create_dir(&path, dir.file_mode).await {
            Ok(()) => {
                debug!(path = %dir.file_path, "Created directory");
                report.dirs_created += 1;
            }
            Err(e) => {
                warn!(path = %path.display(), "Failed to create directory: {}", e);
                report.skipped += 1;
            }
        }
    }

    async fn apply_file(&self, file: &IndexedFile, report: &mut CycleReport) {
        let Some(path) = self.local_path(file, report) else {
            return;
        };

        if file.is_deleted() {
            match remove_path(&path).await {
                Ok(true) => report.files_removed += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!(path = %path.display(), "Failed to remove file: {}", e);
                    report.skipped += 1;
                }
            }
            return;
        }

        let size = file.file_size.max(0) as u64;
        let metadata = match fs::metadata(&path).await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                report.changed = true;
                match self.fetch_new(file, &path, size).await {
                    Ok(()) => report.files_created += 1,
                    Err(e) => {
                        warn!(path = %path.display(), "Failed to create file: {}", e);
                        report.skipped += 1;
                    }
                }
                return;
            }
            Err(e) => {
                warn!(path = %path.display(), "Failed to stat: {}", e);
                report.skipped += 1;
                return;
            }
        };

        if metadata.is_dir() {
            warn!(path = %path.display(), "Local directory in the way of remote file");
            report.skipped += 1;
            return;
        }

        if metadata.len() == size && file.last_modified < mtime_secs(&metadata) {
            report.skipped += 1;
            return;
        }

        report.changed = true;
        match self.patch_first_mismatch(file, &path, size).await {
            Ok(fetched) => report.blocks_fetched += fetched,
            Err(e) => {
                warn!(path = %path.display(), "Failed to update file: {}", e);
                report.skipped += 1;
            }
        }
    }

    async fn fetch_new(&self, file: &IndexedFile, path: &Path, size: u64) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let mut out = fs::File::create(path).await?;
        debug!(path = %file.file_path, size, "Downloading new file");
        if size > 0 {
            let written = or_empty(
                "download",
                self.remote.download(&file.file_path, 0, size, &mut out).await,
            );
            if written < size {
                debug!(path = %file.file_path, written, size, "Short download");
                drop(out);
                pin_mtime(path, file.last_modified)?;
            }
        }
        Ok(())
    }

    /// Resize to `size`, then fetch the first block whose checksum differs.
    /// Returns the number of blocks fetched (0 or 1).
    async fn patch_first_mismatch(&self, file: &IndexedFile, path: &Path, size: u64) -> Result<usize> {
        let mut local = fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .await?;
        local.set_len(size).await?;

        let parts = or_empty("file_parts", self.remote.file_parts(&file.file_path).await);
        for part in &parts {
            if block_matches(&mut local, part).await? {
                continue;
            }
            debug!(path = %file.file_path, seq = part.seq, "Block differs");
            or_empty(
                "download",
                self.remote
                    .download(&file.file_path, part.start_index, part.offset, &mut local)
                    .await,
            );
            drop(local);
            pin_mtime(path, file.last_modified)?;
            return Ok(1);
        }
        drop(local);

        if parts.is_empty() && size > 0 {
            pin_mtime(path, file.last_modified)?;
        } else {
            filetime::set_file_mtime(path, FileTime::now())?;
        }
        Ok(0)
    }
}

/// Keep the local mtime at the remote one so the file is not taken as
/// up to date.
fn pin_mtime(path: &Path, last_modified: i64) -> Result<()> {
    filetime::set_file_mtime(path, FileTime::from_unix_time(last_modified, 0))?;
    Ok(())
}

async fn block_matches(local: &mut fs::File, part: &IndexedFilePart) -> Result<bool> {
    local.seek(SeekFrom::Start(part.start_index)).await?;
    let mut buf = Vec::new();
    local.take(part.offset).read_to_end(&mut buf).await?;
    Ok(block_checksum(&buf) == part.checksum)
}

/// Remove a file or a whole directory tree. Returns false if nothing was there.
async fn remove_path(path: &Path) -> std::io::Result<bool> {
    let metadata = match fs::symlink_metadata(path).await {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e),
    };
    let result = if metadata.is_dir() {
        fs::remove_dir_all(path).await
    } else {
        fs::remove_file(path).await
    };
    match result {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

async fn create_dir(path: &Path, mode: u32) -> std::io::Result<()> {
    fs::create_dir_all(path).await?;
    set_mode(path, mode).await
}

#[cfg(unix)]
async fn set_mode(path: &Path, mode: u32) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    if mode == 0 {
        return Ok(());
    }
    fs::set_permissions(path, std::fs::Permissions::from_mode(mode)).await
}

#[cfg(not(unix))]
async fn set_mode(_path: &Path, _mode: u32) -> std::io::Result<()> {
    Ok(())
}
