//! Full-tree indexer.
//!
//! Walks a monitored root and brings its [`IndexDatabase`] up to date:
//! new or changed entries are (re)hashed and stamped with the scan time,
//! vanished entries are marked deleted. Every ancestor of a changed path is
//! re-stamped too, so a client polling `/dirs` sees activity anywhere below.

use super::db::{IndexDatabase, STATE_DIR};
use super::{FileStatus, IndexStore, IndexedFile, DIR_SIZE};
use crate::error::Result;
use crate::integrity::compute_parts;
use crate::path::{ancestors, to_index_path};
use ignore::WalkBuilder;
use std::collections::HashSet;
use std::fs::{self, Metadata};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ScanStats {
    pub indexed: usize,
    pub unchanged: usize,
    pub deleted: usize,
}

impl ScanStats {
    pub fn changed(&self) -> bool {
        self.indexed > 0 || self.deleted > 0
    }
}

pub struct Indexer {
    root: PathBuf,
    db: Arc<IndexDatabase>,
    block_size: u64,
}

impl Indexer {
    pub fn new(root: impl Into<PathBuf>, db: Arc<IndexDatabase>, block_size: u64) -> Self {
        Self {
            root: root.into(),
            db,
            block_size: block_size.max(1),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn db(&self) -> &Arc<IndexDatabase> {
        &self.db
    }

    /// Scan the tree, stamping changes with the current unix time.
    pub fn scan(&self) -> Result<ScanStats> {
        self.scan_at(chrono::Utc::now().timestamp())
    }

    /// Scan the tree, stamping changes with `now`.
    pub fn scan_at(&self, now: i64) -> Result<ScanStats> {
        let mut stats = ScanStats::default();
        let mut seen: HashSet<String> = HashSet::new();
        let mut touched: HashSet<String> = HashSet::new();

        let walker = WalkBuilder::new(&self.root)
            .hidden(false)
            .ignore(false)
            .git_ignore(false)
            .git_global(false)
            .git_exclude(false)
            .parents(false)
            .follow_links(false)
            .filter_entry(|entry| entry.depth() == 0 || entry.file_name() != STATE_DIR)
            .build();

        for result in walker {
            let entry = match result {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(root = %self.root.display(), "Skipping unreadable entry: {}", e);
                    continue;
                }
            };

            let is_symlink = entry.file_type().map(|t| t.is_symlink()).unwrap_or(true);
            if is_symlink {
                continue;
            }

            let metadata = match entry.metadata() {
                Ok(m) => m,
                Err(e) => {
                    warn!(path = %entry.path().display(), "Failed to stat: {}", e);
                    continue;
                }
            };

            let index_path = to_index_path(&self.root, entry.path())?;
            seen.insert(index_path.clone());

            let changed = if metadata.is_dir() {
                self.index_dir(&index_path, &metadata, now)?
            } else {
                self.index_file(&index_path, entry.path(), &metadata, now)?
            };

            if changed {
                stats.indexed += 1;
                touched.extend(ancestors(&index_path));
            } else {
                stats.unchanged += 1;
            }
        }

        for row in self.db.all_files()? {
            if row.is_deleted() || row.file_path == "/" || seen.contains(&row.file_path) {
                continue;
            }
            debug!(path = %row.file_path, "Marking deleted");
            self.db.mark_deleted(&row.file_path, now)?;
            stats.deleted += 1;
            touched.extend(ancestors(&row.file_path));
        }

        for dir in touched {
            if let Some(mut row) = self.db.get(&dir)? {
                if row.is_dir() && !row.is_deleted() && row.last_indexed < now {
                    row.last_indexed = now;
                    self.db.put_file(&row)?;
                }
            }
        }

        if stats.changed() {
            self.db.persist()?;
        }

        Ok(stats)
    }

    fn index_dir(&self, index_path: &str, metadata: &Metadata, now: i64) -> Result<bool> {
        let mode = file_mode(metadata);
        if let Some(existing) = self.db.get(index_path)? {
            if existing.is_dir() && existing.status == FileStatus::Normal && existing.file_mode == mode
            {
                return Ok(false);
            }
        }

        debug!(path = %index_path, "Indexing directory");
        // Drops stale parts if the path used to be a file
        let row = IndexedFile {
            file_path: index_path.to_string(),
            last_modified: mtime_secs(metadata),
            file_size: DIR_SIZE,
            file_mode: mode,
            status: FileStatus::Normal,
            last_indexed: now,
        };
        self.db.commit_file(&row, &[])?;
        Ok(true)
    }

    fn index_file(
        &self,
        index_path: &str,
        abs: &Path,
        metadata: &Metadata,
        now: i64,
    ) -> Result<bool> {
        let mode = file_mode(metadata);
        let last_modified = mtime_secs(metadata);

        if let Some(existing) = self.db.get(index_path)? {
            if existing.status == FileStatus::Normal
                && existing.file_size == metadata.len() as i64
                && existing.last_modified == last_modified
                && existing.file_mode == mode
            {
                return Ok(false);
            }
        }

        let mut row = IndexedFile {
            file_path: index_path.to_string(),
            last_modified,
            file_size: metadata.len() as i64,
            file_mode: mode,
            status: FileStatus::Updating,
            last_indexed: now,
        };
        self.db.put_file(&row)?;

        let parts = match fs::File::open(abs)
            .and_then(|file| compute_parts(index_path, file, self.block_size))
        {
            Ok(parts) => parts,
            Err(e) => {
                // Left as updating; the next scan retries or marks it deleted
                warn!(path = %abs.display(), "Failed to hash file: {}", e);
                return Ok(true);
            }
        };

        debug!(path = %index_path, blocks = parts.len(), "Indexed file");
        row.file_size = parts.iter().map(|p| p.offset).sum::<u64>() as i64;
        row.status = FileStatus::Normal;
        self.db.commit_file(&row, &parts)?;
        Ok(true)
    }
}

pub(crate) fn mtime_secs(metadata: &Metadata) -> i64 {
    metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .unwrap_or_default()
        .as_secs() as i64
}

#[cfg(unix)]
fn file_mode(metadata: &Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn file_mode(metadata: &Metadata) -> u32 {
    if metadata.is_dir() {
        0o755
    } else {
        0o644
    }
}
