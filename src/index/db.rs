//! Persistent index store backed by fjall.
//!
//! Layout under `<root>/.sync/index`:
//! - `files` partition: `file_path` -> bincode(IndexedFile)
//! - `parts` partition: `file_path \0 seq(u32 BE)` -> bincode(IndexedFilePart)
//!
//! The parts key layout makes a prefix scan return one file's parts in `seq`
//! order.

use super::{FileStatus, IndexStore, IndexedFile, IndexedFilePart};
use crate::error::Result;
use fjall::{Config, Keyspace, PartitionCreateOptions, PartitionHandle, PersistMode};
use std::path::{Path, PathBuf};

/// Directory inside each monitored root holding server-side state.
pub const STATE_DIR: &str = ".sync";

pub struct IndexDatabase {
    keyspace: Keyspace,
    files: PartitionHandle,
    parts: PartitionHandle,
}

impl IndexDatabase {
    /// Open or create the index for a monitored root.
    pub fn open(root: &Path) -> Result<Self> {
        let db_path = Self::db_path(root);
        std::fs::create_dir_all(&db_path)?;

        let keyspace = Config::new(&db_path).open()?;
        let files = keyspace.open_partition("files", PartitionCreateOptions::default())?;
        let parts = keyspace.open_partition("parts", PartitionCreateOptions::default())?;

        Ok(Self {
            keyspace,
            files,
            parts,
        })
    }

    pub fn db_path(root: &Path) -> PathBuf {
        root.join(STATE_DIR).join("index")
    }

    /// Insert or overwrite one row.
    pub fn put_file(&self, file: &IndexedFile) -> Result<()> {
        self.files
            .insert(file.file_path.as_bytes(), bincode::serialize(file)?)?;
        Ok(())
    }

    /// Write a file row and replace its parts atomically.
    pub fn commit_file(&self, file: &IndexedFile, parts: &[IndexedFilePart]) -> Result<()> {
        let mut batch = self.keyspace.batch();

        for key in self.part_keys(&file.file_path)? {
            batch.remove(&self.parts, key);
        }
        for part in parts {
            batch.insert(
                &self.parts,
                part_key(&part.file_path, part.seq),
                bincode::serialize(part)?,
            );
        }
        batch.insert(
            &self.files,
            file.file_path.as_bytes(),
            bincode::serialize(file)?,
        );

        batch.commit()?;
        Ok(())
    }

    /// Mark a row deleted, drop its parts and stamp it with `now`.
    ///
    /// Returns false if the path was never indexed.
    pub fn mark_deleted(&self, file_path: &str, now: i64) -> Result<bool> {
        let Some(mut file) = self.get(file_path)? else {
            return Ok(false);
        };
        file.status = FileStatus::Deleted;
        file.last_indexed = now;
        self.commit_file(&file, &[])?;
        Ok(true)
    }

    /// Every row in the index, including deleted ones.
    pub fn all_files(&self) -> Result<Vec<IndexedFile>> {
        let mut out = Vec::new();
        for item in self.files.iter() {
            let (_, value) = item?;
            out.push(bincode::deserialize(&value)?);
        }
        Ok(out)
    }

    /// Flush the journal to disk.
    pub fn persist(&self) -> Result<()> {
        self.keyspace.persist(PersistMode::SyncAll)?;
        Ok(())
    }

    fn part_keys(&self, file_path: &str) -> Result<Vec<Vec<u8>>> {
        let mut keys = Vec::new();
        for item in self.parts.prefix(part_prefix(file_path)) {
            let (key, _) = item?;
            keys.push(key.to_vec());
        }
        Ok(keys)
    }
}

impl IndexStore for IndexDatabase {
    fn get(&self, file_path: &str) -> Result<Option<IndexedFile>> {
        match self.files.get(file_path.as_bytes())? {
            Some(value) => Ok(Some(bincode::deserialize(&value)?)),
            None => Ok(None),
        }
    }

    fn dirs_since(&self, bound: i64) -> Result<Vec<IndexedFile>> {
        let mut out = Vec::new();
        for item in self.files.iter() {
            let (_, value) = item?;
            let file: IndexedFile = bincode::deserialize(&value)?;
            if file.is_dir() && file.last_indexed > bound {
                out.push(file);
            }
        }
        Ok(out)
    }

    fn files_since(&self, bound: i64, prefix: &str) -> Result<Vec<IndexedFile>> {
        let mut out = Vec::new();
        for item in self.files.prefix(prefix.as_bytes()) {
            let (_, value) = item?;
            let file: IndexedFile = bincode::deserialize(&value)?;
            if file.file_size >= 0
                && file.status != FileStatus::Updating
                && file.last_indexed > bound
            {
                out.push(file);
            }
        }
        Ok(out)
    }

    fn file_parts(&self, file_path: &str) -> Result<Vec<IndexedFilePart>> {
        let mut out = Vec::new();
        for item in self.parts.prefix(part_prefix(file_path)) {
            let (_, value) = item?;
            out.push(bincode::deserialize(&value)?);
        }
        Ok(out)
    }
}

fn part_prefix(file_path: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(file_path.len() + 1);
    key.extend_from_slice(file_path.as_bytes());
    key.push(0);
    key
}

fn part_key(file_path: &str, seq: u32) -> Vec<u8> {
    let mut key = part_prefix(file_path);
    key.extend_from_slice(&seq.to_be_bytes());
    key
}
