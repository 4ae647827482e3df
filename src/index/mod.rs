//! Per-monitor file index.
//!
//! The server answers every API query from an [`IndexStore`]. The concrete
//! store is [`IndexDatabase`] (fjall), kept current by [`Indexer`] scans that
//! are triggered periodically and, with the `watch` feature, by filesystem
//! events.

pub mod db;
pub mod scanner;
#[cfg(feature = "watch")]
pub mod watch;

pub use db::IndexDatabase;
pub use scanner::{Indexer, ScanStats};

use crate::error::Result;
use serde::{Deserialize, Serialize};

/// `file_size` value marking a directory row.
pub const DIR_SIZE: i64 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    Normal,
    /// Content is being rehashed; excluded from file listings.
    Updating,
    Deleted,
}

/// Index row for a file or a directory (`file_size == DIR_SIZE`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexedFile {
    pub file_path: String,
    /// Unix seconds
    pub last_modified: i64,
    pub file_size: i64,
    pub file_mode: u32,
    pub status: FileStatus,
    /// Indexing watermark (unix seconds); the client's sync cursor.
    pub last_indexed: i64,
}

impl IndexedFile {
    pub fn is_dir(&self) -> bool {
        self.file_size == DIR_SIZE
    }

    pub fn is_deleted(&self) -> bool {
        self.status == FileStatus::Deleted
    }
}

/// One fixed block of a file's current content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexedFilePart {
    pub file_path: String,
    pub seq: u32,
    pub start_index: u64,
    /// Block length in bytes
    pub offset: u64,
    pub checksum: String,
    pub checksum_type: String,
}

/// Read side of the index, shared by concurrent request handlers.
pub trait IndexStore: Send + Sync {
    /// Point lookup by index path.
    fn get(&self, file_path: &str) -> Result<Option<IndexedFile>>;

    /// Directory rows with `last_indexed > bound`, any status.
    fn dirs_since(&self, bound: i64) -> Result<Vec<IndexedFile>>;

    /// File rows with `last_indexed > bound`, status other than updating,
    /// and a path starting with `prefix` (literal byte prefix).
    fn files_since(&self, bound: i64, prefix: &str) -> Result<Vec<IndexedFile>>;

    /// All parts of exactly one path, ordered by `seq`.
    fn file_parts(&self, file_path: &str) -> Result<Vec<IndexedFilePart>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_indexed_file_json_field_names() {
        let file = IndexedFile {
            file_path: "/a.txt".to_string(),
            last_modified: 10,
            file_size: 9,
            file_mode: 0o644,
            status: FileStatus::Normal,
            last_indexed: 20,
        };
        let json = serde_json::to_value(&file).unwrap();
        assert_eq!(json["filePath"], "/a.txt");
        assert_eq!(json["lastModified"], 10);
        assert_eq!(json["fileSize"], 9);
        assert_eq!(json["fileMode"], 0o644);
        assert_eq!(json["status"], "normal");
        assert_eq!(json["lastIndexed"], 20);
    }

    #[test]
    fn test_indexed_file_part_json_field_names() {
        let part = IndexedFilePart {
            file_path: "/a.txt".to_string(),
            seq: 1,
            start_index: 3,
            offset: 3,
            checksum: "42".to_string(),
            checksum_type: "crc32".to_string(),
        };
        let json = serde_json::to_value(&part).unwrap();
        assert_eq!(json["startIndex"], 3);
        assert_eq!(json["checksumType"], "crc32");
    }

    #[test]
    fn test_dir_sentinel() {
        let dir = IndexedFile {
            file_path: "/d".to_string(),
            last_modified: 0,
            file_size: DIR_SIZE,
            file_mode: 0o755,
            status: FileStatus::Deleted,
            last_indexed: 0,
        };
        assert!(dir.is_dir());
        assert!(dir.is_deleted());
    }
}
