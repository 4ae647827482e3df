//! Fixed-offset block checksums (CRC-32/IEEE).

use crate::index::IndexedFilePart;
use std::io::Read;

/// Only checksum type produced by the indexer.
pub const CHECKSUM_TYPE: &str = "crc32";

/// Default block size for file parts (64KB)
pub const DEFAULT_BLOCK_SIZE: u64 = 64 * 1024;

/// Largest block size a server accepts. One block is held in memory while hashing.
pub const MAX_BLOCK_SIZE: u64 = 64 * 1024 * 1024;

/// CRC-32 of `data`, rendered as an unsigned decimal string.
pub fn block_checksum(data: &[u8]) -> String {
    crc32fast::hash(data).to_string()
}

/// Split a reader into fixed, non-overlapping blocks and checksum each one.
///
/// The last block may be shorter than `block_size`. An empty input yields no
/// parts.
pub fn compute_parts<R: Read>(
    file_path: &str,
    mut reader: R,
    block_size: u64,
) -> std::io::Result<Vec<IndexedFilePart>> {
    let block_size = block_size.max(1);
    let mut parts = Vec::new();
    let mut buf = vec![0u8; block_size as usize];
    let mut start_index = 0u64;
    let mut seq = 0u32;

    loop {
        let n = read_full(&mut reader, &mut buf)?;
        if n == 0 {
            break;
        }

        parts.push(IndexedFilePart {
            file_path: file_path.to_string(),
            seq,
            start_index,
            offset: n as u64,
            checksum: block_checksum(&buf[..n]),
            checksum_type: CHECKSUM_TYPE.to_string(),
        });

        start_index += n as u64;
        seq += 1;

        if n < buf.len() {
            break;
        }
    }

    Ok(parts)
}

/// Read until `buf` is full or EOF. Returns the number of bytes read.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
