//! Content fingerprints used as dedup and resume keys.
//!
//! Files up to `large_file_threshold` bytes hash their whole content
//! (`b3:<hex>`). Larger files use a surrogate (`p3:<hex>`): BLAKE3 over the
//! little-endian size followed by the first and last `partial_bytes` bytes.
//! The scheme depends only on size, so it is stable across runs.

use crate::error::FingerprintError;
use crate::models::Fingerprint;
use std::fs;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

const BUF_SIZE: usize = 8192;

#[derive(Debug, Clone, Copy)]
pub struct Fingerprinter {
    large_file_threshold: u64,
    partial_bytes: u64,
}

impl Default for Fingerprinter {
    fn default() -> Self {
        Self::new(256 * 1024 * 1024, 1024 * 1024)
    }
}

impl Fingerprinter {
    pub fn new(large_file_threshold: u64, partial_bytes: u64) -> Self {
        Self {
            large_file_threshold,
            partial_bytes: partial_bytes.max(1),
        }
    }

    pub fn fingerprint(&self, path: &Path) -> Result<Fingerprint, FingerprintError> {
        let wrap = |source| FingerprintError {
            path: path.to_path_buf(),
            source,
        };
        let mut file = fs::File::open(path).map_err(wrap)?;
        let size = file.metadata().map_err(wrap)?.len();
        if size > self.large_file_threshold {
            partial_hash(&mut file, size, self.partial_bytes).map_err(wrap)
        } else {
            full_hash(&mut file).map_err(wrap)
        }
    }
}

fn full_hash(file: &mut fs::File) -> std::io::Result<Fingerprint> {
    let mut hasher = blake3::Hasher::new();
    let mut buf = [0u8; BUF_SIZE];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(Fingerprint::new(format!("b3:{}", hasher.finalize().to_hex())))
}

fn partial_hash(file: &mut fs::File, size: u64, window: u64) -> std::io::Result<Fingerprint> {
    let mut hasher = blake3::Hasher::new();
    hasher.update(&size.to_le_bytes());
    hash_window(file, 0, window.min(size), &mut hasher)?;
    let tail_start = size.saturating_sub(window);
    hash_window(file, tail_start, size - tail_start, &mut hasher)?;
    Ok(Fingerprint::new(format!("p3:{}", hasher.finalize().to_hex())))
}

fn hash_window(
    file: &mut fs::File,
    start: u64,
    len: u64,
    hasher: &mut blake3::Hasher,
) -> std::io::Result<()> {
    file.seek(SeekFrom::Start(start))?;
    let mut remaining = len;
    let mut buf = [0u8; BUF_SIZE];
    while remaining > 0 {
        let want = remaining.min(BUF_SIZE as u64) as usize;
        let n = file.read(&mut buf[..want])?;
        if n == 0 {
            // File shrank underneath us; hash what is there.
            break;
        }
        hasher.update(&buf[..n]);
        remaining -= n as u64;
    }
    Ok(())
}
