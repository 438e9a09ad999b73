//! Content fingerprinting for change detection.
//!
//! A fingerprint is the (size, mtime, content hash) tuple of one file.
//! Hashing streams the file in fixed-size reads, so large files never
//! have to fit in memory. BLAKE3 is used for change detection only, not
//! as an integrity control.

use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::time::UNIX_EPOCH;

use anyhow::{Context, Result};
use serde::Serialize;

const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Stat metadata and content digest for a single file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint {
    pub size_bytes: u64,
    pub modified_at_ms: u64,
    pub content_hash: String,
}

/// Last known state of one synced file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileRecord {
    pub relative_path: String,
    pub size_bytes: u64,
    pub modified_at_ms: u64,
    pub content_hash: String,
}

impl FileRecord {
    /// Attach a workspace-relative path to a fingerprint.
    pub fn new(relative_path: impl Into<String>, fingerprint: Fingerprint) -> Self {
        Self {
            relative_path: relative_path.into(),
            size_bytes: fingerprint.size_bytes,
            modified_at_ms: fingerprint.modified_at_ms,
            content_hash: fingerprint.content_hash,
        }
    }
}

/// Fingerprint a file by streaming its contents through BLAKE3.
///
/// Read errors (e.g. the file disappeared between scan and hash) propagate
/// to the caller as per-file errors.
pub fn fingerprint_file(path: &Path) -> Result<Fingerprint> {
    let mut file =
        File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let metadata = file
        .metadata()
        .with_context(|| format!("Failed to stat {}", path.display()))?;

    // Missing or pre-epoch mtimes degrade to 0 instead of failing.
    let modified_at_ms = metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0);

    let mut hasher = blake3::Hasher::new();
    let mut buffer = [0u8; READ_BUFFER_SIZE];

    loop {
        let bytes_read = file
            .read(&mut buffer)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(Fingerprint {
        size_bytes: metadata.len(),
        modified_at_ms,
        content_hash: hasher.finalize().to_hex().to_string(),
    })
}

/// Fingerprint a file without blocking the async runtime.
pub async fn fingerprint_file_async(path: &Path) -> Result<Fingerprint> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || fingerprint_file(&path)).await?
}
