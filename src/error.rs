//! Error types for sync operations.

use std::path::PathBuf;

use thiserror::Error;

use crate::store::StoreError;

/// Errors surfaced by the sync engine.
///
/// `Configuration` and `Listing` are fatal to the pull or push they occur
/// in. `Transfer` and `IgnoreFile` are collected into the outcome's error
/// list without stopping sibling transfers.
#[derive(Error, Debug)]
pub enum SyncError {
    /// No remote location was configured. Raised before any I/O happens.
    #[error("remote sync location is not configured")]
    Configuration,

    /// Listing the remote prefix failed, so the file universe is unknown
    /// and the pull cannot continue.
    #[error("failed to list objects under \"{prefix}\": {source}")]
    Listing {
        prefix: String,
        #[source]
        source: StoreError,
    },

    /// A single file download, upload, or hash failed.
    #[error("transfer failed for \"{path}\": {reason}")]
    Transfer { path: String, reason: String },

    /// The workspace ignore file exists but could not be read.
    #[error("failed to load ignore file {}: {source}", path.display())]
    IgnoreFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
