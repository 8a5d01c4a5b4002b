//! The engineering-failure error stratum (§7 kind 3): catalog I/O, bundle
//! pool, and scanner failures that the host is expected to propagate with
//! `?` rather than fold into a [`crate::status::StatusCode`].

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum HostError {
    #[error("bundle not found: {0}")]
    BundleNotFound(PathBuf),

    #[error("failed to load bundle {path}: {reason}")]
    BundleLoadFailed { path: PathBuf, reason: String },

    #[error("failed to unload bundle {path}: {reason}")]
    BundleUnloadFailed { path: PathBuf, reason: String },

    #[error("catalog I/O error: {0}")]
    CatalogIo(#[from] std::io::Error),

    #[error("malformed catalog: {0}")]
    CatalogFormat(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}
