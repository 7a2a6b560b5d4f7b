//! Error types for allowlistd.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AllowlistError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Store file {path:?} is corrupt at line {line}: {reason}. Fix or delete it")]
    StoreCorrupt {
        path: PathBuf,
        line: u64,
        reason: String,
    },

    #[error("Store I/O error for {path:?}: {source}")]
    StoreIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("nginx allowlist path is empty")]
    ArtifactPathEmpty,

    #[error("Failed to write nginx allowlist {path:?}: {source}")]
    ArtifactWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to start the revert scheduler: {0}")]
    Scheduler(#[source] std::io::Error),
}

pub type Result<T> = std::result::Result<T, AllowlistError>;
