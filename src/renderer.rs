//! nginx artifact rendering.
//!
//! The artifact is an `include`-able access list: one `allow` directive per
//! entry, sorted, followed by `deny all;`. Writes are serialized by a
//! renderer-owned lock and land through a temp file plus rename, so nginx
//! never reads a partial or interleaved file.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tempfile::NamedTempFile;
use tracing::{debug, error, info};

use crate::error::{AllowlistError, Result};
use crate::reloader::NginxReloader;
use crate::store::AllowEntry;

/// Render the artifact body for `entries`.
pub fn render(entries: &[AllowEntry]) -> String {
    let mut addresses: Vec<&str> = entries.iter().map(|e| e.address.as_str()).collect();
    addresses.sort_unstable();

    let mut out = String::with_capacity(addresses.len() * 24 + 10);
    for address in addresses {
        out.push_str("allow ");
        out.push_str(address);
        out.push_str(";\n");
    }
    out.push_str("deny all;\n");
    out
}

/// Writes the nginx artifact and triggers a reload afterwards.
pub struct NginxRenderer {
    path: PathBuf,
    write_lock: Mutex<()>,
    reloader: Option<Arc<NginxReloader>>,
}

impl NginxRenderer {
    /// Create a renderer for `path`. An empty path is a configuration error.
    pub fn new(path: impl Into<PathBuf>, reloader: Option<Arc<NginxReloader>>) -> Result<Self> {
        let path = path.into();
        if path.as_os_str().is_empty() {
            return Err(AllowlistError::ArtifactPathEmpty);
        }
        Ok(Self {
            path,
            write_lock: Mutex::new(()),
            reloader,
        })
    }

    /// Write `entries` to the artifact, then reload.
    pub fn write(&self, entries: &[AllowEntry]) -> Result<()> {
        self.write_with(|| entries.to_vec())
    }

    /// Write the list produced by `snapshot`, then reload.
    ///
    /// `snapshot` runs while the write lock is held, so when several writers
    /// queue up the last one to finish always renders the newest list.
    pub fn write_with<F>(&self, snapshot: F) -> Result<()>
    where
        F: FnOnce() -> Vec<AllowEntry>,
    {
        {
            let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
            let entries = snapshot();
            let body = render(&entries);

            if let Err(source) = self.write_atomic(body.as_bytes()) {
                error!(
                    path = %self.path.display(),
                    error = %source,
                    "CRITICAL: Failed to write nginx allowlist, check the directory exists and is writable"
                );
                return Err(AllowlistError::ArtifactWrite {
                    path: self.path.clone(),
                    source,
                });
            }
            info!(path = %self.path.display(), entries = entries.len(), "Nginx allowlist written");
        }

        match &self.reloader {
            Some(reloader) => {
                reloader.reload();
            }
            None => debug!("No reloader configured, skipping nginx reload"),
        }
        Ok(())
    }

    fn write_atomic(&self, bytes: &[u8]) -> io::Result<()> {
        let parent = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        // The directory is not created: a missing one means the install is wrong.
        let mut temp_file = NamedTempFile::new_in(parent)?;
        temp_file.write_all(bytes)?;
        temp_file.as_file().sync_all()?;
        temp_file.persist(&self.path).map_err(|e| e.error)?;

        // Temp files are created 0600, nginx workers need to read the artifact
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&self.path, fs::Permissions::from_mode(0o644))?;
        }
        Ok(())
    }
}
