//! Persisted allowlist store.
//!
//! The store is a flat CSV file with the fixed header `username,ip,date`
//! and one row per entry. It is the durable mirror of the in-memory list
//! owned by [`AllowlistManager`](crate::allowlist::AllowlistManager).

use chrono::{Local, NaiveDateTime, SubsecRound};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::error::{AllowlistError, Result};
use crate::validation::parse_address;

/// Column names, in file order.
pub const CSV_HEADER: [&str; 3] = ["username", "ip", "date"];

/// Timestamp format used in the `date` column.
const DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

/// One allowlist record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllowEntry {
    pub username: String,
    #[serde(rename = "ip")]
    pub address: String,
    #[serde(rename = "date", with = "date_format")]
    pub created_at: NaiveDateTime,
}

impl AllowEntry {
    /// Create an entry stamped with the current local time.
    ///
    /// The timestamp is truncated to microseconds, the precision of the
    /// `date` column.
    pub fn new(username: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            address: address.into(),
            created_at: Local::now().naive_local().trunc_subsecs(6),
        }
    }
}

mod date_format {
    use super::DATE_FORMAT;
    use chrono::NaiveDateTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(dt: &NaiveDateTime, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&dt.format(DATE_FORMAT).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<NaiveDateTime, D::Error> {
        let raw = String::deserialize(d)?;
        NaiveDateTime::parse_from_str(&raw, "%Y-%m-%d %H:%M:%S%.f")
            .map_err(|e| serde::de::Error::custom(format!("invalid date '{}': {}", raw, e)))
    }
}

/// CSV-backed store for allowlist entries.
#[derive(Debug, Clone)]
pub struct AllowlistStore {
    path: PathBuf,
}

impl AllowlistStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load all entries.
    ///
    /// A missing file is not an error and yields an empty list. A file whose
    /// header or rows do not match the three-field schema is reported as
    /// [`AllowlistError::StoreCorrupt`].
    pub fn load(&self) -> Result<Vec<AllowEntry>> {
        debug!(path = %self.path.display(), "Building allowlist from store");

        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                info!(path = %self.path.display(), "Store file not found, that's okay");
                return Ok(Vec::new());
            }
            Err(source) => {
                return Err(AllowlistError::StoreIo {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        let entries = self.parse(&content)?;
        info!(
            path = %self.path.display(),
            entries = entries.len(),
            "Store checks passed"
        );
        Ok(entries)
    }

    fn parse(&self, content: &str) -> Result<Vec<AllowEntry>> {
        if content.trim().is_empty() {
            return Ok(Vec::new());
        }

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(false)
            .from_reader(content.as_bytes());

        let headers = reader
            .headers()
            .map_err(|e| self.corrupt(1, e.to_string()))?
            .clone();
        if headers.iter().ne(CSV_HEADER.iter().copied()) {
            return Err(self.corrupt(
                1,
                format!("expected header '{}'", CSV_HEADER.join(",")),
            ));
        }

        let mut entries = Vec::new();
        for record in reader.records() {
            let record = record.map_err(|e| {
                let line = e.position().map(|p| p.line()).unwrap_or(0);
                let reason = match e.kind() {
                    csv::ErrorKind::UnequalLengths { len, .. } => {
                        format!("row has {} fields, expected {}", len, CSV_HEADER.len())
                    }
                    _ => e.to_string(),
                };
                self.corrupt(line, reason)
            })?;
            let line = record.position().map(|p| p.line()).unwrap_or(0);

            let entry: AllowEntry = record
                .deserialize(Some(&headers))
                .map_err(|e| self.corrupt(line, e.to_string()))?;
            // Rendered verbatim into the nginx include
            if parse_address(&entry.address).is_none() {
                return Err(self.corrupt(line, format!("invalid address '{}'", entry.address)));
            }
            entries.push(entry);
        }
        Ok(entries)
    }

    fn corrupt(&self, line: u64, reason: String) -> AllowlistError {
        AllowlistError::StoreCorrupt {
            path: self.path.clone(),
            line,
            reason,
        }
    }

    /// Overwrite the store with `entries`.
    ///
    /// Content goes to a temporary file in the same directory which is then
    /// renamed over the store, so readers never observe a partial file.
    pub fn save(&self, entries: &[AllowEntry]) -> Result<()> {
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(Vec::new());

        writer
            .write_record(CSV_HEADER)
            .map_err(|e| self.io_error(e.into()))?;
        for entry in entries {
            writer.serialize(entry).map_err(|e| self.io_error(e.into()))?;
        }
        let bytes = writer
            .into_inner()
            .map_err(|e| self.io_error(e.into_error()))?;

        self.write_atomic(&bytes)
            .map_err(|source| self.io_error(source))?;
        debug!(path = %self.path.display(), entries = entries.len(), "Store saved");
        Ok(())
    }

    /// Truncate the store to the header only. Reseeding is the caller's job.
    pub fn reset(&self) -> Result<()> {
        info!(path = %self.path.display(), "Clearing the store");
        self.save(&[])
    }

    fn write_atomic(&self, bytes: &[u8]) -> io::Result<()> {
        let parent = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&parent)?;

        let mut temp_file = NamedTempFile::new_in(&parent)?;
        temp_file.write_all(bytes)?;
        temp_file.as_file().sync_all()?;
        temp_file.persist(&self.path).map_err(|e| e.error)?;
        Ok(())
    }

    fn io_error(&self, source: io::Error) -> AllowlistError {
        AllowlistError::StoreIo {
            path: self.path.clone(),
            source,
        }
    }
}
