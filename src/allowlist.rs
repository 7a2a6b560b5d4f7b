//! The allowlist manager.
//!
//! [`AllowlistManager`] owns the in-memory allowlist. It is the only writer
//! of the store and the only caller of the renderer. Every mutation runs
//! under one write lock covering the duplicate check, the append and the
//! store save, so concurrent `add()` calls for the same address store one
//! entry. Readers (`is_member`) share a read lock and always observe the
//! latest committed list.

use chrono::NaiveTime;
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info};

use crate::config::Config;
use crate::error::{AllowlistError, Result};
use crate::renderer::NginxRenderer;
use crate::scheduler::{self, Clock};
use crate::signal::ShutdownToken;
use crate::store::{AllowEntry, AllowlistStore};
use crate::validation::{parse_address, validate_time_of_day, Address};

/// Username recorded for baseline subnets.
pub const BASELINE_USER: &str = "default";

/// Manager settings taken from the configuration.
#[derive(Debug, Clone)]
pub struct ManagerOptions {
    pub baseline_subnets: Vec<String>,
    pub revert_daily: bool,
    pub revert_time: NaiveTime,
}

impl ManagerOptions {
    pub fn from_config(config: &Config) -> Result<Self> {
        let revert_time = validate_time_of_day(&config.revert_time)
            .map_err(|e| AllowlistError::Config(e.to_string()))?;
        Ok(Self {
            baseline_subnets: config.allowed_subnets.clone(),
            revert_daily: config.revert_daily,
            revert_time,
        })
    }
}

pub struct AllowlistManager {
    store: AllowlistStore,
    renderer: Option<NginxRenderer>,
    baseline: Vec<String>,
    entries: RwLock<Vec<AllowEntry>>,
    scheduler: Mutex<Option<JoinHandle<()>>>,
    shutdown: ShutdownToken,
}

impl AllowlistManager {
    /// Load the store, seed the baseline subnets and render the artifact.
    ///
    /// A corrupt store aborts startup. When `options.revert_daily` is set the
    /// revert scheduler is started with `clock`.
    pub fn initialize(
        options: ManagerOptions,
        store: AllowlistStore,
        renderer: Option<NginxRenderer>,
        clock: Arc<dyn Clock>,
    ) -> Result<Arc<Self>> {
        let revert_daily = options.revert_daily;
        let revert_time = options.revert_time;
        let manager = Self::open(options, store, renderer)?;
        manager.rerender()?;

        if revert_daily {
            let handle = scheduler::spawn(
                Arc::downgrade(&manager),
                clock,
                revert_time,
                manager.shutdown.clone(),
            )?;
            *manager.lock_scheduler() = Some(handle);
        } else {
            debug!("Daily revert disabled");
        }

        Ok(manager)
    }

    /// Load the store and seed the baseline subnets, without rendering or
    /// starting the scheduler.
    pub fn open(
        options: ManagerOptions,
        store: AllowlistStore,
        renderer: Option<NginxRenderer>,
    ) -> Result<Arc<Self>> {
        let entries = store.load().inspect_err(|e| {
            error!("CRITICAL: {}", e);
        })?;

        let manager = Arc::new(Self {
            store,
            renderer,
            baseline: options.baseline_subnets,
            entries: RwLock::new(entries),
            scheduler: Mutex::new(None),
            shutdown: ShutdownToken::new(),
        });

        for subnet in &manager.baseline {
            manager.insert(BASELINE_USER, subnet)?;
        }
        Ok(manager)
    }

    /// Whether `address` is already allowed, by exact text or by falling
    /// inside an allowed network. Invalid input is never a member.
    pub fn is_member(&self, address: &str) -> bool {
        let Some(candidate) = parse_address(address) else {
            return false;
        };
        Self::covered(&self.read_entries(), address, &candidate)
    }

    /// Allow `address` for `username`.
    ///
    /// Returns `Ok(true)` when a new entry was stored and rendered,
    /// `Ok(false)` for invalid or already covered addresses. A store failure
    /// leaves the list unchanged. A render failure is returned after the
    /// entry has been persisted.
    pub fn add(&self, username: &str, address: &str) -> Result<bool> {
        let inserted = self.insert(username, address)?;
        if inserted {
            self.rerender()?;
        }
        Ok(inserted)
    }

    /// Validate, deduplicate, append and persist, all under the write lock.
    fn insert(&self, username: &str, address: &str) -> Result<bool> {
        let Some(candidate) = parse_address(address) else {
            error!(address = %address, user = %username, "Invalid IP or network, not added");
            return Ok(false);
        };

        let mut entries = self.write_entries();
        if Self::covered(&entries, address, &candidate) {
            info!(address = %address, user = %username, "Address already in allowlist");
            return Ok(false);
        }

        entries.push(AllowEntry::new(username, candidate.to_string()));
        if let Err(e) = self.store.save(&entries) {
            entries.pop();
            return Err(e);
        }
        info!(address = %candidate, user = %username, "Address added to allowlist");
        Ok(true)
    }

    fn covered(entries: &[AllowEntry], raw: &str, candidate: &Address) -> bool {
        let canonical = candidate.to_string();
        entries.iter().any(|entry| {
            entry.address == raw
                || entry.address == canonical
                || parse_address(&entry.address).is_some_and(|existing| existing.covers(candidate))
        })
    }

    /// Clear everything and restore only the baseline subnets.
    ///
    /// Ends with a single render and reload of the reseeded list.
    pub fn reset_and_reseed(&self) -> Result<()> {
        {
            let mut entries = self.write_entries();
            self.store.reset()?;
            entries.clear();

            for subnet in &self.baseline {
                match parse_address(subnet) {
                    Some(candidate) if Self::covered(&entries, subnet, &candidate) => {
                        info!(address = %subnet, "Baseline subnet already covered");
                    }
                    Some(candidate) => {
                        entries.push(AllowEntry::new(BASELINE_USER, candidate.to_string()))
                    }
                    None => error!(address = %subnet, "Invalid baseline subnet, skipped"),
                }
            }
            self.store.save(&entries)?;
            info!(entries = entries.len(), "Allowlist reverted to baseline");
        }
        self.rerender()
    }

    /// Render the current list to the artifact and reload nginx.
    ///
    /// A no-op when no renderer is configured.
    pub fn rerender(&self) -> Result<()> {
        match &self.renderer {
            Some(renderer) => renderer.write_with(|| self.entries()),
            None => Ok(()),
        }
    }

    /// Snapshot of the current list, in insertion order.
    pub fn entries(&self) -> Vec<AllowEntry> {
        self.read_entries().clone()
    }

    pub fn baseline(&self) -> &[String] {
        &self.baseline
    }

    /// Stop the revert scheduler and wait for it to exit.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        let handle = self.lock_scheduler().take();
        if let Some(handle) = handle {
            // The scheduler may hold the last reference and run this itself
            if handle.thread().id() != thread::current().id() && handle.join().is_err() {
                error!("Revert scheduler panicked");
            }
        }
    }

    fn read_entries(&self) -> RwLockReadGuard<'_, Vec<AllowEntry>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_entries(&self) -> RwLockWriteGuard<'_, Vec<AllowEntry>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_scheduler(&self) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
        self.scheduler.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for AllowlistManager {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
