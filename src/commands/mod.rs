//! CLI command implementations.

pub mod check;
pub mod hash_password;
pub mod list;
pub mod render;
pub mod revert;
pub mod serve;

use anyhow::Result;
use std::sync::Arc;
use tracing::info;

use crate::allowlist::{AllowlistManager, ManagerOptions};
use crate::config::Config;
use crate::reloader::NginxReloader;
use crate::renderer::NginxRenderer;
use crate::scheduler::SystemClock;
use crate::store::AllowlistStore;

/// Build the manager: load the store, seed the baseline and render.
///
/// The daily revert only starts when both `daily_revert` and the
/// configuration ask for it.
pub(crate) fn open_manager(config: &Config, daily_revert: bool) -> Result<Arc<AllowlistManager>> {
    let mut options = ManagerOptions::from_config(config)?;
    options.revert_daily &= daily_revert;

    Ok(AllowlistManager::initialize(
        options,
        AllowlistStore::new(config.store_path()),
        renderer(config)?,
        Arc::new(SystemClock),
    )?)
}

/// Build the manager with its renderer but skip the startup render.
pub(crate) fn open_unrendered(config: &Config) -> Result<Arc<AllowlistManager>> {
    let options = ManagerOptions::from_config(config)?;
    Ok(AllowlistManager::open(
        options,
        AllowlistStore::new(config.store_path()),
        renderer(config)?,
    )?)
}

fn renderer(config: &Config) -> Result<Option<NginxRenderer>> {
    if !config.nginx.enabled {
        info!("nginx disabled, only the store is maintained");
        return Ok(None);
    }
    let reloader = NginxReloader::from_command(&config.nginx.reload_command);
    Ok(Some(NginxRenderer::new(
        config.allowlist_path(),
        Some(Arc::new(reloader)),
    )?))
}

/// Load the stored list without seeding, rendering or reloading.
pub(crate) fn open_readonly(config: &Config) -> Result<Arc<AllowlistManager>> {
    let mut options = ManagerOptions::from_config(config)?;
    options.baseline_subnets.clear();
    options.revert_daily = false;

    let store = AllowlistStore::new(config.store_path());
    Ok(AllowlistManager::initialize(
        options,
        store,
        None,
        Arc::new(SystemClock),
    )?)
}
