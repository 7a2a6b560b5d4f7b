//! Render command implementation.
//!
//! Rewrites the nginx allowlist from the store and reloads nginx, for when a
//! previous render failed after the entry was already stored.

use anyhow::{bail, Result};

use crate::config::Config;

/// Run the render command
pub fn run(config: &Config) -> Result<()> {
    if !config.nginx.enabled {
        bail!("nginx is disabled in {}, nothing to render", config.path.display());
    }

    // Opening the manager renders and reloads once
    let manager = super::open_manager(config, false)?;

    println!(
        "Rendered {} entries to {}",
        manager.entries().len(),
        config.allowlist_path().display()
    );
    Ok(())
}
