//! Revert command implementation.

use anyhow::Result;

use crate::config::Config;

/// Run the revert command
pub fn run(config: &Config) -> Result<()> {
    // reset_and_reseed renders and reloads once at the end
    let manager = super::open_unrendered(config)?;
    manager.reset_and_reseed()?;

    println!(
        "Allowlist reverted to {} baseline entries",
        manager.entries().len()
    );
    Ok(())
}
