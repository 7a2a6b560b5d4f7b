//! List command implementation.

use anyhow::Result;

use crate::config::Config;

/// Run the list command
pub fn run(config: &Config) -> Result<()> {
    let manager = super::open_readonly(config)?;
    let entries = manager.entries();

    println!();
    println!("Allowlist ({}):", config.store_path().display());
    if entries.is_empty() {
        println!("  (empty)");
    } else {
        let width = entries.iter().map(|e| e.address.len()).max().unwrap_or(0);
        for entry in &entries {
            println!(
                "  {:<width$}  {:<16}  {}",
                entry.address,
                entry.username,
                entry.created_at.format("%Y-%m-%d %H:%M:%S"),
                width = width
            );
        }
    }
    println!();
    println!("{} entries", entries.len());

    Ok(())
}
