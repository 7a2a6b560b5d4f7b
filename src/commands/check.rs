//! Check command implementation.

use anyhow::Result;

use crate::config::Config;
use crate::validation::validate_ip_or_cidr;

/// Run the check command
pub fn run(ip_str: &str, config: &Config) -> Result<()> {
    let address = validate_ip_or_cidr(ip_str)?;
    let manager = super::open_readonly(config)?;

    println!();
    if manager.is_member(ip_str) {
        println!("{} is ALLOWED", address);
    } else {
        println!("{} is NOT allowed", address);
    }
    println!();

    Ok(())
}
