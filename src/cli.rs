//! CLI argument parsing with clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::Level;

#[derive(Parser)]
#[command(name = "allowlistd")]
#[command(author, version, about = "Password-gated IP allowlist for nginx")]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file path (skips the config search)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Directory searched first for config.yaml
    #[arg(long, default_value = "instance", global = true)]
    pub instance_dir: PathBuf,

    /// Quiet mode (errors only)
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Verbose mode (debug output)
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

impl Cli {
    /// Log level forced by `--verbose` or `--quiet`, if any.
    pub fn level_override(&self) -> Option<Level> {
        if self.verbose {
            Some(Level::DEBUG)
        } else if self.quiet {
            Some(Level::ERROR)
        } else {
            None
        }
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Serve the authentication endpoints and run the daily revert
    Serve,

    /// Re-render the nginx allowlist from the store and reload nginx
    Render,

    /// Revert the allowlist to the baseline subnets now
    Revert,

    /// Check whether an IP or network is allowed
    Check {
        /// IP address or CIDR to check
        ip: String,
    },

    /// List stored allowlist entries
    List,

    /// Print an argon2 hash for auth.static.password_hashed
    HashPassword {
        /// Password to hash
        password: String,
    },

    /// Show version
    Version,
}
