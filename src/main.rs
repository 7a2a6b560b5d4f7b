//! allowlistd - password-gated IP allowlist for nginx.

use anyhow::{Context, Result};
use clap::Parser;
use std::fs::OpenOptions;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::Level;
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::FmtSubscriber;

use allowlistd::cli::{Cli, Commands};
use allowlistd::config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Commands that need no configuration
    match &cli.command {
        Commands::Version => {
            println!("allowlistd {}", env!("CARGO_PKG_VERSION"));
            return Ok(());
        }
        Commands::HashPassword { password } => {
            init_logging(cli.level_override().unwrap_or(Level::INFO), None)?;
            return allowlistd::commands::hash_password::run(password.clone());
        }
        _ => {}
    }

    // Config loading logs before the configured level is known
    let bootstrap = FmtSubscriber::builder()
        .with_max_level(cli.level_override().unwrap_or(Level::INFO))
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .finish();
    let config = tracing::subscriber::with_default(bootstrap, || {
        Config::load_or_create(cli.config.as_deref(), &cli.instance_dir)
    })?;

    let log_level = match cli.level_override() {
        Some(level) => level,
        None => config.logging.tracing_level()?,
    };
    init_logging(log_level, config.log_path().as_deref())?;

    let config = Arc::new(config);
    match cli.command {
        Commands::Serve => allowlistd::commands::serve::run(config).await,
        Commands::Render => allowlistd::commands::render::run(&config),
        Commands::Revert => allowlistd::commands::revert::run(&config),
        Commands::Check { ip } => allowlistd::commands::check::run(&ip, &config),
        Commands::List => allowlistd::commands::list::run(&config),
        Commands::Version | Commands::HashPassword { .. } => Ok(()),
    }
}

/// Install the global subscriber, optionally copying every line to `log_file`.
fn init_logging(level: Level, log_file: Option<&Path>) -> Result<()> {
    let builder = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false);

    match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file: {:?}", path))?;
            let subscriber = builder
                .with_ansi(false)
                .with_writer(std::io::stderr.and(Mutex::new(file)))
                .finish();
            tracing::subscriber::set_global_default(subscriber)?;
        }
        None => {
            let subscriber = builder.with_writer(std::io::stderr).finish();
            tracing::subscriber::set_global_default(subscriber)?;
        }
    }
    Ok(())
}
