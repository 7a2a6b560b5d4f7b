//! # allowlistd - Password-gated IP allowlist for nginx
//!
//! Callers prove they know a password (or valid media server credentials);
//! their IP address is then recorded in an allowlist that nginx enforces
//! through an `include`d file of `allow` directives. A daily timer reverts
//! the list to a configured set of baseline subnets.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        allowlistd                           │
//! ├─────────────────────────────────────────────────────────────┤
//! │  CLI (clap)                                                 │
//! │    └── Commands: serve, render, revert, check, list...      │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Server (axum)                                              │
//! │    ├── POST /authenticate  -> AuthBackend -> manager.add    │
//! │    └── GET  /check_auth    -> manager.is_member             │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Auth (AuthBackend trait)                                   │
//! │    ├── StaticPasswordAuth (argon2)                          │
//! │    └── RemoteAuth (reqwest, Jellyfin)                       │
//! ├─────────────────────────────────────────────────────────────┤
//! │  AllowlistManager (RwLock over the list)                    │
//! │    ├── AllowlistStore (csv)                                 │
//! │    ├── NginxRenderer -> NginxReloader (systemctl)           │
//! │    └── Scheduler (daily revert thread, Clock)               │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use allowlistd::allowlist::{AllowlistManager, ManagerOptions};
//! use allowlistd::config::Config;
//! use allowlistd::renderer::NginxRenderer;
//! use allowlistd::reloader::NginxReloader;
//! use allowlistd::scheduler::SystemClock;
//! use allowlistd::store::AllowlistStore;
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = Config::load("/etc/allowlistd/config.yaml")?;
//!
//!     let reloader = Arc::new(NginxReloader::from_command(&config.nginx.reload_command));
//!     let renderer = NginxRenderer::new(config.allowlist_path(), Some(reloader))?;
//!     let manager = AllowlistManager::initialize(
//!         ManagerOptions::from_config(&config)?,
//!         AllowlistStore::new(config.store_path()),
//!         Some(renderer),
//!         Arc::new(SystemClock),
//!     )?;
//!
//!     manager.add("alice", "203.0.113.7")?;
//!     assert!(manager.is_member("203.0.113.7"));
//!     Ok(())
//! }
//! ```

pub mod allowlist;
pub mod auth;
pub mod cli;
pub mod cmd_abstraction;
pub mod commands;
pub mod config;
pub mod error;
pub mod reloader;
pub mod renderer;
pub mod scheduler;
pub mod server;
pub mod signal;
pub mod store;
pub mod validation;

pub use error::{AllowlistError, Result};
