//! Serve command implementation.

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

use crate::auth;
use crate::config::Config;
use crate::server::{self, AppState};
use crate::signal::{listen_for_signals, ShutdownToken};

/// Run the serve command
pub async fn run(config: Arc<Config>) -> Result<()> {
    let bind_address = config.bind_address()?;
    let auth: Arc<dyn auth::AuthBackend> = Arc::from(auth::from_config(&config)?);

    let manager = {
        let config = Arc::clone(&config);
        tokio::task::spawn_blocking(move || super::open_manager(&config, true))
            .await
            .context("Allowlist startup task failed")??
    };
    info!(
        entries = manager.entries().len(),
        baseline = manager.baseline().len(),
        "Allowlist ready"
    );

    let listener = TcpListener::bind(bind_address)
        .await
        .with_context(|| format!("Failed to bind {}", bind_address))?;

    let token = ShutdownToken::new();
    let signals = listen_for_signals(token.clone());

    let state = AppState {
        manager: Arc::clone(&manager),
        auth,
    };
    let result = server::serve(listener, state, token.clone()).await;

    token.cancel();
    signals.abort();
    tokio::task::spawn_blocking(move || manager.shutdown())
        .await
        .context("Scheduler shutdown task failed")?;

    result
}
