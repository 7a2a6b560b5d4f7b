//! HTTP surface.
//!
//! - `POST /authenticate`: form `username` + `password`, answers `yep` (200)
//!   or `nope` (403) and allows the caller's IP on success
//! - `GET /check_auth`: `yep` (200) when the caller's IP is allowed, else
//!   `nope` (403)
//!
//! Both routes also answer with a trailing slash. Clients only ever see the
//! two bodies; every detail goes to the logs.

use anyhow::{Context, Result};
use axum::{
    extract::{ConnectInfo, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Form, Router,
};
use serde::Deserialize;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, error, info};

use crate::allowlist::AllowlistManager;
use crate::auth::AuthBackend;
use crate::signal::ShutdownToken;

/// Username stored for a successful login that did not name a user.
pub const ANONYMOUS_USER: &str = "static";

#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<AllowlistManager>,
    pub auth: Arc<dyn AuthBackend>,
}

#[derive(Debug, Deserialize)]
pub struct AuthForm {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

type Reply = (StatusCode, &'static str);

fn reply(accepted: bool) -> Reply {
    if accepted {
        (StatusCode::OK, "yep")
    } else {
        (StatusCode::FORBIDDEN, "nope")
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/authenticate", post(authenticate))
        .route("/authenticate/", post(authenticate))
        .route("/check_auth", get(check_auth))
        .route("/check_auth/", get(check_auth))
        .with_state(state)
}

/// The caller's address: the first `X-Forwarded-For` element when the
/// header is present, else the TCP peer.
///
/// IPv4-mapped IPv6 addresses (`::ffff:a.b.c.d`, as seen on a dual-stack
/// listener) are reported as plain IPv4. Text that is not an address is
/// returned unchanged.
pub fn client_ip(headers: &HeaderMap, peer: SocketAddr) -> String {
    let raw = match headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        Some(forwarded) => forwarded.split(',').next().unwrap_or_default().trim().to_string(),
        None => return peer.ip().to_canonical().to_string(),
    };
    match raw.parse::<IpAddr>() {
        Ok(ip) => ip.to_canonical().to_string(),
        Err(_) => raw,
    }
}

async fn authenticate(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Form(form): Form<AuthForm>,
) -> Reply {
    let accepted = state.auth.verify(&form.username, &form.password).await;
    let ip = client_ip(&headers, peer);
    let (status, body) = reply(accepted);

    let username_text = if form.username.is_empty() {
        String::new()
    } else {
        format!(", Username: {}", form.username)
    };
    info!("Authentication returned: {} for {}{}", body, ip, username_text);

    if accepted {
        let username = if form.username.is_empty() {
            ANONYMOUS_USER.to_string()
        } else {
            form.username
        };
        let manager = Arc::clone(&state.manager);
        let target = ip.clone();
        match tokio::task::spawn_blocking(move || manager.add(&username, &target)).await {
            Ok(Ok(added)) => debug!(ip = %ip, added, "Allowlist updated"),
            Ok(Err(e)) => error!(ip = %ip, error = %e, "Failed to record address in the allowlist"),
            Err(e) => error!(ip = %ip, "Allowlist task failed: {}", e),
        }
    }

    (status, body)
}

async fn check_auth(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> Reply {
    let ip = client_ip(&headers, peer);
    let manager = Arc::clone(&state.manager);
    let member = {
        let ip = ip.clone();
        tokio::task::spawn_blocking(move || manager.is_member(&ip))
            .await
            .unwrap_or_else(|e| {
                error!("Membership task failed: {}", e);
                false
            })
    };
    debug!(ip = %ip, member, "Checked allowlist membership");
    reply(member)
}

/// Serve until `token` is cancelled.
pub async fn serve(listener: TcpListener, state: AppState, token: ShutdownToken) -> Result<()> {
    let addr = listener.local_addr().context("Failed to read listener address")?;
    info!(auth = state.auth.name(), "Listening on http://{}", addr);

    let app = router(state).into_make_service_with_connect_info::<SocketAddr>();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { token.cancelled().await })
        .await
        .context("HTTP server failed")?;

    info!("HTTP server stopped");
    Ok(())
}
