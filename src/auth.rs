//! Authentication backends.
//!
//! A backend is chosen once from the configuration: a static argon2 password
//! or a delegated check against a remote media server. Every failure mode
//! resolves to a plain reject.

use anyhow::{anyhow, Context, Result};
use argon2::password_hash::{rand_core::OsRng, SaltString};
use argon2::{Argon2, Params, PasswordHash, PasswordHasher, PasswordVerifier};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::{Map, Value};
use std::time::Duration;
use tracing::{debug, error, warn};

use crate::config::{AuthType, Config};

/// Hard limit for one remote authentication round trip.
pub const REMOTE_AUTH_TIMEOUT: Duration = Duration::from_secs(5);

/// Decides whether a set of credentials is accepted.
#[async_trait]
pub trait AuthBackend: Send + Sync {
    /// Check credentials. Never fails: any problem is a reject.
    async fn verify(&self, username: &str, password: &str) -> bool;

    /// Short backend name for logs.
    fn name(&self) -> &'static str;
}

/// Select the backend configured in `config`.
pub fn from_config(config: &Config) -> Result<Box<dyn AuthBackend>> {
    match config.auth.kind {
        AuthType::Static => Ok(Box::new(StaticPasswordAuth::new(
            config.auth.static_auth.password_hashed.clone(),
        ))),
        kind => Ok(Box::new(RemoteAuth::new(&config.auth.remote.url, kind)?)),
    }
}

/// Hash `password` with argon2id and a random salt, as a PHC string.
pub fn hash_password(password: &str) -> Result<String> {
    hash_with(Argon2::default(), password)
}

/// Like [`hash_password`] with explicit cost parameters.
pub fn hash_password_with(password: &str, params: Params) -> Result<String> {
    hash_with(
        Argon2::new(argon2::Algorithm::Argon2id, argon2::Version::V0x13, params),
        password,
    )
}

fn hash_with(argon: Argon2<'_>, password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = argon
        .hash_password(password.as_bytes(), &salt)
        .map_err(|err| anyhow!("Failed to hash password: {err}"))?;
    Ok(hash.to_string())
}

/// Check `candidate` against a PHC hash. A malformed hash is a mismatch.
pub fn verify_password(expected_hash: &str, candidate: &str) -> bool {
    match PasswordHash::new(expected_hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(candidate.as_bytes(), &parsed)
            .is_ok(),
        Err(err) => {
            error!("Configured password hash is not a valid argon2 hash: {}", err);
            // Spend a comparable amount of work so a bad hash is not observable
            let _ = hash_password(candidate);
            false
        }
    }
}

/// Single shared password.
pub struct StaticPasswordAuth {
    password_hashed: String,
}

impl StaticPasswordAuth {
    pub fn new(password_hashed: String) -> Self {
        Self { password_hashed }
    }
}

#[async_trait]
impl AuthBackend for StaticPasswordAuth {
    async fn verify(&self, _username: &str, password: &str) -> bool {
        let hash = self.password_hashed.clone();
        let candidate = password.to_string();
        match tokio::task::spawn_blocking(move || verify_password(&hash, &candidate)).await {
            Ok(accepted) => accepted,
            Err(e) => {
                error!("Password verification task failed: {}", e);
                false
            }
        }
    }

    fn name(&self) -> &'static str {
        "static"
    }
}

/// Request layout of a remote authentication API.
#[derive(Debug)]
pub struct RemoteProfile {
    pub endpoint: &'static str,
    pub username_field: &'static str,
    pub password_field: &'static str,
    pub headers: &'static [(&'static str, &'static str)],
}

pub const JELLYFIN: RemoteProfile = RemoteProfile {
    endpoint: "Users/authenticatebyname",
    username_field: "Username",
    password_field: "Pw",
    headers: &[
        (
            "Authorization",
            "MediaBrowser Client=\"Allowlist App\", Device=\"allowlistd\", DeviceId=\"allowlistd\", Version=\"0.0\", Token=\"allowlistd\"",
        ),
        ("Content-Type", "application/json"),
    ],
};

impl RemoteProfile {
    pub fn for_type(kind: AuthType) -> Option<&'static RemoteProfile> {
        match kind {
            AuthType::Jellyfin => Some(&JELLYFIN),
            AuthType::Static => None,
        }
    }
}

/// Delegates the credential check to a remote server: HTTP 200 accepts.
pub struct RemoteAuth {
    client: Client,
    url: String,
    profile: &'static RemoteProfile,
}

impl RemoteAuth {
    pub fn new(base_url: &str, kind: AuthType) -> Result<Self> {
        let profile = RemoteProfile::for_type(kind)
            .ok_or_else(|| anyhow!("Auth type {:?} is not a remote auth type", kind))?;
        Self::with_timeout(base_url, profile, REMOTE_AUTH_TIMEOUT)
    }

    pub fn with_timeout(
        base_url: &str,
        profile: &'static RemoteProfile,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(format!("allowlistd/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self {
            client,
            url: format!("{}/{}", base_url.trim_end_matches('/'), profile.endpoint),
            profile,
        })
    }

    /// Full endpoint url credentials are posted to.
    pub fn url(&self) -> &str {
        &self.url
    }

    fn body(&self, username: &str, password: &str) -> Value {
        let mut body = Map::new();
        body.insert(self.profile.username_field.to_string(), Value::from(username));
        body.insert(self.profile.password_field.to_string(), Value::from(password));
        Value::Object(body)
    }
}

#[async_trait]
impl AuthBackend for RemoteAuth {
    async fn verify(&self, username: &str, password: &str) -> bool {
        let mut request = self.client.post(&self.url);
        for (name, value) in self.profile.headers {
            request = request.header(*name, *value);
        }

        match request.json(&self.body(username, password)).send().await {
            Ok(response) if response.status() == StatusCode::OK => {
                debug!("Remote authentication accepted by {}", self.url);
                true
            }
            Ok(response) => {
                warn!(status = %response.status(), "Remote authentication rejected by {}", self.url);
                false
            }
            Err(e) if e.is_connect() => {
                error!("Connection error for url: {}", self.url);
                false
            }
            Err(e) if e.is_timeout() => {
                error!("Timeout exception for url: {}", self.url);
                false
            }
            Err(e) => {
                error!(error = %e, "Uncaught exception for url: {}", self.url);
                false
            }
        }
    }

    fn name(&self) -> &'static str {
        "jellyfin"
    }
}
