//! Configuration management for allowlistd.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use std::env;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use tracing::{info, warn, Level};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::validation::{validate_ip_or_cidr, validate_time_of_day};

/// File name looked up in every search directory.
pub const CONFIG_FILE_NAME: &str = "config.yaml";

/// Secure string type that zeroizes memory on drop
/// Used for the cleartext password before it is hashed
#[derive(Clone, Default, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(transparent)]
pub struct SecureString(String);

impl SecureString {
    pub fn new(s: String) -> Self {
        Self(s)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Debug for SecureString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("[REDACTED]")
    }
}

impl From<&str> for SecureString {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,

    pub store: StoreConfig,

    pub nginx: NginxConfig,

    /// Baseline subnets, always present after a revert
    pub allowed_subnets: Vec<String>,

    /// Revert to the baseline once a day
    pub revert_daily: bool,

    /// Local time of the daily revert (HH:MM)
    pub revert_time: String,

    /// Where the login page redirects after success
    pub redirect_url: String,

    pub auth: AuthConfig,

    pub logging: LoggingConfig,

    /// File this configuration was loaded from
    #[serde(skip)]
    pub path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            store: StoreConfig::default(),
            nginx: NginxConfig::default(),
            allowed_subnets: Vec::new(),
            revert_daily: true,
            revert_time: "04:00".to_string(),
            redirect_url: String::new(),
            auth: AuthConfig::default(),
            logging: LoggingConfig::default(),
            path: PathBuf::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_address: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:5000".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: "allowlist.csv".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NginxConfig {
    /// Write the artifact and reload nginx
    pub enabled: bool,
    pub allowlist_path: String,
    /// Reload argv; empty selects `systemctl reload nginx`
    pub reload_command: Vec<String>,
}

impl Default for NginxConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            allowlist_path: "ipallowlist.conf".to_string(),
            reload_command: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AuthType {
    /// Single shared password, stored as an argon2 hash
    #[default]
    Static,
    /// Delegate to a Jellyfin server
    Jellyfin,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AuthConfig {
    #[serde(rename = "type")]
    pub kind: AuthType,
    #[serde(rename = "static")]
    pub static_auth: StaticAuthConfig,
    pub remote: RemoteAuthConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct StaticAuthConfig {
    /// Hashed and blanked on load
    /// Memory is securely zeroed when dropped
    pub password_cleartext: SecureString,
    pub password_hashed: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct RemoteAuthConfig {
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// Extra log file; empty logs to stderr only
    pub path: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "INFO".to_string(),
            path: String::new(),
        }
    }
}

impl LoggingConfig {
    pub fn tracing_level(&self) -> Result<Level> {
        match self.level.to_ascii_uppercase().as_str() {
            "TRACE" => Ok(Level::TRACE),
            "DEBUG" => Ok(Level::DEBUG),
            "INFO" => Ok(Level::INFO),
            "WARN" | "WARNING" => Ok(Level::WARN),
            "ERROR" | "CRITICAL" => Ok(Level::ERROR),
            _ => anyhow::bail!(
                "Invalid logging.level '{}'. Valid values: DEBUG, INFO, WARNING, ERROR",
                self.level
            ),
        }
    }
}

impl Config {
    /// Candidate config files, in priority order.
    pub fn search_paths(instance_dir: &Path) -> Vec<PathBuf> {
        let mut paths = vec![instance_dir.join(CONFIG_FILE_NAME)];
        if let Some(home) = env::var_os("HOME") {
            paths.push(
                PathBuf::from(home)
                    .join(".config/allowlistd")
                    .join(CONFIG_FILE_NAME),
            );
        }
        paths.push(PathBuf::from("/etc/allowlistd").join(CONFIG_FILE_NAME));
        paths
    }

    /// Load from an explicit path, or search `instance_dir` and the usual
    /// locations. A default file is created when nothing is found.
    pub fn load_or_create(explicit: Option<&Path>, instance_dir: &Path) -> Result<Self> {
        match explicit {
            Some(path) => Self::load(path),
            None => Self::load_from_candidates(&Self::search_paths(instance_dir)),
        }
    }

    /// Load the first existing file among `candidates`, creating the first
    /// candidate from the default template if none exists.
    pub fn load_from_candidates(candidates: &[PathBuf]) -> Result<Self> {
        let mut found: Option<&PathBuf> = None;
        for path in candidates {
            if path.is_file() {
                info!("Found config at path: {}", path.display());
                if found.is_none() {
                    info!("Using this path as it's the first one that was found");
                    found = Some(path);
                }
            } else {
                info!("No config file found at: {}", path.display());
            }
        }

        let path = match found {
            Some(path) => path.clone(),
            None => {
                let path = candidates
                    .first()
                    .context("No configuration search path available")?;
                warn!(
                    "No configuration file found, creating at default location: {}",
                    path.display()
                );
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    fs::create_dir_all(parent)
                        .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
                }
                fs::write(path, Self::generate_default_yaml())
                    .with_context(|| format!("Failed to write default config: {:?}", path))?;
                path.clone()
            }
        };

        Self::load(path)
    }

    /// Load configuration from YAML file
    ///
    /// A cleartext static password is hashed and the file rewritten without it.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let raw: Value = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;
        let raw = if raw.is_null() {
            Value::Mapping(Default::default())
        } else {
            raw
        };

        for key in unknown_keys(&raw) {
            warn!("Config entry key {} not in schema", key);
        }

        let mut config: Config = serde_yaml::from_value(raw)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;
        config.path = path.to_path_buf();

        config.validate()?;

        if config.hash_cleartext_password()? {
            config.save(path)?;
        }

        info!("Configuration loaded successfully!");
        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        self.bind_address()?;

        if self.store.path.trim().is_empty() {
            anyhow::bail!("store.path cannot be empty");
        }

        if self.nginx.enabled && self.nginx.allowlist_path.trim().is_empty() {
            anyhow::bail!("nginx.allowlist_path cannot be empty while nginx is enabled");
        }

        for subnet in &self.allowed_subnets {
            validate_ip_or_cidr(subnet)
                .with_context(|| format!("Invalid entry in allowed_subnets: '{}'", subnet))?;
        }

        validate_time_of_day(&self.revert_time).context("Invalid revert_time")?;

        self.logging.tracing_level()?;

        match self.auth.kind {
            AuthType::Static => {
                let static_auth = &self.auth.static_auth;
                if static_auth.password_cleartext.is_empty() && static_auth.password_hashed.is_empty()
                {
                    anyhow::bail!("Please set password in: {}", self.path.display());
                }
            }
            AuthType::Jellyfin => {
                if !self.auth.remote.url.contains("http") {
                    anyhow::bail!("Please set the auth url, including http(s)://");
                }
            }
        }

        Ok(())
    }

    /// Replace a cleartext static password with its hash.
    ///
    /// Returns whether the configuration changed and should be saved.
    pub fn hash_cleartext_password(&mut self) -> Result<bool> {
        if self.auth.kind != AuthType::Static || self.auth.static_auth.password_cleartext.is_empty()
        {
            return Ok(false);
        }

        info!("Plaintext password set, hashing and removing from config file");
        let hashed = crate::auth::hash_password(self.auth.static_auth.password_cleartext.as_str())?;
        self.auth.static_auth.password_hashed = hashed;
        self.auth.static_auth.password_cleartext = SecureString::default();
        Ok(true)
    }

    /// Save configuration to YAML file atomically
    ///
    /// Uses tempfile + rename pattern to prevent corruption on crash.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        use std::io::Write;
        use tempfile::NamedTempFile;

        let path = path.as_ref();
        let content = serde_yaml::to_string(self).with_context(|| "Failed to serialize config")?;

        let parent_dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        let mut temp_file = NamedTempFile::new_in(parent_dir)
            .context("Failed to create temporary file for config")?;

        temp_file.write_all(content.as_bytes())?;
        temp_file.as_file().sync_all()?;

        temp_file
            .persist(path)
            .with_context(|| format!("Failed to persist config file: {:?}", path))?;

        Ok(())
    }

    pub fn bind_address(&self) -> Result<SocketAddr> {
        self.server.bind_address.parse().with_context(|| {
            format!(
                "Invalid server.bind_address '{}'. Use format like '127.0.0.1:5000'",
                self.server.bind_address
            )
        })
    }

    /// Directory relative paths are resolved against.
    pub fn base_dir(&self) -> &Path {
        match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        }
    }

    pub fn store_path(&self) -> PathBuf {
        self.resolve(&self.store.path)
    }

    pub fn allowlist_path(&self) -> PathBuf {
        self.resolve(&self.nginx.allowlist_path)
    }

    /// Optional extra log file.
    pub fn log_path(&self) -> Option<PathBuf> {
        (!self.logging.path.is_empty()).then(|| self.resolve(&self.logging.path))
    }

    fn resolve(&self, value: &str) -> PathBuf {
        let path = Path::new(value);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir().join(path)
        }
    }

    /// Generate default config with comments
    pub fn generate_default_yaml() -> String {
        include_str!("../templates/config.yaml").to_string()
    }
}

/// Keys present in `loaded` that the schema does not know, as `[a][b]` paths.
fn unknown_keys(loaded: &Value) -> Vec<String> {
    let schema = match serde_yaml::to_value(Config::default()) {
        Ok(schema) => schema,
        Err(_) => return Vec::new(),
    };
    let mut found = Vec::new();
    collect_unknown(&schema, loaded, "<root>", &mut found);
    found
}

fn collect_unknown(schema: &Value, loaded: &Value, parent: &str, found: &mut Vec<String>) {
    let (Value::Mapping(schema), Value::Mapping(loaded)) = (schema, loaded) else {
        return;
    };
    for (key, value) in loaded {
        let name = key.as_str().map(str::to_string).unwrap_or_else(|| format!("{:?}", key));
        match schema.get(key) {
            Some(schema_value) => {
                let nested = if parent == "<root>" {
                    format!("[{}]", name)
                } else {
                    format!("{}[{}]", parent, name)
                };
                collect_unknown(schema_value, value, &nested, found);
            }
            None => found.push(format!("{}[{}]", parent, name)),
        }
    }
}
