//! Shared configuration for the meshgate CLI and server.
//!
//! TOML profiles, credential resolution (env + keyring + plaintext), and
//! translation to `meshgate_core::EngineConfig`. The CLI layers its
//! `GlobalOpts` overrides on top.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use meshgate_core::{
    DnsWebhookConfig, EngineConfig, HeadscaleConfig, TlsVerification, WireGuardConfig,
};

/// Service name for keyring entries.
pub const KEYRING_SERVICE: &str = "meshgate";

/// Environment variable that overrides the config file location.
pub const CONFIG_PATH_ENV: &str = "MESHGATE_CONFIG";

/// Prefix for environment overrides, e.g. `MESHGATE_DEFAULTS__TIMEOUT=5`.
pub const ENV_PREFIX: &str = "MESHGATE_";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("no credentials configured for {service} in profile '{profile}'")]
    NoCredentials { profile: String, service: String },

    #[error("profile '{name}' not found")]
    UnknownProfile { name: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("keyring error: {0}")]
    Keyring(#[from] keyring::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Default profile name.
    pub default_profile: Option<String>,

    /// Global defaults.
    #[serde(default)]
    pub defaults: Defaults,

    /// Management HTTP surface.
    #[serde(default)]
    pub server: ServerSettings,

    /// Named deployment profiles.
    #[serde(default)]
    pub profiles: BTreeMap<String, Profile>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_profile: Some("default".into()),
            defaults: Defaults::default(),
            server: ServerSettings::default(),
            profiles: BTreeMap::new(),
        }
    }
}

impl Config {
    /// Pick the profile named `name`, else the default profile.
    pub fn profile(&self, name: Option<&str>) -> Result<(String, &Profile), ConfigError> {
        let name = name
            .map(str::to_owned)
            .or_else(|| self.default_profile.clone())
            .unwrap_or_else(|| "default".into());
        self.profiles
            .get(&name)
            .map(|p| (name.clone(), p))
            .ok_or(ConfigError::UnknownProfile { name })
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Defaults {
    #[serde(default = "default_output")]
    pub output: String,

    #[serde(default = "default_color")]
    pub color: String,

    #[serde(default)]
    pub insecure: bool,

    /// Seconds allowed for each backend call.
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    /// Seconds between background syncs; 0 disables them.
    #[serde(default = "default_sync_interval")]
    pub sync_interval: u64,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            output: default_output(),
            color: default_color(),
            insecure: false,
            timeout: default_timeout(),
            sync_interval: default_sync_interval(),
        }
    }
}

fn default_output() -> String {
    "table".into()
}
fn default_color() -> String {
    "auto".into()
}
fn default_timeout() -> u64 {
    10
}
fn default_sync_interval() -> u64 {
    60
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerSettings {
    /// Socket address the management API binds to.
    #[serde(default = "default_listen")]
    pub listen: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            listen: default_listen(),
        }
    }
}

fn default_listen() -> String {
    "127.0.0.1:8088".into()
}

/// A named deployment: which backends to talk to and how.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Profile {
    pub headscale: Option<HeadscaleSection>,

    pub wireguard: Option<WireGuardSection>,

    pub dns: Option<DnsSection>,

    /// Whether the cross-network router is up.
    #[serde(default = "default_bridge")]
    pub bridge: bool,

    /// State file (defaults to the platform data directory).
    pub state_file: Option<PathBuf>,

    /// Path to custom CA certificate.
    pub ca_cert: Option<PathBuf>,

    /// Override insecure TLS setting.
    pub insecure: Option<bool>,

    /// Override timeout.
    pub timeout: Option<u64>,

    /// Override background sync interval.
    pub sync_interval: Option<u64>,
}

fn default_bridge() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HeadscaleSection {
    /// Headscale base URL (e.g. "https://hs.example.com").
    pub url: String,

    /// API key (plaintext; prefer keyring or env var).
    pub api_key: Option<String>,

    /// Environment variable name containing the API key.
    pub api_key_env: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WireGuardSection {
    /// Host agent base URL.
    pub url: String,

    pub api_key: Option<String>,

    pub api_key_env: Option<String>,

    /// Tunnel interface the ruleset is scoped to.
    #[serde(default = "default_interface")]
    pub interface: String,
}

fn default_interface() -> String {
    meshgate_core::config::DEFAULT_WG_INTERFACE.into()
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DnsSection {
    /// Webhook receiving rewrite changes.
    pub url: String,

    pub token: Option<String>,

    pub token_env: Option<String>,
}

// ── Paths ───────────────────────────────────────────────────────────

/// Resolve the config file path: `$MESHGATE_CONFIG`, else XDG / platform
/// conventions.
pub fn config_path() -> PathBuf {
    if let Some(path) = std::env::var_os(CONFIG_PATH_ENV) {
        return PathBuf::from(path);
    }
    ProjectDirs::from("dev", "meshgate", "meshgate").map_or_else(
        || dirs_fallback(".config").join("config.toml"),
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

/// Default state file for a profile.
pub fn default_state_path(profile_name: &str) -> PathBuf {
    let file = format!("state-{profile_name}.json");
    ProjectDirs::from("dev", "meshgate", "meshgate").map_or_else(
        || dirs_fallback(".local/share").join(&file),
        |dirs| dirs.data_dir().join(&file),
    )
}

fn dirs_fallback(sub: &str) -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(sub);
    p.push("meshgate");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the full Config from the canonical file + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load the full Config from `path` + environment.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed(ENV_PREFIX).ignore(&["CONFIG"]).split("__"));

    let config: Config = figment.extract()?;
    Ok(config)
}

/// Load config, returning a default if it can't be read.
pub fn load_config_or_default() -> Config {
    load_config().unwrap_or_default()
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write to the canonical config path.
pub fn save_config(cfg: &Config) -> Result<PathBuf, ConfigError> {
    let path = config_path();
    save_config_to(cfg, &path)?;
    Ok(path)
}

pub fn save_config_to(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

// ── Credential resolution ───────────────────────────────────────────

/// Keyring account for one secret of one profile, e.g. `home/headscale`.
pub fn keyring_account(profile_name: &str, service: &str) -> String {
    format!("{profile_name}/{service}")
}

/// Store a secret in the system keyring.
pub fn store_secret(profile_name: &str, service: &str, secret: &str) -> Result<(), ConfigError> {
    let entry = keyring::Entry::new(KEYRING_SERVICE, &keyring_account(profile_name, service))?;
    entry.set_password(secret)?;
    Ok(())
}

/// Resolve a secret from the credential chain: the named env var, then
/// the system keyring, then plaintext config.
pub fn resolve_secret(
    env_name: Option<&str>,
    plaintext: Option<&str>,
    profile_name: &str,
    service: &str,
) -> Option<SecretString> {
    // 1. Env var named by the profile
    if let Some(env_name) = env_name {
        if let Ok(val) = std::env::var(env_name) {
            return Some(SecretString::from(val));
        }
    }

    // 2. System keyring
    if let Ok(entry) = keyring::Entry::new(KEYRING_SERVICE, &keyring_account(profile_name, service))
    {
        if let Ok(secret) = entry.get_password() {
            return Some(SecretString::from(secret));
        }
    }

    // 3. Plaintext in config
    plaintext.map(|p| SecretString::from(p.to_owned()))
}

fn parse_url(field: &str, raw: &str) -> Result<Url, ConfigError> {
    raw.parse().map_err(|e| ConfigError::Validation {
        field: field.into(),
        reason: format!("invalid URL '{raw}': {e}"),
    })
}

// ── Translation ─────────────────────────────────────────────────────

/// Build an `EngineConfig` from a profile, with no CLI overrides.
pub fn profile_to_engine_config(
    profile: &Profile,
    profile_name: &str,
    defaults: &Defaults,
) -> Result<EngineConfig, ConfigError> {
    if profile.headscale.is_none() && profile.wireguard.is_none() {
        return Err(ConfigError::Validation {
            field: "profile".into(),
            reason: format!("'{profile_name}' configures neither headscale nor wireguard"),
        });
    }

    let headscale = profile
        .headscale
        .as_ref()
        .map(|hs| {
            let api_key = resolve_secret(
                hs.api_key_env.as_deref(),
                hs.api_key.as_deref(),
                profile_name,
                "headscale",
            )
            .ok_or_else(|| ConfigError::NoCredentials {
                profile: profile_name.into(),
                service: "headscale".into(),
            })?;
            Ok::<_, ConfigError>(HeadscaleConfig {
                url: parse_url("headscale.url", &hs.url)?,
                api_key,
            })
        })
        .transpose()?;

    let wireguard = profile
        .wireguard
        .as_ref()
        .map(|wg| {
            Ok::<_, ConfigError>(WireGuardConfig {
                url: parse_url("wireguard.url", &wg.url)?,
                api_key: resolve_secret(
                    wg.api_key_env.as_deref(),
                    wg.api_key.as_deref(),
                    profile_name,
                    "wireguard",
                ),
                interface: wg.interface.clone(),
            })
        })
        .transpose()?;

    let dns_webhook = profile
        .dns
        .as_ref()
        .map(|dns| {
            Ok::<_, ConfigError>(DnsWebhookConfig {
                url: parse_url("dns.url", &dns.url)?,
                token: resolve_secret(
                    dns.token_env.as_deref(),
                    dns.token.as_deref(),
                    profile_name,
                    "dns",
                ),
            })
        })
        .transpose()?;

    let tls = if profile.insecure.unwrap_or(defaults.insecure) {
        TlsVerification::DangerAcceptInvalid
    } else if let Some(ref ca_path) = profile.ca_cert {
        TlsVerification::CustomCa(ca_path.clone())
    } else {
        TlsVerification::SystemDefaults
    };

    Ok(EngineConfig {
        headscale,
        wireguard,
        dns_webhook,
        tls,
        timeout: Duration::from_secs(profile.timeout.unwrap_or(defaults.timeout)),
        sync_interval: Duration::from_secs(profile.sync_interval.unwrap_or(defaults.sync_interval)),
        bridge_available: profile.bridge,
        state_path: Some(
            profile
                .state_file
                .clone()
                .unwrap_or_else(|| default_state_path(profile_name)),
        ),
    })
}
