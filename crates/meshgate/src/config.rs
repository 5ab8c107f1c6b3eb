//! CLI configuration: a thin wrapper around `meshgate_config` shared types.
//!
//! Adds resolution that respects `GlobalOpts` flag overrides (--config,
//! --profile, --insecure, --timeout).

use std::path::PathBuf;
use std::time::Duration;

use meshgate_core::{EngineConfig, TlsVerification};

use crate::cli::GlobalOpts;
use crate::error::CliError;

// ── Re-exports from shared crate ────────────────────────────────────

pub use meshgate_config::{Config, Profile, save_config_to};

// ── CLI-specific helpers ────────────────────────────────────────────

/// Config file in effect: `--config`, else the platform default.
pub fn config_path(global: &GlobalOpts) -> PathBuf {
    global.config.clone().unwrap_or_else(meshgate_config::config_path)
}

/// Load config, returning a default if the file can't be read.
pub fn load_config_or_default(global: &GlobalOpts) -> Config {
    meshgate_config::load_config_from(&config_path(global)).unwrap_or_default()
}

/// Resolve the active profile name from CLI flags and config.
pub fn active_profile_name(global: &GlobalOpts, config: &Config) -> String {
    global
        .profile
        .clone()
        .or_else(|| config.default_profile.clone())
        .unwrap_or_else(|| "default".into())
}

/// Build the `EngineConfig` for this invocation: profile values first,
/// then CLI flag overrides.
pub fn build_engine_config(global: &GlobalOpts) -> Result<(Config, EngineConfig), CliError> {
    let path = config_path(global);
    let cfg = meshgate_config::load_config_from(&path)?;
    let profile_name = active_profile_name(global, &cfg);

    let Some(profile) = cfg.profiles.get(&profile_name) else {
        if cfg.profiles.is_empty() {
            return Err(CliError::NoConfig {
                path: path.display().to_string(),
            });
        }
        return Err(CliError::ProfileNotFound {
            name: profile_name,
            available: cfg.profiles.keys().cloned().collect::<Vec<_>>().join(", "),
        });
    };

    let mut engine = meshgate_config::profile_to_engine_config(profile, &profile_name, &cfg.defaults)?;
    apply_overrides(&mut engine, global);
    Ok((cfg, engine))
}

fn apply_overrides(engine: &mut EngineConfig, global: &GlobalOpts) {
    if global.insecure {
        engine.tls = TlsVerification::DangerAcceptInvalid;
    }
    if let Some(secs) = global.timeout {
        engine.timeout = Duration::from_secs(secs);
    }
}
