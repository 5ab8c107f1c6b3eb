//! Config subcommand handlers.

use dialoguer::{Confirm, Input, Password, Select};

use crate::cli::{ConfigArgs, ConfigCommand, GlobalOpts, SecretKind};
use crate::config::{self, Config, Profile};
use crate::error::CliError;
use crate::output;

use meshgate_config::{DnsSection, HeadscaleSection, WireGuardSection};

// ── Helpers ─────────────────────────────────────────────────────────

/// Map a dialoguer / interactive I/O failure into CliError.
fn prompt_err(e: impl std::fmt::Display) -> CliError {
    CliError::Validation {
        field: "interactive".into(),
        reason: format!("prompt failed: {e}"),
    }
}

fn profile_not_found(cfg: &Config, name: String) -> CliError {
    let available: Vec<_> = cfg.profiles.keys().cloned().collect();
    CliError::ProfileNotFound {
        name,
        available: if available.is_empty() {
            "(none)".into()
        } else {
            available.join(", ")
        },
    }
}

/// Prompt for a secret and decide where it lives. Returns the plaintext
/// to write into the profile, or `None` when it went to the keyring.
fn capture_secret(
    profile_name: &str,
    kind: SecretKind,
    label: &str,
) -> Result<Option<String>, CliError> {
    let secret = Password::new()
        .with_prompt(label)
        .allow_empty_password(true)
        .interact()
        .map_err(prompt_err)?;
    if secret.is_empty() {
        return Ok(None);
    }

    let store_choices = &[
        "Store in system keyring (recommended)",
        "Save to config file (plaintext)",
    ];
    let selection = Select::new()
        .with_prompt("Where to store it?")
        .items(store_choices)
        .default(0)
        .interact()
        .map_err(prompt_err)?;

    if selection == 0 {
        meshgate_config::store_secret(profile_name, kind.service(), &secret)?;
        eprintln!("   ✓ Stored in system keyring");
        Ok(None)
    } else {
        Ok(Some(secret))
    }
}

/// Config with plaintext secrets masked, for display.
fn redacted(cfg: &Config) -> Config {
    const MASK: &str = "********";
    let mut cfg = cfg.clone();
    for profile in cfg.profiles.values_mut() {
        if let Some(hs) = profile.headscale.as_mut() {
            hs.api_key = hs.api_key.as_ref().map(|_| MASK.into());
        }
        if let Some(wg) = profile.wireguard.as_mut() {
            wg.api_key = wg.api_key.as_ref().map(|_| MASK.into());
        }
        if let Some(dns) = profile.dns.as_mut() {
            dns.token = dns.token.as_ref().map(|_| MASK.into());
        }
    }
    cfg
}

fn input(prompt: &str, default: &str) -> Result<String, CliError> {
    Input::new()
        .with_prompt(prompt)
        .default(default.to_owned())
        .interact_text()
        .map_err(prompt_err)
}

// ── Handler ─────────────────────────────────────────────────────────

pub fn handle(args: ConfigArgs, global: &GlobalOpts) -> Result<(), CliError> {
    match args.command {
        // ── Init: interactive wizard ────────────────────────────────
        ConfigCommand::Init => {
            let config_path = config::config_path(global);
            eprintln!("meshgate configuration wizard");
            eprintln!("   Config path: {}\n", config_path.display());

            let mut cfg = config::load_config_or_default(global);
            let profile_name = input("Profile name", "default")?;
            let mut profile = Profile {
                bridge: true,
                ..Profile::default()
            };

            if Confirm::new()
                .with_prompt("Manage a Headscale server?")
                .default(true)
                .interact()
                .map_err(prompt_err)?
            {
                let url = input("Headscale URL", "https://headscale.example.com")?;
                let api_key = capture_secret(&profile_name, SecretKind::Headscale, "Headscale API key")?;
                profile.headscale = Some(HeadscaleSection {
                    url,
                    api_key,
                    api_key_env: None,
                });
            }

            if Confirm::new()
                .with_prompt("Manage a WireGuard host?")
                .default(true)
                .interact()
                .map_err(prompt_err)?
            {
                let url = input("WireGuard agent URL", "http://127.0.0.1:51821")?;
                let api_key = capture_secret(
                    &profile_name,
                    SecretKind::Wireguard,
                    "Agent API key (empty for none)",
                )?;
                let interface = input("Tunnel interface", "wg0")?;
                profile.wireguard = Some(WireGuardSection {
                    url,
                    api_key,
                    api_key_env: None,
                    interface,
                });
            }

            if profile.headscale.is_none() && profile.wireguard.is_none() {
                return Err(CliError::Validation {
                    field: "profile".into(),
                    reason: "at least one backend is required".into(),
                });
            }

            if Confirm::new()
                .with_prompt("Forward DNS rewrite toggles to a webhook?")
                .default(false)
                .interact()
                .map_err(prompt_err)?
            {
                let url = input("Webhook URL", "http://127.0.0.1:8053/rewrite")?;
                let token = capture_secret(&profile_name, SecretKind::Dns, "Webhook token (empty for none)")?;
                profile.dns = Some(DnsSection {
                    url,
                    token,
                    token_env: None,
                });
            }

            if profile.headscale.is_some() && profile.wireguard.is_some() {
                profile.bridge = Confirm::new()
                    .with_prompt("Is the router between both networks running?")
                    .default(true)
                    .interact()
                    .map_err(prompt_err)?;
            }

            cfg.profiles.insert(profile_name.clone(), profile);
            cfg.default_profile = Some(profile_name.clone());
            config::save_config_to(&cfg, &config_path)?;

            eprintln!("\n✓ Configuration written to {}", config_path.display());
            eprintln!("  Active profile: {profile_name}");
            eprintln!("\n  Test it: meshgate clients list");
            Ok(())
        }

        // ── Show ────────────────────────────────────────────────────
        ConfigCommand::Show => {
            let cfg = redacted(&config::load_config_or_default(global));
            let out = output::render_single(
                &global.output,
                &cfg,
                |c| toml::to_string_pretty(c).unwrap_or_else(|e| format!("# {e}")),
                |_| "config".into(),
            );
            output::print_output(&out, global.quiet);
            Ok(())
        }

        ConfigCommand::Path => {
            output::print_output(&config::config_path(global).display().to_string(), false);
            Ok(())
        }

        // ── Profiles ────────────────────────────────────────────────
        ConfigCommand::Profiles => {
            let cfg = config::load_config_or_default(global);
            let default = cfg.default_profile.as_deref().unwrap_or("default");
            if cfg.profiles.is_empty() {
                eprintln!("No profiles configured. Run: meshgate config init");
            } else {
                for name in cfg.profiles.keys() {
                    let marker = if name == default { " *" } else { "" };
                    println!("{name}{marker}");
                }
            }
            Ok(())
        }

        // ── Use <name> ─────────────────────────────────────────────
        ConfigCommand::Use { name } => {
            let mut cfg = config::load_config_or_default(global);
            if !cfg.profiles.contains_key(&name) {
                return Err(profile_not_found(&cfg, name));
            }
            cfg.default_profile = Some(name.clone());
            config::save_config_to(&cfg, &config::config_path(global))?;
            eprintln!("✓ Default profile set to '{name}'");
            Ok(())
        }

        // ── SetSecret ───────────────────────────────────────────────
        ConfigCommand::SetSecret { service } => {
            let cfg = config::load_config_or_default(global);
            let profile_name = config::active_profile_name(global, &cfg);
            if !cfg.profiles.contains_key(&profile_name) {
                return Err(profile_not_found(&cfg, profile_name));
            }

            let secret = Password::new()
                .with_prompt(format!("{} secret", service.service()))
                .interact()
                .map_err(prompt_err)?;
            if secret.is_empty() {
                return Err(CliError::Validation {
                    field: "secret".into(),
                    reason: "value cannot be empty".into(),
                });
            }

            meshgate_config::store_secret(&profile_name, service.service(), &secret)?;
            eprintln!(
                "✓ {} secret stored in system keyring for profile '{profile_name}'",
                service.service()
            );
            Ok(())
        }
    }
}
