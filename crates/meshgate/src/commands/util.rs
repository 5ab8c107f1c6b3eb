//! Shared helpers for command handlers.

use std::io::IsTerminal;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use meshgate_core::{ClientId, Engine, VpnClient};

use crate::error::CliError;

/// Resolve an operator-supplied identifier (ID, IP, backend ID, or name).
pub fn resolve_client(engine: &Engine, identifier: &str) -> Result<Arc<VpnClient>, CliError> {
    Ok(engine.find_client(identifier)?)
}

/// Display name for a client id, falling back to the id itself.
pub fn client_name(engine: &Engine, id: &ClientId) -> String {
    engine
        .client(id)
        .map_or_else(|_| id.to_string(), |c| c.name.clone())
}

/// Prompt for confirmation, auto-approving if `--yes` was passed.
pub fn confirm(message: &str, yes_flag: bool) -> Result<bool, CliError> {
    if yes_flag {
        return Ok(true);
    }
    if !std::io::stdin().is_terminal() {
        return Err(CliError::NonInteractiveRequiresYes {
            action: message.into(),
        });
    }
    dialoguer::Confirm::new()
        .with_prompt(message)
        .default(false)
        .interact()
        .map_err(|e| CliError::Io(std::io::Error::other(e)))
}

/// `yes`/`no` for detail views.
pub fn yes_no(value: bool) -> &'static str {
    if value { "yes" } else { "no" }
}

/// Coarse age of a timestamp, e.g. `42s ago`, `3m ago`, `2h ago`.
pub fn ago(at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> String {
    let Some(at) = at else {
        return "never".into();
    };
    let secs = (now - at).num_seconds().max(0);
    match secs {
        0..=59 => format!("{secs}s ago"),
        60..=3599 => format!("{}m ago", secs / 60),
        3600..=86_399 => format!("{}h ago", secs / 3600),
        _ => format!("{}d ago", secs / 86_400),
    }
}
