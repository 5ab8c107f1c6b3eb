//! Engine status.

use chrono::Utc;
use meshgate_core::{Engine, EngineStatus};

use crate::cli::GlobalOpts;
use crate::error::CliError;
use crate::output;

fn detail(s: &EngineStatus, color: bool) -> String {
    let backends = s
        .backends
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ");
    let mut lines = vec![
        format!("Clients:     {}", s.clients),
        format!("Backends:    {backends}"),
        format!(
            "Bridge:      {}",
            output::flag(
                if s.capabilities.bridge_available { "up" } else { "down" },
                s.capabilities.bridge_available,
                color
            )
        ),
        format!(
            "Sync:        {}",
            output::flag(
                if s.sync.stale { "stale" } else { "fresh" },
                !s.sync.stale,
                color
            )
        ),
        format!(
            "Last sync:   {}",
            super::util::ago(s.sync.last_synced_at, Utc::now())
        ),
    ];
    if let Some(err) = &s.sync.last_error {
        lines.push(format!("Sync error:  {}", output::alert(err, color)));
    }
    lines.extend(super::apply::status_lines(&s.apply, color));
    lines.join("\n")
}

pub fn handle(engine: &Engine, global: &GlobalOpts) -> Result<(), CliError> {
    let status = engine.status();
    let color = output::should_color(&global.color);
    let out = output::render_single(
        &global.output,
        &status,
        |s| detail(s, color),
        |s| s.apply.in_sync.to_string(),
    );
    output::print_output(&out, global.quiet);
    Ok(())
}
