//! Report of the sync every engine command starts with.

use meshgate_core::{Engine, SyncReport};

use crate::cli::GlobalOpts;
use crate::error::CliError;
use crate::output;

fn detail(r: &SyncReport) -> String {
    let mut lines = vec![
        format!("Observed:    {}", r.observed),
        format!("Added:       {}", r.added.len()),
        format!("Updated:     {}", r.updated),
        format!("Readdressed: {}", r.readdressed.len()),
        format!("Migrated:    {}", r.migrated.len()),
        format!("Absent:      {}", r.absent.len()),
        format!("No address:  {}", r.unaddressed.len()),
        format!("Removed:     {}", r.removed.len()),
    ];
    for conflict in &r.conflicts {
        lines.push(format!("Skipped:     {conflict}"));
    }
    lines.join("\n")
}

pub fn handle(engine: &Engine, global: &GlobalOpts) -> Result<(), CliError> {
    let report = engine
        .last_sync_report()
        .ok_or_else(|| CliError::Internal("no sync has completed".into()))?;
    let out = output::render_single(&global.output, &report, detail, |r| r.observed.to_string());
    output::print_output(&out, global.quiet);
    if !global.quiet && report.membership_changed() {
        eprintln!("Membership changed. Run `meshgate apply` to enforce it.");
    }
    Ok(())
}
