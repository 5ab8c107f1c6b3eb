//! Push (or preview) enforcement documents.

use meshgate_core::{ApplyStatus, EnforcementDocument, Engine};

use crate::cli::{ApplyArgs, GlobalOpts};
use crate::error::CliError;
use crate::output;

pub(super) fn status_lines(s: &ApplyStatus, color: bool) -> Vec<String> {
    let mut lines = vec![
        format!(
            "In sync:     {}",
            output::flag(super::util::yes_no(s.in_sync), s.in_sync, color)
        ),
        format!(
            "Pending:     {}",
            output::flag(
                super::util::yes_no(s.pending_changes),
                !s.pending_changes,
                color
            )
        ),
        format!(
            "Applied at:  {}",
            s.last_applied_at.map_or_else(
                || "never".into(),
                |t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string()
            )
        ),
    ];
    if let Some(err) = &s.last_error {
        lines.push(format!("Last error:  {}", output::alert(err, color)));
    }
    lines
}

fn documents(docs: &[EnforcementDocument]) -> String {
    docs.iter()
        .map(|d| {
            format!(
                "── {} ({}, {} edges) ──\n{}",
                d.backend,
                d.format,
                d.edges,
                d.body.trim_end()
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Apply with a spinner and print the resulting status.
pub(super) async fn push(engine: &Engine, global: &GlobalOpts) -> Result<(), CliError> {
    let pb = output::spinner("Pushing rules to enforcement", global);
    let result = engine.apply().await;
    pb.finish_and_clear();
    let status = result?;

    let color = output::should_color(&global.color);
    let out = output::render_single(
        &global.output,
        &status,
        |s| status_lines(s, color).join("\n"),
        |s| s.in_sync.to_string(),
    );
    output::print_output(&out, global.quiet);
    Ok(())
}

pub async fn handle(engine: &Engine, args: &ApplyArgs, global: &GlobalOpts) -> Result<(), CliError> {
    if args.dry_run {
        let docs = engine.preview();
        let out = output::render_single(&global.output, &docs, |d| documents(d), |d| {
            d.iter()
                .map(|doc| doc.backend.to_string())
                .collect::<Vec<_>>()
                .join("\n")
        });
        output::print_output(&out, global.quiet);
        return Ok(());
    }
    push(engine, global).await
}
