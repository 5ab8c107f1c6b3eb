//! DNS rewrite toggle.

use meshgate_core::Engine;

use crate::cli::{DnsArgs, GlobalOpts, Switch};
use crate::error::CliError;
use crate::output;

use super::util;

pub async fn handle(engine: &Engine, args: DnsArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let found = util::resolve_client(engine, &args.client)?;
    let enabled = matches!(args.state, Switch::On);
    let updated = engine.set_dns(&found.id, enabled).await?;
    let out = output::render_single(
        &global.output,
        &meshgate_core::ClientView::from(updated.as_ref()),
        |c| {
            format!(
                "DNS rewriting {} for {} ({})",
                if c.has_dns { "on" } else { "off" },
                c.name,
                c.ip
            )
        },
        |c| c.has_dns.to_string(),
    );
    output::print_output(&out, global.quiet);
    Ok(())
}
