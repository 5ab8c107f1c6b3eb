//! Effective reachability around one client.

use meshgate_core::{Engine, ReachView};
use tabled::Tabled;

use crate::cli::GlobalOpts;
use crate::error::CliError;
use crate::output;

use super::util;

#[derive(Tabled)]
struct PeerRow {
    #[tabled(rename = "Direction")]
    direction: &'static str,
    #[tabled(rename = "Client")]
    id: String,
    #[tabled(rename = "Name")]
    name: String,
}

pub fn handle(engine: &Engine, client: &str, global: &GlobalOpts) -> Result<(), CliError> {
    let found = util::resolve_client(engine, client)?;
    let view = engine.reach(&found.id)?;

    let table = |v: &ReachView| {
        let outbound = v.can_reach.iter().map(|id| PeerRow {
            direction: "can reach",
            id: id.to_string(),
            name: util::client_name(engine, id),
        });
        let inbound = v.reachable_from.iter().map(|id| PeerRow {
            direction: "reached by",
            id: id.to_string(),
            name: util::client_name(engine, id),
        });
        let rows: Vec<PeerRow> = outbound.chain(inbound).collect();
        if rows.is_empty() {
            format!("{} is isolated", found.name)
        } else {
            output::render_table(&rows)
        }
    };

    let out = output::render_single(&global.output, &view, table, |v| {
        v.can_reach
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("\n")
    });
    output::print_output(&out, global.quiet);
    Ok(())
}
