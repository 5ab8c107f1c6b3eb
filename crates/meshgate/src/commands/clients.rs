//! Client command handlers.

use meshgate_core::{Backend, ClientDetail, ClientView, Engine};
use tabled::Tabled;

use crate::cli::{BackendFilter, ClientsArgs, ClientsCommand, GlobalOpts};
use crate::error::CliError;
use crate::output;

use super::{acl, util};

// ── Table row ───────────────────────────────────────────────────────

#[derive(Tabled)]
pub(super) struct ClientRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Backend")]
    backend: String,
    #[tabled(rename = "IP")]
    ip: String,
    #[tabled(rename = "Online")]
    online: String,
    #[tabled(rename = "Policy")]
    policy: String,
    #[tabled(rename = "DNS")]
    dns: String,
}

impl From<&ClientView> for ClientRow {
    fn from(c: &ClientView) -> Self {
        Self {
            id: c.id.to_string(),
            name: c.name.clone(),
            backend: c.backend.to_string(),
            ip: c.ip.to_string(),
            online: util::yes_no(c.online).into(),
            policy: c.acl_policy.to_string(),
            dns: util::yes_no(c.has_dns).into(),
        }
    }
}

pub(super) fn client_lines(c: &ClientView) -> Vec<String> {
    vec![
        format!("ID:          {}", c.id),
        format!("Name:        {}", c.name),
        format!("Backend:     {}", c.backend),
        format!("Backend ID:  {}", c.external_id),
        format!("IP:          {}", c.ip),
        format!("Online:      {}", util::yes_no(c.online)),
        format!("Policy:      {}", c.acl_policy),
        format!("DNS rewrite: {}", util::yes_no(c.has_dns)),
        format!("Last seen:   {}", c.last_seen.format("%Y-%m-%d %H:%M:%S UTC")),
    ]
}

fn detail(d: &ClientDetail) -> String {
    let mut lines = client_lines(&d.client);
    lines.push(String::new());
    lines.push(acl::rules_block(&d.rules));
    lines.join("\n")
}

impl From<BackendFilter> for Backend {
    fn from(filter: BackendFilter) -> Self {
        match filter {
            BackendFilter::Headscale => Backend::Headscale,
            BackendFilter::Wireguard => Backend::WireGuard,
        }
    }
}

// ── Handler ─────────────────────────────────────────────────────────

pub fn handle(engine: &Engine, args: ClientsArgs, global: &GlobalOpts) -> Result<(), CliError> {
    match args.command {
        ClientsCommand::List { backend } => {
            let mut views = engine.client_views();
            if let Some(filter) = backend {
                let backend = Backend::from(filter);
                views.retain(|c| c.backend == backend);
            }
            let out = output::render_list(
                &global.output,
                &views,
                |c| ClientRow::from(c),
                |c| c.id.to_string(),
            );
            output::print_output(&out, global.quiet);
            Ok(())
        }

        ClientsCommand::Get { client } => {
            let found = util::resolve_client(engine, &client)?;
            let detail_view = engine.client_detail(&found.id)?;
            let out = output::render_single(&global.output, &detail_view, detail, |d| {
                d.client.id.to_string()
            });
            output::print_output(&out, global.quiet);
            Ok(())
        }
    }
}
