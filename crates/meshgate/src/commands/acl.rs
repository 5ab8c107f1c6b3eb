//! ACL command handlers.

use meshgate_core::{AclRule, ClientDetail, Engine, PolicyMode, RuleView};
use tabled::Tabled;

use crate::cli::{AclArgs, AclCommand, GlobalOpts};
use crate::error::CliError;
use crate::output;

use super::clients::ClientRow;
use super::util;

// ── Rules table ─────────────────────────────────────────────────────

#[derive(Tabled)]
struct RuleRow {
    #[tabled(rename = "Target")]
    target: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Direction")]
    direction: &'static str,
    #[tabled(rename = "State")]
    state: String,
}

impl From<&RuleView> for RuleRow {
    fn from(r: &RuleView) -> Self {
        Self {
            target: r.target_id.to_string(),
            name: r.target_name.clone().unwrap_or_else(|| "-".into()),
            direction: if r.bidirectional { "both" } else { "out" },
            state: r.state.to_string(),
        }
    }
}

/// "Rules:" heading followed by a table, or a note when there are none.
pub(super) fn rules_block(rules: &[RuleView]) -> String {
    if rules.is_empty() {
        return "Rules:       none".into();
    }
    let rows: Vec<RuleRow> = rules.iter().map(|r| RuleRow::from(r)).collect();
    format!("Rules:\n{}", output::render_table(&rows))
}

fn detail(d: &ClientDetail) -> String {
    format!(
        "{} ({})\nPolicy:      {}\n{}",
        d.client.name,
        d.client.id,
        d.client.acl_policy,
        rules_block(&d.rules)
    )
}

// ── Handler ─────────────────────────────────────────────────────────

pub async fn handle(engine: &Engine, args: AclArgs, global: &GlobalOpts) -> Result<(), CliError> {
    match args.command {
        AclCommand::Show { client } => {
            let found = util::resolve_client(engine, &client)?;
            show(engine, &found.id, global)
        }

        AclCommand::Set {
            client,
            policy,
            allow,
            mutual,
            clear,
            apply,
        } => {
            let found = util::resolve_client(engine, &client)?;
            let mode = policy
                .as_deref()
                .map(str::parse::<PolicyMode>)
                .transpose()?;
            let replace_rules = clear || !allow.is_empty() || !mutual.is_empty();

            if replace_rules {
                if clear
                    && !util::confirm(&format!("Remove every rule of {}?", found.name), global.yes)?
                {
                    return Ok(());
                }
                let mut rules = Vec::with_capacity(allow.len() + mutual.len());
                for target in &allow {
                    rules.push(AclRule::to(util::resolve_client(engine, target)?.id));
                }
                for target in &mutual {
                    rules.push(AclRule::both_ways(util::resolve_client(engine, target)?.id));
                }
                engine
                    .set_acl(&found.id, mode.unwrap_or(found.acl_policy), rules)
                    .await?;
            } else if let Some(mode) = mode {
                engine.set_policy(&found.id, mode).await?;
            } else {
                return Err(CliError::Validation {
                    field: "acl".into(),
                    reason: "nothing to change; pass --policy or new rules".into(),
                });
            }

            if apply {
                super::apply::push(engine, global).await?;
            } else if !global.quiet {
                eprintln!("Saved. Not enforced yet; run `meshgate apply` to push it.");
            }
            show(engine, &found.id, global)
        }

        AclCommand::Toggle { client, target } => {
            let owner = util::resolve_client(engine, &client)?;
            let target = util::resolve_client(engine, &target)?;
            let Some(bidirectional) = engine.toggle_bidirectional(&owner.id, &target.id).await?
            else {
                return Err(CliError::Validation {
                    field: "target".into(),
                    reason: format!("{} has no rule for {}", owner.name, target.name),
                });
            };
            let arrow = if bidirectional { "<->" } else { "->" };
            output::print_output(
                &format!("{} {arrow} {}", owner.name, target.name),
                global.quiet,
            );
            Ok(())
        }

        AclCommand::Targets { client } => {
            let found = util::resolve_client(engine, &client)?;
            let views: Vec<_> = engine
                .selectable_targets(&found.id)?
                .iter()
                .map(|c| meshgate_core::ClientView::from(c.as_ref()))
                .collect();
            let out = output::render_list(
                &global.output,
                &views,
                |c| ClientRow::from(c),
                |c| c.id.to_string(),
            );
            output::print_output(&out, global.quiet);
            Ok(())
        }
    }
}

fn show(engine: &Engine, id: &meshgate_core::ClientId, global: &GlobalOpts) -> Result<(), CliError> {
    let view = engine.client_detail(id)?;
    let out = output::render_single(&global.output, &view, detail, |d| {
        d.rules
            .iter()
            .map(|r| r.target_id.to_string())
            .collect::<Vec<_>>()
            .join("\n")
    });
    output::print_output(&out, global.quiet);
    Ok(())
}
