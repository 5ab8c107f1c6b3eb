//! Command dispatch: bridges CLI args -> engine calls -> output formatting.
//!
//! Every command here runs inside one `Engine::oneshot`: restore the state
//! file, sync, run the handler, persist.

pub mod acl;
pub mod apply;
pub mod clients;
pub mod config_cmd;
pub mod dns;
pub mod reach;
pub mod status;
pub mod sync;
pub mod util;

use meshgate_core::{Engine, EngineConfig};

use crate::cli::{Command, GlobalOpts};
use crate::error::CliError;
use crate::output;

/// Run a backend-bound command against a freshly synced engine.
pub async fn dispatch(
    cmd: Command,
    config: EngineConfig,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let pb = output::spinner("Syncing clients from backends", global);
    let spinner = pb.clone();

    let result = Engine::oneshot(config, |engine| async move {
        spinner.finish_and_clear();
        Ok(run(cmd, &engine, global).await)
    })
    .await;

    pb.finish_and_clear();
    result?
}

async fn run(cmd: Command, engine: &Engine, global: &GlobalOpts) -> Result<(), CliError> {
    match cmd {
        Command::Clients(args) => clients::handle(engine, args, global),
        Command::Acl(args) => acl::handle(engine, args, global).await,
        Command::Reach { client } => reach::handle(engine, &client, global),
        Command::Sync => sync::handle(engine, global),
        Command::Apply(args) => apply::handle(engine, &args, global).await,
        Command::Status => status::handle(engine, global),
        Command::Dns(args) => dns::handle(engine, args, global).await,
        // Handled before an engine exists
        Command::Serve(_) | Command::Config(_) | Command::Completions(_) => {
            Err(CliError::Internal("command does not run against an engine".into()))
        }
    }
}
