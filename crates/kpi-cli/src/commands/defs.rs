//! `kpi defs`: definition management through the definition service.

use std::path::PathBuf;

use anyhow::{Result, anyhow};
use clap::{Args, Subcommand};
use kpi_host::{ConfigurationExchange, DefinitionService};
use kpi_types::{DefinitionId, KpiDefinition};
use serde_json::json;

use crate::input::read_json;
use crate::opts::StoreOpts;

#[derive(Args, Debug)]
pub struct DefsArgs {
    #[command(subcommand)]
    pub cmd: DefsCommand,
}

#[derive(Subcommand, Debug)]
pub enum DefsCommand {
    /// Store a new definition from a JSON file (`-` for stdin)
    Create { file: PathBuf },

    /// Replace the tree and settings of a stored definition
    Update { id: DefinitionId, file: PathBuf },

    /// List stored definitions
    List,

    /// Show one definition
    Get { id: DefinitionId },

    /// Delete a definition together with its tree and results
    Delete { id: DefinitionId },

    /// Print the configuration update processing units would receive
    Config,
}

pub async fn cmd_defs(opts: &StoreOpts, args: &DefsArgs) -> Result<()> {
    let store = opts.open_store()?;
    // Nothing subscribes from a one-shot command; publishing is a no-op beyond logging.
    let service = DefinitionService::new(store, ConfigurationExchange::new(1));

    match &args.cmd {
        DefsCommand::Create { file } => {
            let definition: KpiDefinition = read_json(file)?;
            let stored = service.create(definition).await?;
            opts.print_json(&stored)
        }
        DefsCommand::Update { id, file } => {
            let definition: KpiDefinition = read_json(file)?;
            let update = service.update(*id, definition).await?;
            opts.print_json(&json!({
                "definition": update.definition,
                "reclaimedNodes": update.reclaimed_nodes,
            }))
        }
        DefsCommand::List => opts.print_json(&service.list().await?),
        DefsCommand::Get { id } => {
            let definition = service
                .get(*id)
                .await?
                .ok_or_else(|| anyhow!("KPI definition {id} not found"))?;
            opts.print_json(&definition)
        }
        DefsCommand::Delete { id } => {
            let removed = service.delete(*id).await?;
            opts.print_json(&json!({ "deleted": id, "reclaimedNodes": removed }))
        }
        DefsCommand::Config => {
            let update = service.publish_current_configuration().await?;
            opts.print_json(&*update)
        }
    }
}
