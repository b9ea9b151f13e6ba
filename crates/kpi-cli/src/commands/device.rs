//! `kpi device`: SD type and SD instance registration.

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Args, Subcommand};
use kpi_store::{KpiStore, NewSdParameter, NewSdType, SqliteStore};
use kpi_types::{SdTypeId, ValueDomain};

use crate::input::read_json;
use crate::opts::StoreOpts;

#[derive(Args, Debug)]
pub struct DeviceArgs {
    #[command(subcommand)]
    pub cmd: DeviceCommand,
}

#[derive(Subcommand, Debug)]
pub enum DeviceCommand {
    /// Register an SD type with its parameters
    Type(TypeArgs),

    /// Register an SD instance of a known SD type
    Instance(InstanceArgs),

    /// List registered SD types
    Types,
}

#[derive(Args, Debug)]
pub struct TypeArgs {
    /// Denotation of the SD type, used as its specification on the wire
    #[arg(long, required_unless_present = "file")]
    pub denotation: Option<String>,

    /// Parameter as `name:type` where type is string, boolean or number (repeatable)
    #[arg(long = "parameter", value_parser = parse_parameter)]
    pub parameters: Vec<NewSdParameter>,

    /// SD type as JSON (`{"denotation": .., "parameters": [{"name": .., "type": ..}]}`)
    #[arg(long, conflicts_with_all = ["denotation", "parameters"])]
    pub file: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct InstanceArgs {
    /// Unique identifier of the instance
    #[arg(long)]
    pub uid: String,

    /// Id of the instance's SD type
    #[arg(long)]
    pub sd_type_id: SdTypeId,
}

pub async fn cmd_device(opts: &StoreOpts, args: &DeviceArgs) -> Result<()> {
    let store = opts.open_store()?;
    match &args.cmd {
        DeviceCommand::Type(type_args) => {
            let new_type = new_sd_type(type_args)?;
            let sd_type = blocking(store, move |store| store.register_sd_type(&new_type)).await?;
            tracing::info!(
                sd_type_id = sd_type.id,
                denotation = %sd_type.denotation,
                parameters = sd_type.parameters.len(),
                "SD type registered"
            );
            opts.print_json(&sd_type)
        }
        DeviceCommand::Instance(instance_args) => {
            let uid = instance_args.uid.clone();
            let sd_type_id = instance_args.sd_type_id;
            let instance =
                blocking(store, move |store| store.register_sd_instance(&uid, sd_type_id)).await?;
            tracing::info!(instance_id = instance.id, uid = %instance.uid, "SD instance registered");
            opts.print_json(&instance)
        }
        DeviceCommand::Types => {
            let sd_types = blocking(store, |store| store.sd_types()).await?;
            opts.print_json(&sd_types)
        }
    }
}

fn new_sd_type(args: &TypeArgs) -> Result<NewSdType> {
    if let Some(path) = &args.file {
        return read_json(path);
    }
    let Some(denotation) = &args.denotation else {
        bail!("either --denotation or --file is required");
    };
    Ok(NewSdType {
        denotation: denotation.clone(),
        parameters: args.parameters.clone(),
    })
}

fn parse_parameter(raw: &str) -> Result<NewSdParameter, String> {
    let (name, domain) = raw
        .split_once(':')
        .ok_or_else(|| format!("expected name:type, got '{raw}'"))?;
    let domain = ValueDomain::from_name(domain)
        .ok_or_else(|| format!("unknown parameter type '{domain}'"))?;
    if name.is_empty() {
        return Err("parameter name must not be empty".into());
    }
    Ok(NewSdParameter {
        name: name.to_owned(),
        domain,
    })
}

async fn blocking<T, F>(store: std::sync::Arc<SqliteStore>, f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce(&SqliteStore) -> kpi_store::StoreResult<T> + Send + 'static,
{
    let value = tokio::task::spawn_blocking(move || f(&store))
        .await
        .context("store task panicked")??;
    Ok(value)
}
