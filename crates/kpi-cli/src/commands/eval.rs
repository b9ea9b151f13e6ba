//! `kpi eval`: offline evaluation of one tree.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use kpi_eval::{evaluate, parameters_from_json};
use kpi_types::KpiNode;
use serde_json::{Map, Value as JsonValue};

use crate::input::read_json;

#[derive(Args, Debug)]
pub struct EvalArgs {
    /// KPI tree as JSON (`-` for stdin)
    #[arg(long)]
    pub tree: PathBuf,

    /// Parameter snapshot as a JSON object
    #[arg(long)]
    pub parameters: PathBuf,
}

pub fn cmd_eval(args: &EvalArgs) -> Result<()> {
    let tree: KpiNode = read_json(&args.tree)?;
    let parameters: Map<String, JsonValue> = read_json(&args.parameters)?;
    let parameters = parameters_from_json(parameters);

    let fulfilled = evaluate(&tree, &parameters)
        .with_context(|| format!("evaluate {}", args.tree.display()))?;
    tracing::debug!(nodes = tree.node_count(), fulfilled, "tree evaluated");
    println!("{fulfilled}");
    Ok(())
}
