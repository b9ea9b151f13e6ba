mod commands;
mod input;
mod opts;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use commands::defs::DefsArgs;
use commands::device::DeviceArgs;
use commands::eval::EvalArgs;
use commands::run::RunArgs;
use opts::StoreOpts;

#[derive(Parser, Debug)]
#[command(name = "kpi", version, about = "KPI definition and fulfillment CLI")]
struct Cli {
    #[command(flatten)]
    opts: StoreOpts,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Evaluate a KPI tree against one parameter snapshot
    Eval(EvalArgs),

    /// Register SD types and SD instances
    Device(DeviceArgs),

    /// Manage stored KPI definitions
    Defs(DefsArgs),

    /// Run a processing unit over NDJSON check requests from stdin
    Run(RunArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    setup_logging();
    let cli = Cli::parse();

    match cli.command {
        Command::Eval(args) => commands::eval::cmd_eval(&args),
        Command::Device(args) => commands::device::cmd_device(&cli.opts, &args).await,
        Command::Defs(args) => commands::defs::cmd_defs(&cli.opts, &args).await,
        Command::Run(args) => commands::run::cmd_run(&args).await,
    }
}

/// Logs go to stderr so stdout stays machine-readable.
fn setup_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}
