//! `kpi run`: a processing unit fed from stdin.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use kpi_host::config::{EVAL_TIMEOUT_ENV, MAX_CONCURRENT_ENV};
use kpi_host::{ChannelPublisher, DefinitionRegistry, Dispatcher, MessageBus, ProcessingUnit, UnitConfig};
use kpi_types::{FulfillmentCheckRequest, KpiConfigurationUpdate};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{broadcast, mpsc};

use crate::input::read_json;

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Configuration update (definitions grouped by SD type) to seed the unit with
    #[arg(long)]
    pub config: PathBuf,

    /// Evaluation timeout per definition in milliseconds
    #[arg(long, env = EVAL_TIMEOUT_ENV)]
    pub timeout_ms: Option<u64>,

    /// Evaluations in flight at once
    #[arg(long, env = MAX_CONCURRENT_ENV)]
    pub max_concurrent_evaluations: Option<usize>,
}

pub async fn cmd_run(args: &RunArgs) -> Result<()> {
    let config = unit_config(args)?;
    let update: KpiConfigurationUpdate = read_json(&args.config)?;

    let registry = Arc::new(DefinitionRegistry::new());
    registry
        .apply_update(&update)
        .with_context(|| format!("load configuration {}", args.config.display()))?;

    let MessageBus {
        configuration,
        requests_tx,
        requests_rx,
        results_tx,
        results_rx,
    } = MessageBus::new(config.channel_capacity);
    let publisher = Arc::new(ChannelPublisher::new(results_tx));
    let dispatcher = Arc::new(Dispatcher::new(registry, publisher, &config));
    let unit = ProcessingUnit::new(dispatcher, configuration.subscribe(), requests_rx);
    drop(configuration);

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = shutdown_tx.send(());
        }
    });

    let writer = tokio::spawn(write_results(results_rx));
    let reader = tokio::spawn(read_requests(requests_tx));
    let summary = unit.run(shutdown_rx).await;
    reader.abort();
    let written = writer.await.context("result writer failed")??;

    tracing::info!(
        requests = summary.requests,
        written,
        failed = summary.failed,
        "run finished"
    );
    Ok(())
}

fn unit_config(args: &RunArgs) -> Result<UnitConfig> {
    let mut config = UnitConfig::from_env()?;
    if let Some(ms) = args.timeout_ms {
        anyhow::ensure!(ms > 0, "--timeout-ms must be positive");
        config.evaluation_timeout = Duration::from_millis(ms);
    }
    if let Some(max) = args.max_concurrent_evaluations {
        anyhow::ensure!(max > 0, "--max-concurrent-evaluations must be positive");
        config.max_concurrent_evaluations = max;
    }
    Ok(config)
}

/// Forwards NDJSON requests from stdin. Malformed lines are logged and skipped.
async fn read_requests(requests_tx: mpsc::Sender<FulfillmentCheckRequest>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut line_no = 0usize;
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(err) => {
                tracing::error!(error = %err, "failed to read stdin");
                break;
            }
        };
        line_no += 1;
        if line.trim().is_empty() {
            continue;
        }
        let request: FulfillmentCheckRequest = match serde_json::from_str(&line) {
            Ok(request) => request,
            Err(err) => {
                tracing::warn!(line = line_no, error = %err, "skipping malformed check request");
                continue;
            }
        };
        if requests_tx.send(request).await.is_err() {
            break;
        }
    }
}

async fn write_results(
    mut results_rx: mpsc::Receiver<kpi_types::FulfillmentCheckResult>,
) -> Result<usize> {
    let mut stdout = tokio::io::stdout();
    let mut written = 0;
    while let Some(result) = results_rx.recv().await {
        let mut line = serde_json::to_vec(&result)?;
        line.push(b'\n');
        stdout.write_all(&line).await?;
        stdout.flush().await?;
        written += 1;
    }
    Ok(written)
}
