//! Global CLI options.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use kpi_store::{SqliteStore, SqliteStoreConfig};

pub const DEFAULT_DB: &str = "kpi.sqlite3";

#[derive(Args, Debug, Clone)]
pub struct StoreOpts {
    /// SQLite database holding devices, definitions and results (env: KPI_DB)
    #[arg(long, global = true, env = "KPI_DB")]
    pub db: Option<PathBuf>,

    /// SQLite busy timeout in milliseconds
    #[arg(long, global = true, default_value_t = 5_000)]
    pub busy_timeout_ms: u64,

    /// Pretty-print JSON output
    #[arg(long, global = true)]
    pub pretty: bool,
}

impl StoreOpts {
    pub fn db_path(&self) -> PathBuf {
        self.db.clone().unwrap_or_else(|| PathBuf::from(DEFAULT_DB))
    }

    pub fn open_store(&self) -> Result<Arc<SqliteStore>> {
        let mut config = SqliteStoreConfig::new(self.db_path());
        config.busy_timeout_ms = self.busy_timeout_ms;
        let store = SqliteStore::open(&config)
            .with_context(|| format!("open database {}", config.path.display()))?;
        Ok(Arc::new(store))
    }

    pub fn print_json<T: serde::Serialize>(&self, value: &T) -> Result<()> {
        let text = if self.pretty {
            serde_json::to_string_pretty(value)?
        } else {
            serde_json::to_string(value)?
        };
        println!("{text}");
        Ok(())
    }
}
