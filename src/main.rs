use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use logistics_workflow::{Config, LogisticsService, init_logging};
use serde_json::json;

#[derive(Parser, Debug)]
#[command(name = "logistics", about = "Inspect a logistics workflow store", version)]
struct CliArgs {
    #[arg(
        long,
        env = "LOGISTICS_CONFIG",
        value_name = "FILE",
        help = "Path to a YAML configuration file",
        global = true
    )]
    config: Option<PathBuf>,

    #[arg(
        long,
        value_name = "DIR",
        help = "sled database directory, overrides the configured db_path",
        global = true
    )]
    db_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Shipment, fleet and warehouse statistics
    Stats,
    /// Proposed homes for vehicles awaiting allocation
    PlanAllocation,
    /// Status history of one shipment
    History {
        #[arg(value_name = "SHIPMENT_ID")]
        shipment_id: String,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = CliArgs::parse();

    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(db_path) = cli.db_path {
        config.db_path = db_path;
    }
    init_logging(&config.logging)?;

    let db = sled::open(&config.db_path)
        .with_context(|| format!("failed to open store at {:?}", config.db_path))?;
    let service = LogisticsService::new(Arc::new(db))?.with_policy(config.workflow());

    let output = match cli.command {
        Command::Stats => json!({
            "shipments": service.shipment_stats()?,
            "fleet": service.fleet_stats()?,
            "warehouses": service.warehouse_stats()?,
        }),
        Command::PlanAllocation => serde_json::to_value(service.propose_allocation()?)?,
        Command::History { shipment_id } => {
            serde_json::to_value(service.shipment_history(&shipment_id)?)?
        }
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
