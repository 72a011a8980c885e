use anyhow::{bail, Context};
use medfleet_allocation::Unit;
use medfleet_core::{logging, FleetConfig};
use medfleet_dispatch::{Dispatcher, HttpTaskSource};
use medfleet_mesh::MessageBus;
use medfleet_nav_bridge::{NavBridge, SimulatedController};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

const NODE_PROTOCOL_VERSION: u32 = 1;
const NODE_RUNTIME_VERSION: u32 = 1;

#[derive(Debug, Serialize)]
struct NodeVersionHandshake {
    version: &'static str,
    runtime_version: u32,
    protocol_version: u32,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().collect();

    if args.iter().any(|arg| arg == "--version-json") {
        let handshake = NodeVersionHandshake {
            version: env!("CARGO_PKG_VERSION"),
            runtime_version: NODE_RUNTIME_VERSION,
            protocol_version: NODE_PROTOCOL_VERSION,
        };
        println!("{}", serde_json::to_string(&handshake)?);
        return Ok(());
    }

    let config_path = parse_config_path(&args)?;
    let config = FleetConfig::from_file(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;
    logging::init_with(config.node.log_format);

    info!(
        config = %config_path.display(),
        units = config.units.len(),
        strategy = ?config.protocol.strategy,
        task_source = %config.dispatcher.task_source_url,
        "MedFleet node starting"
    );

    let bus = MessageBus::new();

    let mut units = Vec::with_capacity(config.units.len());
    for unit_config in &config.units {
        let controller = SimulatedController::new(unit_config.position, &config.simulation);
        let bridge = NavBridge::new(Arc::new(controller), config.protocol.locate_timeout());
        let unit = Unit::register(unit_config, &config, bus.clone(), bridge).await;
        units.push(tokio::spawn(unit.run()));
    }

    let source = HttpTaskSource::new(config.dispatcher.task_source_url.clone());
    let dispatcher = Dispatcher::register(
        config.dispatcher.clone(),
        Arc::new(source),
        bus.clone(),
        config.unit_ids(),
    )
    .await;
    let dispatcher = tokio::spawn(dispatcher.run());

    tokio::signal::ctrl_c().await.context("waiting for shutdown signal")?;
    info!("Shutdown requested");

    for id in bus.registered().await {
        bus.unregister(&id).await;
    }

    for handle in units {
        match handle.await {
            Ok(Ok(unit)) => info!(unit = %unit.id(), battery = unit.battery(), "Unit stopped"),
            Ok(Err(e)) => error!(error = %e, "Unit stopped on invariant violation"),
            Err(e) => error!(error = %e, "Unit task panicked"),
        }
    }
    let dispatcher = dispatcher.await.context("dispatcher task")?;
    info!(pending = dispatcher.pending_ids().len(), "MedFleet node stopped");
    Ok(())
}

fn parse_config_path(args: &[String]) -> anyhow::Result<PathBuf> {
    let mut args_iter = args.iter();
    while let Some(arg) = args_iter.next() {
        if arg == "--config" {
            if let Some(path) = args_iter.next() {
                return Ok(PathBuf::from(path));
            }
            bail!("--config was provided without a path");
        }
    }

    bail!("missing required --config <path> argument")
}
