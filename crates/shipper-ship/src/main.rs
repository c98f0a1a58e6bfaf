//! Entry point for the log shipper: tails the configured input globs,
//! transforms each line, batches the results, and ships them to the
//! ingestion sink until told to stop.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use shipper_batch::run_batcher;
use shipper_checkpoint::CheckpointStore;
use shipper_config::ShipConfig;
use shipper_delivery::DeliveryClient;
use shipper_registry::TailRegistry;
use shipper_tail::{run_discovery_loop, DiscoveryInput};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cfg: ShipConfig = shipper_config::load().context("loading shipper config")?;
    init_tracing(cfg.debug);

    let host = gethostname::gethostname().to_string_lossy().into_owned();
    tracing::info!(
        target = %cfg.target,
        max_batch = cfg.max_batch,
        max_delay = cfg.max_delay,
        inputs = cfg.input.len(),
        "starting up"
    );

    let registry = Arc::new(TailRegistry::new());
    let checkpoint = Arc::new(CheckpointStore::new(cfg.progress_file.clone()));
    let delivery = Arc::new(DeliveryClient::new(cfg.target.clone()));
    let shutdown = CancellationToken::new();

    let (tx, rx) = mpsc::channel(cfg.max_batch);

    let inputs: Vec<DiscoveryInput> = cfg
        .input
        .iter()
        .map(|input| DiscoveryInput {
            group: input.group.clone(),
            pattern: input.pattern.clone(),
        })
        .collect();

    let discovery = tokio::spawn(run_discovery_loop(
        registry.clone(),
        inputs,
        Duration::from_secs(cfg.scan_frequency),
        checkpoint.clone(),
        host,
        cfg.js_transformer.clone(),
        cfg.js_message_parser.clone(),
        tx,
        shutdown.clone(),
    ));

    let batcher = tokio::spawn(run_batcher(
        rx,
        cfg.max_batch,
        Duration::from_secs(cfg.max_delay),
        delivery,
        checkpoint,
        registry,
        shutdown.clone(),
    ));

    wait_for_shutdown_signal().await;
    tracing::info!("signal received, shutting down");
    shutdown.cancel();

    let _ = discovery.await;
    let _ = batcher.await;
    tracing::info!("exiting");
    Ok(())
}

fn init_tracing(debug: bool) {
    let default_directive = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate()).expect("installing SIGTERM handler");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
