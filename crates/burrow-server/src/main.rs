//! Burrow server - multi-tenant LAN database server.
//!
//! This binary wires the burrow-core components together behind a REST API:
//! registry + execution engine for queries, pairing authority for
//! authorization, mDNS advertisement so clients on the segment can find the
//! server without configuration.

mod handlers;
mod server;

use anyhow::Result;
use burrow_core::{
    default_data_dir, DiscoveryBroadcaster, EngineConfig, ExecutionEngine, PairingAuthority,
    Registry, StatusAggregator,
};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "burrow-server")]
#[command(about = "Multi-tenant LAN database server")]
struct Args {
    /// Port to listen on (0 = auto-assign)
    #[arg(short, long, default_value_t = burrow_core::ServerConfig::DEFAULT_PORT)]
    port: u16,

    /// Host to bind to
    #[arg(long, default_value = burrow_core::ServerConfig::DEFAULT_HOST)]
    host: String,

    /// Directory holding database files (defaults to the platform data dir)
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Wall-clock budget per statement, in seconds
    #[arg(long, default_value_t = EngineConfig::DEFAULT_QUERY_TIMEOUT.as_secs())]
    query_timeout_secs: u64,

    /// Seconds to wait for a contended database before failing with Busy
    #[arg(long, default_value_t = EngineConfig::DEFAULT_BUSY_WAIT.as_secs())]
    busy_wait_secs: u64,

    /// Maximum statements queued per database
    #[arg(long, default_value_t = EngineConfig::DEFAULT_MAX_QUEUE_DEPTH)]
    max_queue_depth: usize,

    /// Disable mDNS advertisement
    #[arg(long)]
    no_discovery: bool,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.debug { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .init();

    info!("Starting Burrow server");

    let data_dir = args.data_dir.unwrap_or_else(default_data_dir);
    info!("Data directory: {}", data_dir.display());

    let config = EngineConfig {
        query_timeout: Duration::from_secs(args.query_timeout_secs),
        busy_wait: Duration::from_secs(args.busy_wait_secs),
        max_queue_depth: args.max_queue_depth,
        ..EngineConfig::default()
    };

    let registry = Arc::new(Registry::open(data_dir, config.clone()).await?);
    let pairing = Arc::new(PairingAuthority::new(config.session_idle_timeout));
    let engine = ExecutionEngine::new(registry.clone());
    let status = StatusAggregator::new(registry.clone(), pairing.clone());

    let state = Arc::new(server::AppState {
        registry,
        engine,
        pairing,
        status,
    });

    let addr = server::start_server(state.clone(), &args.host, args.port).await?;

    let discovery = if args.no_discovery {
        None
    } else {
        let hint = state
            .pairing
            .current_code()
            .chars()
            .take(2)
            .collect::<String>();
        Some(DiscoveryBroadcaster::start(
            addr.port(),
            hint,
            config.discovery_retry_interval,
        ))
    };

    // Printed on stdout for the desktop shell that launches the server.
    println!("BURROW_PORT={}", addr.port());

    info!("Burrow server running on {}", addr);
    info!("Pairing code: {}", state.pairing.current_code());

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received, exiting");

    if let Some(discovery) = discovery {
        discovery.stop();
    }

    Ok(())
}
