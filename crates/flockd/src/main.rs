//! flockd - flock node daemon.
//!
//! Subcommands:
//! - `flockd serve` - run the node (HTTP front + gossip loops)
//! - `flockd config` - print the merged configuration and exit
//!
//! Configuration is loaded from (in order, later wins):
//! 1. Compiled defaults
//! 2. /etc/flockd/config.toml
//! 3. ~/.config/flockd/config.toml
//! 4. ./flockd.toml (or --config path)
//! 5. Environment variables (FLOCKD_*)

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use uuid::Uuid;

use flockcas::{BlobStore, FileStore};
use flockconf::{ConfigSources, FlockConfig};
use flockproto::{MemoryBus, MemoryHub};

use flockd::{server, telemetry, ConfiguredRuntime, Node, NodeTiming};

/// flock node daemon
#[derive(Parser)]
#[command(name = "flockd")]
#[command(about = "Gossip-scheduled FaaS router and worker node")]
#[command(version)]
struct Cli {
    /// Path to config file (overrides ./flockd.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the node
    Serve {
        /// Show loaded configuration and exit
        #[arg(long)]
        show_config: bool,
    },

    /// Print the merged configuration
    Config,
}

fn print_config(config: &FlockConfig, sources: &ConfigSources) {
    println!("# Configuration sources:");
    for path in &sources.files {
        println!("#   - {}", path.display());
    }
    if !sources.env_overrides.is_empty() {
        println!("# Environment overrides:");
        for var in &sources.env_overrides {
            println!("#   - {}", var);
        }
    }
    println!();
    println!("{}", config.to_toml());
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let (config, sources) = FlockConfig::load_with_sources_from(cli.config.as_deref())
        .context("failed to load configuration")?;

    match cli.command {
        Commands::Config => {
            print_config(&config, &sources);
            Ok(())
        }
        Commands::Serve { show_config } => {
            if show_config {
                print_config(&config, &sources);
                return Ok(());
            }

            telemetry::init(&config.infra.telemetry.log_level);

            tracing::info!("configuration loaded from:");
            for path in &sources.files {
                tracing::info!("   - {}", path.display());
            }
            if !sources.env_overrides.is_empty() {
                tracing::info!("   environment overrides: {:?}", sources.env_overrides);
            }

            serve(config).await
        }
    }
}

async fn serve(config: FlockConfig) -> Result<()> {
    let node_name = if config.infra.node.name.is_empty() {
        format!("node-{}", Uuid::new_v4())
    } else {
        config.infra.node.name.clone()
    };

    // Single-machine loopback fabric; a real gossip transport plugs in
    // through the same GossipBus trait.
    let hub = MemoryHub::new();
    let (bus, inbound) = MemoryBus::attach(&hub, node_name);

    let runtime = ConfiguredRuntime::from_entries(config.bootstrap.functions.iter());
    let blobs: Arc<dyn BlobStore> = Arc::new(
        FileStore::open(&config.infra.paths.blob_dir).context("opening blob store")?,
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let node = Node::start(
        Arc::new(bus),
        inbound,
        runtime,
        blobs,
        NodeTiming::default(),
        shutdown_rx,
    )
    .await?;

    let app = server::router(Arc::clone(&node));
    let addr = SocketAddr::from(([0, 0, 0, 0], config.infra.bind.http_port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;

    tracing::info!(%addr, node = %node.node_id, "flockd listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received");
        })
        .await
        .context("http server failed")?;

    // HTTP front has drained; now stop the background loops
    // (dispatcher -> scheduler -> resolver order falls out of the shared
    // signal plus each loop's draining select).
    let _ = shutdown_tx.send(true);
    Ok(())
}
