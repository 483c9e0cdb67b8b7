//! CLI Entry Point for graph-migrate
//!
//! # Usage
//!
//! Serve the graph RPC endpoint and, if enabled, migrate from the cluster. Series that
//! arrive without a local RRD file are marked `MISSING` and swept into the migration
//! queues every `migrate.sweep_interval_ms`:
//! ```bash
//! graph-migrate serve --config config/graph.toml
//! ```
//!
//! Show which node owns a cache key:
//! ```bash
//! graph-migrate route --config config/graph.toml 0f3a..._GAUGE_60
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use graph_migrate::config::Config;
use graph_migrate::error_recovery::RetryPolicy;
use graph_migrate::flush::JournalFlusher;
use graph_migrate::logging::{self, OutputFormat, TracingConfig};
use graph_migrate::migrate::{ClusterDirectory, MigrationContext, MigrationMode};
use graph_migrate::ring::ClusterRing;
use graph_migrate::rpc::{GraphRpcServer, TcpDialer};
use graph_migrate::store::MemoryGraphItems;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "graph-migrate")]
#[command(about = "Migrates graph samples and RRD files across a hashed cluster", long_about = None)]
struct Cli {
    /// Log output format (pretty, compact, json)
    #[arg(long, global = true, default_value = "compact")]
    log_format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the graph RPC server and the migration workers
    Serve {
        /// Configuration file
        #[arg(long, default_value = "config/graph.toml")]
        config: PathBuf,

        /// Start in push mode instead of fetching RRD files
        #[arg(long)]
        prefer_push: bool,
    },

    /// Print the owning node of each cache key
    Route {
        /// Configuration file
        #[arg(long, default_value = "config/graph.toml")]
        config: PathBuf,

        /// Cache keys to locate
        #[arg(required = true)]
        keys: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            config,
            prefer_push,
        } => {
            let config = load_config(&config)?;
            init_logging(&config, cli.log_format)?;
            serve(config, prefer_push).await
        }
        Commands::Route { config, keys } => {
            let config = load_config(&config)?;
            route(&config, &keys)
        }
    }
}

fn load_config(path: &Path) -> Result<Config> {
    let config = Config::load_from(path)
        .with_context(|| format!("loading configuration from {}", path.display()))?;
    config.validate()?;
    Ok(config)
}

fn init_logging(config: &Config, format: OutputFormat) -> Result<()> {
    let tracing_config = TracingConfig::from_config(config)
        .map_err(anyhow::Error::msg)?
        .with_format(format);
    logging::init(tracing_config).map_err(anyhow::Error::msg)
}

async fn serve(config: Config, prefer_push: bool) -> Result<()> {
    let store = Arc::new(MemoryGraphItems::new());
    let server = GraphRpcServer::bind(&config.rpc.listen, store.clone(), &config.rrd.storage)
        .await
        .context("binding graph RPC server")?
        .with_missing_detection(config.migrate.enabled);
    let server_task = tokio::spawn(server.run());

    let directory = if config.migrate.enabled {
        let mode = Arc::new(MigrationMode::new());
        mode.set_prefer_push(prefer_push);
        let ctx = Arc::new(MigrationContext {
            store: store.clone(),
            flusher: Arc::new(JournalFlusher),
            mode,
            storage: config.rrd.storage.clone(),
            call_timeout: config.call_timeout(),
            reconnect: RetryPolicy::unbounded(config.reconnect_delay()),
        });
        let directory = ClusterDirectory::start(&config.migrate, ctx, Arc::new(TcpDialer))
            .await
            .context("connecting to migration cluster")?;
        Some(directory)
    } else {
        info!("Migration disabled");
        None
    };

    info!(name = %config.application.name, listen = %config.rpc.listen, "Running - press Ctrl+C to stop");
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    let mut sweep = tokio::time::interval(config.sweep_interval());
    loop {
        tokio::select! {
            signal = &mut shutdown => {
                signal?;
                break;
            }
            _ = sweep.tick(), if directory.is_some() => {
                if let Some(directory) = &directory {
                    if let Err(e) = directory.migrate_pending().await {
                        warn!(error = %e, "Pending migration sweep failed");
                    }
                }
            }
        }
    }

    info!("Shutting down");
    server_task.abort();
    if let Some(directory) = directory {
        directory.shutdown().await;
    }
    Ok(())
}

fn route(config: &Config, keys: &[String]) -> Result<()> {
    let ring = ClusterRing::with_nodes(config.migrate.replicas, config.migrate.cluster.keys());
    for key in keys {
        match ring.locate_node(key) {
            Some(node) => {
                let addr = config.migrate.cluster.get(&node).map_or("", String::as_str);
                println!("{key}\t{node}\t{addr}");
            }
            None => println!("{key}\t-\t-"),
        }
    }
    Ok(())
}
