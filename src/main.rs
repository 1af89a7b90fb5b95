//! mesh-link node binary.
//!
//! ```text
//! mesh-link genconf                 print a config with a fresh private key
//! mesh-link run --config node.toml  run a node until SIGINT/SIGTERM
//! ```

use std::error::Error;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};

use mesh_link::config::{load_config, ConfigWatcher, NodeConfig};
use mesh_link::lifecycle::{self, wait_for_signal};
use mesh_link::observability::{logging, metrics};
use mesh_link::{DrainSession, NodeIdentity};

#[derive(Parser)]
#[command(name = "mesh-link")]
#[command(about = "Encrypted mesh link node", version, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print a new configuration with a freshly generated private key
    Genconf,
    /// Run a node
    Run {
        /// Path to the TOML configuration
        #[arg(short, long)]
        config: PathBuf,

        /// Override the configured log level
        #[arg(long)]
        log_level: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Genconf => {
            print!("{}", genconf()?);
            Ok(())
        }
        Commands::Run { config, log_level } => run(&config, log_level).await,
    }
}

fn genconf() -> Result<String, toml::ser::Error> {
    let config = NodeConfig {
        private_key: NodeIdentity::generate().secret_hex(),
        listen: vec!["tls://[::]:0".to_string()],
        ..NodeConfig::default()
    };
    toml::to_string_pretty(&config)
}

async fn run(path: &Path, log_level: Option<String>) -> Result<(), Box<dyn Error>> {
    let config = load_config(path)?;
    logging::init(log_level.as_deref().unwrap_or(&config.observability.log_level));

    tracing::info!(version = env!("CARGO_PKG_VERSION"), config = ?path, "mesh-link starting");

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse::<SocketAddr>() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(e) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                error = %e,
                "Failed to parse metrics address"
            ),
        }
    }

    let mut node = lifecycle::start(config, Arc::new(DrainSession)).await?;
    for listener in node.listeners() {
        tracing::info!(transport = %listener.transport(), address = %listener.local_addr(), "Listening");
    }

    let (watcher, mut updates) = ConfigWatcher::new(path);
    let _watcher = match watcher.run() {
        Ok(w) => Some(w),
        Err(e) => {
            tracing::warn!(error = %e, "Config watcher unavailable, reload disabled");
            None
        }
    };

    let signal = wait_for_signal();
    tokio::pin!(signal);
    let received = loop {
        tokio::select! {
            sig = &mut signal => break sig,
            Some(update) = updates.recv() => node.apply_config(update),
        }
    };

    tracing::info!(signal = received, "Shutting down");
    node.shutdown().await;
    tracing::info!("Shutdown complete");
    Ok(())
}
