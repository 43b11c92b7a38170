//! Ridelink server binary.
//!
//! # Usage
//!
//! ```bash
//! # Development: self-signed certificate, rides kept in memory
//! ridelink-server --bind 0.0.0.0:4433
//!
//! # Production: TLS certificate and durable storage
//! ridelink-server --bind 0.0.0.0:4433 --cert cert.pem --key key.pem --db rides.redb
//! ```

use std::{path::PathBuf, time::Duration};

use clap::Parser;
use ridelink_server::{
    CoordinatorConfig, MemoryStore, RedbStore, RegistryConfig, RideStore, Server,
    ServerRuntimeConfig,
};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Ridelink ride coordination server
#[derive(Parser, Debug)]
#[command(name = "ridelink-server")]
#[command(about = "Ride lifecycle coordination server")]
#[command(version)]
struct Args {
    /// Address to bind to
    #[arg(short, long, default_value = "0.0.0.0:4433")]
    bind: String,

    /// Path to TLS certificate (PEM format)
    #[arg(short, long)]
    cert: Option<PathBuf>,

    /// Path to TLS private key (PEM format)
    #[arg(short, long)]
    key: Option<PathBuf>,

    /// Redb database file (rides are kept in memory when omitted)
    #[arg(long)]
    db: Option<PathBuf>,

    /// Events kept per offline actor before the oldest are dropped
    #[arg(long, default_value = "50")]
    replay_capacity: usize,

    /// Maximum time for one push before the session is dropped
    #[arg(long, default_value = "2000")]
    delivery_timeout_ms: u64,

    /// Age at which an unaccepted ride request is cancelled
    #[arg(long, default_value = "300")]
    request_ttl_secs: u64,

    /// Interval between expiry sweeps
    #[arg(long, default_value = "30")]
    sweep_interval_secs: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Args {
    fn into_config(self) -> ServerRuntimeConfig {
        ServerRuntimeConfig {
            bind_address: self.bind,
            cert_path: self.cert,
            key_path: self.key,
            db_path: self.db,
            registry: RegistryConfig {
                replay_capacity: self.replay_capacity,
                delivery_timeout: Duration::from_millis(self.delivery_timeout_ms),
            },
            coordinator: CoordinatorConfig {
                request_ttl: Duration::from_secs(self.request_ttl_secs),
                sweep_interval: Duration::from_secs(self.sweep_interval_secs),
            },
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    if args.cert.is_none() || args.key.is_none() {
        tracing::warn!("No TLS certificate provided - using self-signed certificate");
        tracing::warn!("This is NOT suitable for production use!");
    }

    let config = args.into_config();
    tracing::info!(bind = %config.bind_address, db = ?config.db_path, "Ridelink server starting");

    match config.db_path.clone() {
        Some(path) => serve(config, RedbStore::open(path)?).await?,
        None => {
            tracing::warn!("No --db given - rides are lost on restart");
            serve(config, MemoryStore::new()).await?;
        },
    }

    Ok(())
}

async fn serve<S: RideStore>(
    config: ServerRuntimeConfig,
    store: S,
) -> Result<(), Box<dyn std::error::Error>> {
    let server = Server::bind(config, store)?;
    tracing::info!("Server listening on {}", server.local_addr()?);

    server
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for ctrl-c");
                std::future::pending::<()>().await;
            }
        })
        .await?;

    Ok(())
}
