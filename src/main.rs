//! TaxiHub: Real-Time Taxi Dispatch Daemon
//!
//! CLI entry point for running the daemon and talking to it.

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use taxihub::{
    config::{Config, LogFormat},
    types::Coordinates,
};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "taxihub")]
#[command(about = "Real-time taxi dispatch daemon")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "taxihub.toml")]
    config: PathBuf,

    /// Data directory
    #[arg(short, long)]
    data_dir: Option<PathBuf>,

    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage the dispatch daemon
    Daemon {
        #[command(subcommand)]
        action: DaemonAction,
    },

    /// Provision a driver record (stands in for the account service)
    Provision {
        /// Driver id
        driver_id: String,

        /// Display name
        #[arg(short, long)]
        name: String,

        /// Vehicle plate
        #[arg(short, long)]
        plate: String,

        /// Taxi stand id
        #[arg(short, long)]
        stand: String,

        /// Taxi stand display name
        #[arg(long, default_value = "")]
        stand_name: String,
    },

    /// Submit a ride request
    Request {
        /// Requesting user id
        #[arg(short, long)]
        user: String,

        /// Taxi stand id
        #[arg(short, long)]
        stand: String,

        /// Origin as "lat,lng"
        #[arg(long)]
        from: String,

        /// Destination as "lat,lng"
        #[arg(long)]
        to: String,

        /// Estimated fare
        #[arg(short, long, default_value_t = 0.0)]
        fare: f64,

        /// Seconds to wait for a driver (omit to return immediately)
        #[arg(short, long)]
        wait: Option<u64>,
    },

    /// Go online as a driver and follow offers
    Drive {
        /// Driver id
        driver_id: String,

        /// Accept every offer as it arrives
        #[arg(long)]
        auto_accept: bool,
    },
}

#[derive(Subcommand)]
pub enum DaemonAction {
    /// Start the daemon (foreground)
    Start,
    /// Stop a running daemon
    Stop,
    /// Show daemon status
    Status,
    /// Restart the daemon
    Restart,
}

/// Parse a "lat,lng" pair
fn parse_coords(s: &str) -> Result<Coordinates> {
    let (lat, lng) = s
        .split_once(',')
        .ok_or_else(|| anyhow::anyhow!("Expected \"lat,lng\", got '{}'", s))?;
    Ok(Coordinates::new(lat.trim().parse()?, lng.trim().parse()?))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load or create config
    let mut config = if cli.config.exists() {
        Config::load(&cli.config)?
    } else {
        Config::default()
    };

    // Override data dir if specified
    if let Some(data_dir) = cli.data_dir {
        config.node.data_dir = data_dir;
    }

    // Setup logging: -v flags raise the configured level
    let log_level = match cli.verbose {
        0 => config.logging.level.tracing_level(),
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };

    match config.logging.format {
        LogFormat::Text => {
            let subscriber = FmtSubscriber::builder()
                .with_max_level(log_level)
                .with_target(false)
                .finish();
            tracing::subscriber::set_global_default(subscriber)?;
        }
        LogFormat::Json => {
            let subscriber = tracing_subscriber::fmt()
                .json()
                .with_max_level(log_level)
                .finish();
            tracing::subscriber::set_global_default(subscriber)?;
        }
    }

    match cli.command {
        Commands::Daemon { action } => commands::daemon::handle_daemon(config, action).await,
        Commands::Provision {
            driver_id,
            name,
            plate,
            stand,
            stand_name,
        } => commands::ride::provision_driver(config, driver_id, name, plate, stand, stand_name)
            .await,
        Commands::Request {
            user,
            stand,
            from,
            to,
            fare,
            wait,
        } => {
            let origin = parse_coords(&from)?;
            let destination = parse_coords(&to)?;
            commands::ride::submit_request(config, user, stand, origin, destination, fare, wait)
                .await
        }
        Commands::Drive {
            driver_id,
            auto_accept,
        } => commands::ride::drive(config, driver_id, auto_accept).await,
    }
}
