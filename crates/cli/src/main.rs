mod commands;
mod config;
mod logging;
mod serve;

use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand, ValueEnum};
use fleetline_client::StreamQuery;

use crate::commands::simulate::{cmd_simulate, SimulateOptions};
use crate::commands::watch::{cmd_watch, reconnect_config, WatchOptions};
use crate::config::Config;

/// Output format for CLI responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub(crate) enum OutputFormat {
    Text,
    Json,
}

/// Real-time fleet position engine.
#[derive(Parser)]
#[command(name = "fleetline", version, about = "Real-time fleet position engine")]
struct Cli {
    /// Output format (text or json)
    #[arg(long, global = true, default_value = "text", value_enum)]
    output: OutputFormat,

    /// Suppress non-essential output
    #[arg(long, global = true)]
    quiet: bool,

    /// Path to a fleetline.toml configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP position server
    Serve {
        /// Port to listen on (overrides config and FLEETLINE_PORT)
        #[arg(long)]
        port: Option<u16>,
        /// Fleet document (vehicles, stops, routes, trips) as JSON
        #[arg(long)]
        fleet: Option<PathBuf>,
        /// Requests per minute per IP (overrides config and FLEETLINE_RATE_LIMIT)
        #[arg(long)]
        rate_limit: Option<u64>,
        /// Start the background simulation immediately
        #[arg(long)]
        simulate: bool,
        /// Path to TLS certificate PEM file (requires --tls-key)
        #[arg(long)]
        tls_cert: Option<PathBuf>,
        /// Path to TLS private key PEM file (requires --tls-cert)
        #[arg(long)]
        tls_key: Option<PathBuf>,
    },

    /// Follow a server's position stream, reconnecting on failure
    Watch {
        /// Server root URL
        #[arg(long, default_value = "http://localhost:8080")]
        url: String,
        /// Only this vehicle
        #[arg(long)]
        vehicle: Option<String>,
        /// Only the vehicle serving this trip
        #[arg(long, conflicts_with = "vehicle")]
        trip: Option<String>,
        /// Snapshot interval requested from the server
        #[arg(long)]
        interval_ms: Option<u64>,
        /// First reconnection delay; doubles on each failure
        #[arg(long, default_value = "2000")]
        base_delay_ms: u64,
        /// Reconnection attempts before giving up
        #[arg(long, default_value = "5")]
        max_attempts: u32,
        /// Exit after this many snapshots
        #[arg(long)]
        count: Option<usize>,
    },

    /// Simulate positions from a fleet document's schedules
    Simulate {
        /// Fleet document (vehicles, stops, routes, trips) as JSON
        #[arg(long)]
        fleet: PathBuf,
        /// Only this vehicle (default: every active vehicle)
        #[arg(long)]
        vehicle: Option<String>,
        /// Time of day, HH:MM (default: now)
        #[arg(long)]
        at: Option<String>,
        /// Service date, YYYY-MM-DD (default: today)
        #[arg(long)]
        date: Option<String>,
    },
}

fn main() {
    let cli = Cli::parse();
    logging::init(cli.quiet);

    let mut config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            report_error(&e.to_string(), cli.output, cli.quiet);
            process::exit(1);
        }
    };
    if let Err(e) = config.apply_env(|name| std::env::var(name).ok()) {
        report_error(&e.to_string(), cli.output, cli.quiet);
        process::exit(1);
    }

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            report_error(
                &format!("failed to create tokio runtime: {}", e),
                cli.output,
                cli.quiet,
            );
            process::exit(1);
        }
    };

    match cli.command {
        Commands::Serve {
            port,
            fleet,
            rate_limit,
            simulate,
            tls_cert,
            tls_key,
        } => {
            // Validate TLS flags: both must be provided or neither
            if tls_cert.is_some() != tls_key.is_some() {
                report_error(
                    "error: --tls-cert and --tls-key must both be provided",
                    cli.output,
                    cli.quiet,
                );
                process::exit(1);
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            if let Some(rate_limit) = rate_limit {
                config.server.rate_limit = rate_limit;
            }
            if simulate {
                config.simulation.autostart = true;
            }
            if let Err(e) = rt.block_on(serve::start_server(&config, fleet, tls_cert, tls_key)) {
                report_error(&format!("server error: {}", e), cli.output, cli.quiet);
                process::exit(1);
            }
        }
        Commands::Watch {
            url,
            vehicle,
            trip,
            interval_ms,
            base_delay_ms,
            max_attempts,
            count,
        } => {
            let options = WatchOptions {
                url,
                query: StreamQuery {
                    vehicle_id: vehicle,
                    trip_id: trip,
                    interval_ms,
                },
                reconnect: reconnect_config(base_delay_ms, max_attempts, interval_ms),
                count,
            };
            rt.block_on(cmd_watch(options, cli.output, cli.quiet));
        }
        Commands::Simulate {
            fleet,
            vehicle,
            at,
            date,
        } => {
            let options = SimulateOptions {
                fleet: &fleet,
                vehicle: vehicle.as_deref(),
                at: at.as_deref(),
                date: date.as_deref(),
            };
            rt.block_on(cmd_simulate(&config, options, cli.output, cli.quiet));
        }
    }
}

pub(crate) fn report_error(msg: &str, output: OutputFormat, quiet: bool) {
    if quiet {
        return;
    }
    match output {
        OutputFormat::Text => eprintln!("{}", msg),
        OutputFormat::Json => eprintln!("{}", serde_json::json!({ "error": msg })),
    }
}
