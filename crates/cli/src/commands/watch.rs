//! `fleetline watch` -- follow a server's snapshot stream with automatic
//! reconnection.

use std::process;
use std::sync::Arc;
use std::time::Duration;

use fleetline_client::{
    ConnectionState, HttpTransport, ReconnectConfig, ReconnectController, Snapshot, StreamQuery,
};
use tracing::{info, warn};

use crate::{report_error, OutputFormat};

pub(crate) struct WatchOptions {
    pub url: String,
    pub query: StreamQuery,
    pub reconnect: ReconnectConfig,
    /// Exit after this many snapshots.
    pub count: Option<usize>,
}

pub(crate) async fn cmd_watch(options: WatchOptions, output: OutputFormat, quiet: bool) {
    let transport = Arc::new(HttpTransport::new(&options.url, options.query));
    info!(url = %transport.url(), "watching stream");

    let (mut controller, mut snapshots) = ReconnectController::new(transport, options.reconnect);
    let mut states = controller.watch_state();
    controller.connect();

    let mut received = 0usize;
    let failure = loop {
        tokio::select! {
            snapshot = snapshots.recv() => {
                let Some(snapshot) = snapshot else {
                    break None;
                };
                print_snapshot(&snapshot, output);
                received += 1;
                if options.count.is_some_and(|count| received >= count) {
                    break None;
                }
            }
            changed = states.changed() => {
                if changed.is_err() {
                    break None;
                }
                // Transitions are logged by the controller itself.
                let state = states.borrow_and_update().clone();
                if let ConnectionState::Failed { attempts, reason } = state {
                    break Some(format!(
                        "stream failed after {attempts} reconnection attempts: {reason}"
                    ));
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                break None;
            }
        }
    };

    controller.disconnect().await;
    if let Some(message) = failure {
        report_error(&message, output, quiet);
        process::exit(1);
    }
}

fn print_snapshot(snapshot: &Snapshot, output: OutputFormat) {
    match output {
        OutputFormat::Json => match serde_json::to_string(snapshot) {
            Ok(line) => println!("{}", line),
            Err(e) => warn!(error = %e, "snapshot could not be printed"),
        },
        OutputFormat::Text => {
            println!("{}  {} vehicle(s)", snapshot.timestamp, snapshot.positions.len());
            for position in &snapshot.positions {
                println!("  {}", crate::commands::describe_position(position));
            }
        }
    }
}

/// Reconnection settings from command line flags.
///
/// A slow requested cadence stretches the idle timeout to three intervals.
pub(crate) fn reconnect_config(
    base_delay_ms: u64,
    max_attempts: u32,
    interval_ms: Option<u64>,
) -> ReconnectConfig {
    let defaults = ReconnectConfig::default();
    let idle_timeout = interval_ms
        .map(|ms| Duration::from_millis(ms.saturating_mul(3)))
        .map_or(defaults.idle_timeout, |idle| idle.max(defaults.idle_timeout));
    ReconnectConfig {
        base_delay: Duration::from_millis(base_delay_ms),
        max_attempts,
        idle_timeout,
    }
}
