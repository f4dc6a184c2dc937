//! `fleetline simulate` -- offline schedule simulation against a fleet
//! document. Nothing is persisted; every answer comes from the schedule.

use std::path::Path;
use std::process;
use std::sync::Arc;

use fleetline_core::{parse_time_of_day, FleetError, ResolvedPosition};
use fleetline_engine::{FleetDirectory, JsonDirectory};
use fleetline_storage::{MemoryPositionStore, PositionStore};
use time::macros::format_description;
use time::{Date, OffsetDateTime, PrimitiveDateTime, Time, UtcOffset};

use crate::config::Config;
use crate::serve::build_resolver;
use crate::{report_error, OutputFormat};

pub(crate) struct SimulateOptions<'a> {
    pub fleet: &'a Path,
    /// Every active vehicle when `None`.
    pub vehicle: Option<&'a str>,
    /// `HH:MM`; the current time of day when `None`.
    pub at: Option<&'a str>,
    /// `YYYY-MM-DD`; today when `None`.
    pub date: Option<&'a str>,
}

pub(crate) async fn cmd_simulate(
    config: &Config,
    options: SimulateOptions<'_>,
    output: OutputFormat,
    quiet: bool,
) {
    match simulate(config, &options).await {
        Ok(positions) => print_positions(&positions, output, quiet),
        Err(e) => {
            report_error(&e.to_string(), output, quiet);
            process::exit(1);
        }
    }
}

async fn simulate(
    config: &Config,
    options: &SimulateOptions<'_>,
) -> Result<Vec<ResolvedPosition>, Box<dyn std::error::Error>> {
    let offset = config.utc_offset()?;
    let instant = simulation_instant(options.date, options.at, offset, OffsetDateTime::now_utc())?;

    let directory: Arc<dyn FleetDirectory> = Arc::new(JsonDirectory::from_path(options.fleet)?);
    let store: Arc<dyn PositionStore> = Arc::new(MemoryPositionStore::new());
    let resolver = build_resolver(config, store, directory.clone()).await?;

    let positions = match options.vehicle {
        Some(id) => vec![resolver.resolve(id, instant).await?],
        None => {
            let ids: Vec<String> = directory
                .active_vehicles()
                .await?
                .into_iter()
                .map(|v| v.id)
                .collect();
            resolver.resolve_many(&ids, instant).await?
        }
    };
    Ok(positions)
}

/// Combine the optional date and time of day, both read in `offset`, into
/// one instant. Missing parts come from `now`.
fn simulation_instant(
    date: Option<&str>,
    at: Option<&str>,
    offset: UtcOffset,
    now: OffsetDateTime,
) -> Result<OffsetDateTime, FleetError> {
    let local_now = now.to_offset(offset);
    let date = match date {
        Some(raw) => Date::parse(raw, format_description!("[year]-[month]-[day]")).map_err(|_| {
            FleetError::invalid_argument(format!("date must be YYYY-MM-DD, got '{raw}'"))
        })?,
        None => local_now.date(),
    };
    let time = match at {
        Some(raw) => {
            let minutes = parse_time_of_day(raw).map_err(|_| {
                FleetError::invalid_argument(format!("time must be HH:MM, got '{raw}'"))
            })?;
            Time::from_hms((minutes / 60) as u8, (minutes % 60) as u8, 0)
                .map_err(|e| FleetError::invalid_argument(e.to_string()))?
        }
        None => local_now.time(),
    };
    Ok(PrimitiveDateTime::new(date, time).assume_offset(offset))
}

fn print_positions(positions: &[ResolvedPosition], output: OutputFormat, quiet: bool) {
    match output {
        OutputFormat::Json => match serde_json::to_string_pretty(positions) {
            Ok(json) => println!("{}", json),
            Err(e) => report_error(&e.to_string(), output, quiet),
        },
        OutputFormat::Text => {
            if positions.is_empty() {
                if !quiet {
                    println!("no vehicle is on a scheduled trip at that time");
                }
                return;
            }
            for position in positions {
                println!("{}", super::describe_position(position));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::{datetime, offset};

    #[test]
    fn instant_uses_date_and_time_in_offset() {
        let now = datetime!(2026-10-17 12:00 UTC);
        let instant =
            simulation_instant(Some("2026-10-18"), Some("06:15"), offset!(-5), now).unwrap();
        assert_eq!(instant, datetime!(2026-10-18 06:15 -5));
    }

    #[test]
    fn missing_parts_come_from_now() {
        let now = datetime!(2026-10-17 12:30 UTC);
        assert_eq!(
            simulation_instant(None, None, offset!(UTC), now).unwrap(),
            now
        );
        assert_eq!(
            simulation_instant(None, Some("08:00"), offset!(+2), now).unwrap(),
            datetime!(2026-10-17 08:00 +2)
        );
    }

    #[test]
    fn malformed_inputs_are_invalid_arguments() {
        let now = datetime!(2026-10-17 12:00 UTC);
        assert!(matches!(
            simulation_instant(Some("17/10/2026"), None, offset!(UTC), now),
            Err(FleetError::InvalidArgument(_))
        ));
        assert!(matches!(
            simulation_instant(None, Some("25:00"), offset!(UTC), now),
            Err(FleetError::InvalidArgument(_))
        ));
    }
}
