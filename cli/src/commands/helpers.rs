use anyhow::{Context, Result, bail};
use chrono::{Local, NaiveDate};

use fleetlog_core::models::{MaintenanceType, VehicleType, date_from_epoch_day, epoch_day};

pub(crate) fn parse_date(date_str: Option<String>) -> Result<NaiveDate> {
    match date_str {
        None => Ok(Local::now().date_naive()),
        Some(s) => match s.as_str() {
            "today" => Ok(Local::now().date_naive()),
            "yesterday" => Ok(Local::now().date_naive() - chrono::Duration::days(1)),
            _ => NaiveDate::parse_from_str(&s, "%Y-%m-%d").with_context(|| {
                format!("Invalid date '{s}'. Use YYYY-MM-DD, today or yesterday")
            }),
        },
    }
}

/// Parse an optional date straight into an epoch day.
pub(crate) fn parse_day(date_str: Option<String>) -> Result<i64> {
    parse_date(date_str).map(epoch_day)
}

pub(crate) fn today() -> i64 {
    epoch_day(Local::now().date_naive())
}

pub(crate) fn format_day(day: i64) -> String {
    date_from_epoch_day(day).map_or_else(
        || format!("day {day}"),
        |d| d.format("%Y-%m-%d").to_string(),
    )
}

pub(crate) fn parse_vehicle_type(s: &str) -> Result<VehicleType> {
    match VehicleType::parse(s) {
        Some(t) => Ok(t),
        None => bail!("Invalid vehicle type '{s}'. Use car or motorcycle"),
    }
}

pub(crate) fn parse_maintenance_type(s: &str) -> Result<MaintenanceType> {
    match MaintenanceType::parse(s) {
        Some(t) => Ok(t),
        None => bail!(
            "Invalid maintenance type '{s}'. Use oil-change, tire-rotation, brake-service, general-review or other"
        ),
    }
}

pub(crate) fn money(v: f64) -> String {
    format!("{v:.2}")
}

pub(crate) fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let end = s.char_indices().nth(max - 3).map_or(s.len(), |(i, _)| i);
        format!("{}...", &s[..end])
    }
}
