use anyhow::{Result, bail};
use chrono::{Datelike, Local};
use tabled::{Table, Tabled, settings::Style};

use fleetlog_core::FleetService;
use fleetlog_core::models::epoch_day;
use fleetlog_core::report::MonthlyMetric;

use super::helpers::{format_day, money, parse_day, today};

/// Months shown before the current one in the monthly breakdown.
const MONTHS_BACK: u32 = 5;

/// Start of the current month, used when `--from` is omitted.
fn month_start() -> i64 {
    let today = Local::now().date_naive();
    epoch_day(today.with_day(1).unwrap_or(today))
}

pub(crate) fn cmd_report(
    svc: &FleetService,
    vehicle_id: i64,
    from: Option<String>,
    to: Option<String>,
    json: bool,
) -> Result<()> {
    let Some(vehicle) = svc.list_vehicles()?.into_iter().find(|v| v.id == vehicle_id) else {
        bail!("Vehicle not found: {vehicle_id}");
    };
    let from = match from {
        Some(date) => parse_day(Some(date))?,
        None => month_start(),
    };
    let to = parse_day(to)?;
    let report = svc.period_report(vehicle_id, from, to)?;
    let monthly = svc.monthly_metrics(vehicle_id, today(), MONTHS_BACK)?;

    if json {
        let out = serde_json::json!({ "period": report, "monthly": monthly });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!(
        "{} ({}), {} to {}",
        vehicle.name,
        vehicle.vehicle_type.label(),
        format_day(report.from_epoch_day),
        format_day(report.to_epoch_day)
    );
    println!("  Distance:        {:.1} km", report.distance_km);
    println!("  Fuel:            {:.2} L", report.liters);
    match report.km_per_liter {
        Some(kml) => println!("  Consumption:     {kml:.2} km/L"),
        None => println!("  Consumption:     -"),
    }
    println!("  Refuels:         {}", report.refuel_count);
    println!("  Total cost:      {}", money(report.total_cost));
    println!("  Monthly average: {}", money(report.average_monthly_cost));
    println!();
    print_monthly_table(&monthly);
    Ok(())
}

fn print_monthly_table(metrics: &[MonthlyMetric]) {
    #[derive(Tabled)]
    struct MonthRow {
        #[tabled(rename = "Month")]
        month: String,
        #[tabled(rename = "Distance (km)")]
        distance: String,
        #[tabled(rename = "km/L")]
        km_per_liter: String,
        #[tabled(rename = "Cost")]
        cost: String,
    }

    let rows: Vec<MonthRow> = metrics
        .iter()
        .map(|m| MonthRow {
            month: m.month.clone(),
            distance: format!("{:.1}", m.distance_km),
            km_per_liter: m.km_per_liter.map_or_else(|| "-".to_string(), |v| format!("{v:.2}")),
            cost: money(m.total_cost),
        })
        .collect();

    let table = Table::new(&rows).with(Style::rounded()).to_string();
    println!("{table}");
}

pub(crate) fn cmd_theme(svc: &FleetService, mode: Option<&str>, json: bool) -> Result<()> {
    if let Some(mode) = mode {
        let enabled = match mode.to_lowercase().as_str() {
            "dark" | "on" => true,
            "light" | "off" => false,
            _ => bail!("Invalid theme '{mode}'. Use dark or light"),
        };
        svc.set_dark_theme(enabled)?;
    }
    let dark = svc.settings()?.dark_theme_enabled;

    if json {
        println!("{}", serde_json::json!({ "dark_theme_enabled": dark }));
    } else {
        println!("Theme: {}", if dark { "dark" } else { "light" });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetlog_core::legacy::JsonLegacyStore;

    fn service() -> FleetService {
        FleetService::open_in_memory(&JsonLegacyStore::from_json("{}").unwrap()).unwrap()
    }

    #[test]
    fn test_report_unknown_vehicle() {
        let svc = service();
        assert!(cmd_report(&svc, 42, None, None, false).is_err());
    }

    #[test]
    fn test_report_rejects_inverted_range() {
        let svc = service();
        let result = cmd_report(
            &svc,
            1,
            Some("2024-02-01".into()),
            Some("2024-01-01".into()),
            true,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_report_with_monthly_breakdown() {
        let svc = service();
        cmd_report(&svc, 1, Some("2024-01-01".into()), None, false).unwrap();
        cmd_report(&svc, 2, None, None, true).unwrap();
    }

    #[test]
    fn test_theme_toggle() {
        let svc = service();
        cmd_theme(&svc, Some("dark"), false).unwrap();
        assert!(svc.settings().unwrap().dark_theme_enabled);
        cmd_theme(&svc, Some("light"), true).unwrap();
        assert!(!svc.settings().unwrap().dark_theme_enabled);
        assert!(cmd_theme(&svc, Some("neon"), false).is_err());
    }
}
