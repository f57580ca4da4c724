use anyhow::Result;
use tabled::{
    Table, Tabled,
    settings::{Alignment, Modify, Style, object::Columns},
};

use fleetlog_core::FleetService;
use fleetlog_core::models::{NewFuelRecord, NewMaintenance, NewOdometerRecord};

use super::helpers::{format_day, money, parse_day, parse_maintenance_type, today, truncate};

// --- Odometer ---

pub(crate) fn cmd_odometer_add(
    svc: &FleetService,
    vehicle_id: i64,
    km: f64,
    date: Option<String>,
    json: bool,
) -> Result<()> {
    let entry = NewOdometerRecord {
        vehicle_id,
        date_epoch_day: parse_day(date)?,
        odometer_km: km,
    };
    let record = svc.add_odometer(&entry, today())?;

    if json {
        println!("{}", serde_json::to_string_pretty(&record)?);
    } else {
        println!(
            "Logged {:.1} km for vehicle {} on {}",
            record.odometer_km,
            record.vehicle_id,
            format_day(record.date_epoch_day)
        );
    }
    Ok(())
}

pub(crate) fn cmd_odometer_list(
    svc: &FleetService,
    vehicle_id: Option<i64>,
    json: bool,
) -> Result<()> {
    let records: Vec<_> = svc
        .list_odometer_records()?
        .into_iter()
        .filter(|r| vehicle_id.is_none_or(|id| r.vehicle_id == id))
        .collect();

    if json {
        println!("{}", serde_json::to_string_pretty(&records)?);
    } else if records.is_empty() {
        eprintln!("No odometer readings yet. Use `fleetlog odometer add` to record one.");
    } else {
        #[derive(Tabled)]
        struct OdometerRow {
            #[tabled(rename = "ID")]
            id: i64,
            #[tabled(rename = "Vehicle")]
            vehicle: i64,
            #[tabled(rename = "Date")]
            date: String,
            #[tabled(rename = "Km")]
            km: String,
        }

        let rows: Vec<OdometerRow> = records
            .iter()
            .map(|r| OdometerRow {
                id: r.id,
                vehicle: r.vehicle_id,
                date: format_day(r.date_epoch_day),
                km: format!("{:.1}", r.odometer_km),
            })
            .collect();
        let table = Table::new(&rows)
            .with(Style::rounded())
            .with(Modify::new(Columns::new(3..4)).with(Alignment::right()))
            .to_string();
        println!("{table}");
    }
    Ok(())
}

// --- Fuel ---

#[allow(clippy::too_many_arguments)]
pub(crate) fn cmd_fuel_add(
    svc: &FleetService,
    vehicle_id: i64,
    km: f64,
    liters: f64,
    price_per_liter: f64,
    date: Option<String>,
    json: bool,
) -> Result<()> {
    let entry = NewFuelRecord {
        vehicle_id,
        date_epoch_day: parse_day(date)?,
        odometer_km: km,
        liters,
        price_per_liter,
    };
    let record = svc.add_fuel(&entry, today())?;

    if json {
        let mut value = serde_json::to_value(&record)?;
        value["total_cost"] = serde_json::json!(record.total_cost());
        println!("{}", serde_json::to_string_pretty(&value)?);
    } else {
        println!(
            "Logged {:.2} L at {} for vehicle {} on {} (total {})",
            record.liters,
            money(record.price_per_liter),
            record.vehicle_id,
            format_day(record.date_epoch_day),
            money(record.total_cost())
        );
    }
    Ok(())
}

pub(crate) fn cmd_fuel_list(svc: &FleetService, vehicle_id: Option<i64>, json: bool) -> Result<()> {
    let records: Vec<_> = svc
        .list_fuel_records()?
        .into_iter()
        .filter(|r| vehicle_id.is_none_or(|id| r.vehicle_id == id))
        .collect();

    if json {
        let values: Vec<serde_json::Value> = records
            .iter()
            .map(|r| {
                let mut value = serde_json::to_value(r)?;
                value["total_cost"] = serde_json::json!(r.total_cost());
                Ok(value)
            })
            .collect::<Result<_, serde_json::Error>>()?;
        println!("{}", serde_json::to_string_pretty(&values)?);
    } else if records.is_empty() {
        eprintln!("No refuels yet. Use `fleetlog fuel add` to record one.");
    } else {
        #[derive(Tabled)]
        struct FuelRow {
            #[tabled(rename = "ID")]
            id: i64,
            #[tabled(rename = "Vehicle")]
            vehicle: i64,
            #[tabled(rename = "Date")]
            date: String,
            #[tabled(rename = "Km")]
            km: String,
            #[tabled(rename = "Liters")]
            liters: String,
            #[tabled(rename = "Price/L")]
            price: String,
            #[tabled(rename = "Total")]
            total: String,
        }

        let rows: Vec<FuelRow> = records
            .iter()
            .map(|r| FuelRow {
                id: r.id,
                vehicle: r.vehicle_id,
                date: format_day(r.date_epoch_day),
                km: format!("{:.1}", r.odometer_km),
                liters: format!("{:.2}", r.liters),
                price: money(r.price_per_liter),
                total: money(r.total_cost()),
            })
            .collect();
        let table = Table::new(&rows)
            .with(Style::rounded())
            .with(Modify::new(Columns::new(3..7)).with(Alignment::right()))
            .to_string();
        println!("{table}");
    }
    Ok(())
}

// --- Maintenance ---

pub(crate) struct MaintenanceArgs {
    pub vehicle_id: i64,
    pub kind: String,
    pub title: Option<String>,
    pub notes: Option<String>,
    pub due_date: Option<String>,
    pub due_km: Option<f64>,
    pub cost: Option<f64>,
}

pub(crate) fn cmd_maintenance_add(
    svc: &FleetService,
    args: MaintenanceArgs,
    json: bool,
) -> Result<()> {
    let maintenance_type = parse_maintenance_type(&args.kind)?;
    let due_date_epoch_day = args.due_date.map(|d| parse_due_day(&d)).transpose()?;
    let entry = NewMaintenance {
        vehicle_id: args.vehicle_id,
        maintenance_type,
        title: args
            .title
            .unwrap_or_else(|| maintenance_type.label().to_string()),
        notes: args.notes.unwrap_or_default(),
        created_at_epoch_day: today(),
        due_date_epoch_day,
        due_odometer_km: args.due_km,
        estimated_cost: args.cost,
    };
    let record = svc.add_maintenance(&entry)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&record)?);
    } else {
        print!("Scheduled '{}' (id {})", record.title, record.id);
        if let Some(day) = record.due_date_epoch_day {
            print!(", due {}", format_day(day));
        }
        if let Some(km) = record.due_odometer_km {
            print!(", due at {km:.0} km");
        }
        println!();
    }
    Ok(())
}

/// Due dates may lie in the future, so `parse_date`'s keywords are not enough here.
fn parse_due_day(s: &str) -> Result<i64> {
    use anyhow::Context;

    chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map(fleetlog_core::models::epoch_day)
        .with_context(|| format!("Invalid due date '{s}'. Use YYYY-MM-DD"))
}

pub(crate) fn cmd_maintenance_list(
    svc: &FleetService,
    vehicle_id: Option<i64>,
    json: bool,
) -> Result<()> {
    let items: Vec<_> = svc
        .maintenance_overview(today())?
        .into_iter()
        .filter(|item| vehicle_id.is_none_or(|id| item.record.vehicle_id == id))
        .collect();

    if json {
        println!("{}", serde_json::to_string_pretty(&items)?);
    } else if items.is_empty() {
        eprintln!("No maintenance scheduled. Use `fleetlog maintenance add` to plan one.");
    } else {
        #[derive(Tabled)]
        struct MaintenanceRow {
            #[tabled(rename = "ID")]
            id: i64,
            #[tabled(rename = "Vehicle")]
            vehicle: i64,
            #[tabled(rename = "Title")]
            title: String,
            #[tabled(rename = "Due date")]
            due_date: String,
            #[tabled(rename = "Due km")]
            due_km: String,
            #[tabled(rename = "Est. cost")]
            cost: String,
            #[tabled(rename = "Status")]
            status: &'static str,
        }

        let rows: Vec<MaintenanceRow> = items
            .iter()
            .map(|item| {
                let r = &item.record;
                MaintenanceRow {
                    id: r.id,
                    vehicle: r.vehicle_id,
                    title: truncate(&r.title, 30),
                    due_date: r.due_date_epoch_day.map_or("-".into(), format_day),
                    due_km: r.due_odometer_km.map_or("-".into(), |km| format!("{km:.0}")),
                    cost: r.estimated_cost.map_or("-".into(), money),
                    status: item.status.label(),
                }
            })
            .collect();
        let table = Table::new(&rows)
            .with(Style::rounded())
            .with(Modify::new(Columns::new(4..6)).with(Alignment::right()))
            .to_string();
        println!("{table}");
    }
    Ok(())
}

pub(crate) fn cmd_maintenance_done(
    svc: &FleetService,
    id: i64,
    undo: bool,
    json: bool,
) -> Result<()> {
    let record = svc.set_maintenance_done(id, !undo)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&record)?);
    } else if record.done {
        println!("Marked '{}' as done", record.title);
    } else {
        println!("Reopened '{}'", record.title);
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
    fn test_odometer_add_rejects_lower_reading() {
        let svc = service();
        cmd_odometer_add(&svc, 1, 1000.0, Some("yesterday".into()), true).unwrap();
        assert!(cmd_odometer_add(&svc, 1, 900.0, None, false).is_err());
        assert_eq!(svc.list_odometer_records().unwrap().len(), 1);
    }

    #[test]
    fn test_odometer_add_rejects_unknown_vehicle() {
        let svc = service();
        assert!(cmd_odometer_add(&svc, 99, 10.0, None, false).is_err());
    }

    #[test]
    fn test_fuel_add_and_list() {
        let svc = service();
        cmd_fuel_add(&svc, 2, 500.0, 10.0, 6.5, None, false).unwrap();
        cmd_fuel_list(&svc, Some(2), true).unwrap();
        let records = svc.list_fuel_records().unwrap();
        assert_eq!(records.len(), 1);
        assert!((records[0].total_cost() - 65.0).abs() < 1e-9);
    }

    #[test]
    fn test_fuel_add_rejects_zero_liters() {
        let svc = service();
        assert!(cmd_fuel_add(&svc, 1, 500.0, 0.0, 6.5, None, false).is_err());
    }

    #[test]
    fn test_maintenance_add_defaults_title_and_done() {
        let svc = service();
        let args = MaintenanceArgs {
            vehicle_id: 1,
            kind: "oil-change".into(),
            title: None,
            notes: None,
            due_date: Some("2030-06-01".into()),
            due_km: Some(15_000.0),
            cost: None,
        };
        cmd_maintenance_add(&svc, args, true).unwrap();

        let items = svc.maintenance_overview(today()).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].record.title, "Oil change");

        cmd_maintenance_done(&svc, items[0].record.id, false, false).unwrap();
        let items = svc.maintenance_overview(today()).unwrap();
        assert!(items[0].record.done);
        cmd_maintenance_list(&svc, None, false).unwrap();
    }

    #[test]
    fn test_maintenance_add_rejects_bad_due_date() {
        let svc = service();
        let args = MaintenanceArgs {
            vehicle_id: 1,
            kind: "other".into(),
            title: Some("Wash".into()),
            notes: None,
            due_date: Some("next week".into()),
            due_km: None,
            cost: None,
        };
        assert!(cmd_maintenance_add(&svc, args, false).is_err());
    }
}
