use std::collections::BTreeMap;

use chrono::{Datelike, Months};
use serde::Serialize;

use crate::models::{
    MaintenanceRecord, Snapshot, date_from_epoch_day, epoch_day, latest_known_odometer,
};

pub const DUE_SOON_DAYS: i64 = 15;
pub const DUE_SOON_KM: f64 = 500.0;

/// Fuel and distance totals for one vehicle over an inclusive day range.
#[derive(Debug, Clone, Serialize)]
pub struct PeriodReport {
    pub vehicle_id: i64,
    pub from_epoch_day: i64,
    pub to_epoch_day: i64,
    pub distance_km: f64,
    pub liters: f64,
    pub km_per_liter: Option<f64>,
    pub total_cost: f64,
    pub refuel_count: usize,
    pub average_monthly_cost: f64,
}

#[must_use]
pub fn period_report(snapshot: &Snapshot, vehicle_id: i64, from: i64, to: i64) -> PeriodReport {
    let known_vehicle = snapshot.vehicles.iter().any(|v| v.id == vehicle_id);
    let in_range =
        |vid: i64, day: i64| known_vehicle && vid == vehicle_id && day >= from && day <= to;

    let fuel: Vec<_> = snapshot
        .fuel_records
        .iter()
        .filter(|r| in_range(r.vehicle_id, r.date_epoch_day))
        .collect();
    let points: Vec<f64> = snapshot
        .odometer_records
        .iter()
        .filter(|r| in_range(r.vehicle_id, r.date_epoch_day))
        .map(|r| r.odometer_km)
        .chain(fuel.iter().map(|r| r.odometer_km))
        .collect();

    let distance_km = if points.len() < 2 {
        0.0
    } else {
        let max = points.iter().copied().fold(f64::MIN, f64::max);
        let min = points.iter().copied().fold(f64::MAX, f64::min);
        max - min
    };
    let liters: f64 = fuel.iter().map(|r| r.liters).sum();
    let total_cost: f64 = fuel.iter().map(|r| r.total_cost()).sum();
    let km_per_liter = (liters > 0.0 && distance_km > 0.0).then(|| distance_km / liters);

    let average_monthly_cost = if known_vehicle {
        average_monthly_cost(snapshot, vehicle_id)
    } else {
        0.0
    };

    PeriodReport {
        vehicle_id,
        from_epoch_day: from,
        to_epoch_day: to,
        distance_km,
        liters,
        km_per_liter,
        total_cost,
        refuel_count: fuel.len(),
        average_monthly_cost,
    }
}

/// Mean of the per-month fuel totals over every month the vehicle refueled,
/// independent of any report range.
fn average_monthly_cost(snapshot: &Snapshot, vehicle_id: i64) -> f64 {
    let mut totals: BTreeMap<(i32, u32), f64> = BTreeMap::new();
    for record in snapshot.fuel_records.iter().filter(|r| r.vehicle_id == vehicle_id) {
        if let Some(date) = date_from_epoch_day(record.date_epoch_day) {
            *totals.entry((date.year(), date.month())).or_default() += record.total_cost();
        }
    }
    if totals.is_empty() {
        return 0.0;
    }
    #[allow(clippy::cast_precision_loss)]
    let months = totals.len() as f64;
    totals.values().sum::<f64>() / months
}

/// One calendar month of a vehicle's history.
#[derive(Debug, Clone, Serialize)]
pub struct MonthlyMetric {
    /// `YYYY-MM`
    pub month: String,
    pub total_cost: f64,
    pub km_per_liter: Option<f64>,
    pub distance_km: f64,
}

/// Per-month figures for the month containing `today` and the `months_back`
/// months before it, oldest first.
#[must_use]
pub fn monthly_metrics(
    snapshot: &Snapshot,
    vehicle_id: i64,
    today: i64,
    months_back: u32,
) -> Vec<MonthlyMetric> {
    let Some(current) = date_from_epoch_day(today).and_then(|d| d.with_day(1)) else {
        return Vec::new();
    };
    (0..=months_back)
        .rev()
        .filter_map(|offset| {
            let start = current.checked_sub_months(Months::new(offset))?;
            let end = start.checked_add_months(Months::new(1))?.pred_opt()?;
            let report = period_report(snapshot, vehicle_id, epoch_day(start), epoch_day(end));
            Some(MonthlyMetric {
                month: start.format("%Y-%m").to_string(),
                total_cost: report.total_cost,
                km_per_liter: report.km_per_liter,
                distance_km: report.distance_km,
            })
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MaintenanceStatus {
    Done,
    Overdue,
    DueSoon,
    OnTrack,
}

impl MaintenanceStatus {
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Done => "done",
            Self::Overdue => "overdue",
            Self::DueSoon => "due soon",
            Self::OnTrack => "on track",
        }
    }
}

#[must_use]
pub fn maintenance_status(
    record: &MaintenanceRecord,
    today: i64,
    current_km: Option<f64>,
) -> MaintenanceStatus {
    if record.done {
        return MaintenanceStatus::Done;
    }
    let days_left = record.due_date_epoch_day.map(|due| due - today);
    let km_left = match (record.due_odometer_km, current_km) {
        (Some(due), Some(current)) => Some(due - current),
        _ => None,
    };

    if days_left.is_some_and(|d| d < 0) || km_left.is_some_and(|k| k <= 0.0) {
        MaintenanceStatus::Overdue
    } else if days_left.is_some_and(|d| d <= DUE_SOON_DAYS)
        || km_left.is_some_and(|k| k <= DUE_SOON_KM)
    {
        MaintenanceStatus::DueSoon
    } else {
        MaintenanceStatus::OnTrack
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MaintenanceItem {
    #[serde(flatten)]
    pub record: MaintenanceRecord,
    pub status: MaintenanceStatus,
}

/// Maintenance records with their status, keeping the input order.
#[must_use]
pub fn maintenance_overview(snapshot: &Snapshot, today: i64) -> Vec<MaintenanceItem> {
    snapshot
        .maintenance_records
        .iter()
        .map(|record| {
            let current_km = latest_known_odometer(
                record.vehicle_id,
                &snapshot.odometer_records,
                &snapshot.fuel_records,
            );
            MaintenanceItem {
                status: maintenance_status(record, today, current_km),
                record: record.clone(),
            }
        })
        .collect()
}
