use anyhow::{Result, bail};
use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

/// Days from 0001-01-01 (CE) to 1970-01-01.
const UNIX_EPOCH_DAYS_FROM_CE: i64 = 719_163;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VehicleType {
    Car,
    Motorcycle,
}

impl VehicleType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Car => "CAR",
            Self::Motorcycle => "MOTORCYCLE",
        }
    }

    /// Parse the stored representation. Unknown values map to `None`.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "CAR" => Some(Self::Car),
            "MOTORCYCLE" | "MOTO" => Some(Self::Motorcycle),
            _ => None,
        }
    }

    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Car => "Car",
            Self::Motorcycle => "Motorcycle",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MaintenanceType {
    OilChange,
    TireRotation,
    BrakeService,
    GeneralReview,
    Other,
}

impl MaintenanceType {
    pub const ALL: [Self; 5] = [
        Self::OilChange,
        Self::TireRotation,
        Self::BrakeService,
        Self::GeneralReview,
        Self::Other,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::OilChange => "OIL_CHANGE",
            Self::TireRotation => "TIRE_ROTATION",
            Self::BrakeService => "BRAKE_SERVICE",
            Self::GeneralReview => "GENERAL_REVIEW",
            Self::Other => "OTHER",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        let normalized = value.trim().to_ascii_uppercase().replace(['-', ' '], "_");
        Self::ALL.into_iter().find(|t| t.as_str() == normalized)
    }

    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::OilChange => "Oil change",
            Self::TireRotation => "Tire rotation",
            Self::BrakeService => "Brake service",
            Self::GeneralReview => "General review",
            Self::Other => "Other",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vehicle {
    pub id: i64,
    pub name: String,
    #[serde(rename = "type")]
    pub vehicle_type: VehicleType,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OdometerRecord {
    pub id: i64,
    pub vehicle_id: i64,
    pub date_epoch_day: i64,
    pub odometer_km: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FuelRecord {
    pub id: i64,
    pub vehicle_id: i64,
    pub date_epoch_day: i64,
    pub odometer_km: f64,
    pub liters: f64,
    pub price_per_liter: f64,
}

impl FuelRecord {
    /// Always derived, never stored.
    #[must_use]
    pub fn total_cost(&self) -> f64 {
        self.liters * self.price_per_liter
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaintenanceRecord {
    pub id: i64,
    pub vehicle_id: i64,
    #[serde(rename = "type")]
    pub maintenance_type: MaintenanceType,
    pub title: String,
    pub notes: String,
    pub created_at_epoch_day: i64,
    pub due_date_epoch_day: Option<i64>,
    pub due_odometer_km: Option<f64>,
    pub estimated_cost: Option<f64>,
    pub done: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    pub dark_theme_enabled: bool,
    pub legacy_import_done: bool,
    pub data_updated_at_millis: i64,
}

/// A collection row addressed by its per-collection id.
pub trait Record {
    fn id(&self) -> i64;
}

/// A time-series row with a business recency date used for conflict resolution.
pub trait Dated: Record {
    fn recency_day(&self) -> i64;
}

impl Record for Vehicle {
    fn id(&self) -> i64 {
        self.id
    }
}

impl Record for OdometerRecord {
    fn id(&self) -> i64 {
        self.id
    }
}

impl Record for FuelRecord {
    fn id(&self) -> i64 {
        self.id
    }
}

impl Record for MaintenanceRecord {
    fn id(&self) -> i64 {
        self.id
    }
}

impl Dated for OdometerRecord {
    fn recency_day(&self) -> i64 {
        self.date_epoch_day
    }
}

impl Dated for FuelRecord {
    fn recency_day(&self) -> i64 {
        self.date_epoch_day
    }
}

impl Dated for MaintenanceRecord {
    fn recency_day(&self) -> i64 {
        self.due_date_epoch_day.unwrap_or(self.created_at_epoch_day)
    }
}

/// The complete point-in-time value of one replica.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub vehicles: Vec<Vehicle>,
    pub odometer_records: Vec<OdometerRecord>,
    pub fuel_records: Vec<FuelRecord>,
    pub maintenance_records: Vec<MaintenanceRecord>,
    pub updated_at_millis: i64,
}

impl Snapshot {
    /// Collection-wise equality after sorting each collection by id.
    /// `updated_at_millis` is not part of the comparison.
    #[must_use]
    pub fn equivalent(&self, other: &Self) -> bool {
        sorted_by_id(&self.vehicles) == sorted_by_id(&other.vehicles)
            && sorted_by_id(&self.odometer_records) == sorted_by_id(&other.odometer_records)
            && sorted_by_id(&self.fuel_records) == sorted_by_id(&other.fuel_records)
            && sorted_by_id(&self.maintenance_records) == sorted_by_id(&other.maintenance_records)
    }

    #[must_use]
    pub fn record_count(&self) -> usize {
        self.vehicles.len()
            + self.odometer_records.len()
            + self.fuel_records.len()
            + self.maintenance_records.len()
    }
}

fn sorted_by_id<T: Record + Clone>(items: &[T]) -> Vec<T> {
    let mut sorted = items.to_vec();
    sorted.sort_by_key(Record::id);
    sorted
}

/// Vehicles seeded into an empty store so that it always has at least one.
#[must_use]
pub fn default_vehicles() -> Vec<Vehicle> {
    vec![
        Vehicle {
            id: 1,
            name: "My Car".to_string(),
            vehicle_type: VehicleType::Car,
        },
        Vehicle {
            id: 2,
            name: "My Motorcycle".to_string(),
            vehicle_type: VehicleType::Motorcycle,
        },
    ]
}

#[derive(Debug, Clone)]
pub struct NewOdometerRecord {
    pub vehicle_id: i64,
    pub date_epoch_day: i64,
    pub odometer_km: f64,
}

#[derive(Debug, Clone)]
pub struct NewFuelRecord {
    pub vehicle_id: i64,
    pub date_epoch_day: i64,
    pub odometer_km: f64,
    pub liters: f64,
    pub price_per_liter: f64,
}

#[derive(Debug, Clone)]
pub struct NewMaintenance {
    pub vehicle_id: i64,
    pub maintenance_type: MaintenanceType,
    pub title: String,
    pub notes: String,
    pub created_at_epoch_day: i64,
    pub due_date_epoch_day: Option<i64>,
    pub due_odometer_km: Option<f64>,
    pub estimated_cost: Option<f64>,
}

// --- Epoch days ---

#[must_use]
pub fn epoch_day(date: NaiveDate) -> i64 {
    i64::from(date.num_days_from_ce()) - UNIX_EPOCH_DAYS_FROM_CE
}

#[must_use]
pub fn date_from_epoch_day(day: i64) -> Option<NaiveDate> {
    let days_from_ce = i32::try_from(day.checked_add(UNIX_EPOCH_DAYS_FROM_CE)?).ok()?;
    NaiveDate::from_num_days_from_ce_opt(days_from_ce)
}

// --- Validation ---

/// Highest odometer reading known for a vehicle across odometer and fuel records.
#[must_use]
pub fn latest_known_odometer(
    vehicle_id: i64,
    odometer_records: &[OdometerRecord],
    fuel_records: &[FuelRecord],
) -> Option<f64> {
    let readings = odometer_records
        .iter()
        .filter(|r| r.vehicle_id == vehicle_id)
        .map(|r| r.odometer_km)
        .chain(
            fuel_records
                .iter()
                .filter(|r| r.vehicle_id == vehicle_id)
                .map(|r| r.odometer_km),
        );
    readings.fold(None, |max, km| match max {
        Some(m) if m >= km => Some(m),
        _ => Some(km),
    })
}

fn validate_reading(
    vehicle_id: i64,
    date: i64,
    km: f64,
    today: i64,
    latest: Option<f64>,
) -> Result<()> {
    if vehicle_id <= 0 {
        bail!("Select a vehicle");
    }
    if date > today {
        bail!("Date cannot be in the future");
    }
    if !km.is_finite() || km <= 0.0 {
        bail!("Odometer must be greater than zero");
    }
    if let Some(latest) = latest {
        if km < latest {
            bail!("Odometer is below the last recorded reading ({latest} km)");
        }
    }
    Ok(())
}

pub fn validate_odometer_entry(
    entry: &NewOdometerRecord,
    today: i64,
    latest: Option<f64>,
) -> Result<()> {
    validate_reading(
        entry.vehicle_id,
        entry.date_epoch_day,
        entry.odometer_km,
        today,
        latest,
    )
}

pub fn validate_fuel_entry(entry: &NewFuelRecord, today: i64, latest: Option<f64>) -> Result<()> {
    validate_reading(
        entry.vehicle_id,
        entry.date_epoch_day,
        entry.odometer_km,
        today,
        latest,
    )?;
    if !entry.liters.is_finite() || entry.liters <= 0.0 {
        bail!("Liters must be greater than zero");
    }
    if !entry.price_per_liter.is_finite() || entry.price_per_liter <= 0.0 {
        bail!("Price per liter must be greater than zero");
    }
    Ok(())
}

pub fn validate_maintenance_entry(entry: &NewMaintenance) -> Result<()> {
    if entry.vehicle_id <= 0 {
        bail!("Select a vehicle");
    }
    if entry.title.trim().is_empty() {
        bail!("Maintenance title must not be empty");
    }
    if entry.due_odometer_km.is_some_and(|km| km < 0.0) {
        bail!("Due odometer must not be negative");
    }
    if entry.estimated_cost.is_some_and(|c| c < 0.0) {
        bail!("Estimated cost must not be negative");
    }
    Ok(())
}

pub fn validate_vehicle_name(name: &str) -> Result<String> {
    let name = name.trim();
    if name.is_empty() {
        bail!("Vehicle name must not be empty");
    }
    Ok(name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn odo(id: i64, vehicle_id: i64, date: i64, km: f64) -> OdometerRecord {
        OdometerRecord {
            id,
            vehicle_id,
            date_epoch_day: date,
            odometer_km: km,
        }
    }

    #[test]
    fn test_epoch_day_roundtrip_known_dates() {
        let epoch = NaiveDate::from_ymd_opt(1970, 1, 1).unwrap();
        assert_eq!(epoch_day(epoch), 0);
        let d = NaiveDate::from_ymd_opt(2024, 6, 15).unwrap();
        assert_eq!(epoch_day(d), 19_889);
        assert_eq!(date_from_epoch_day(19_889), Some(d));
        assert_eq!(date_from_epoch_day(-1), NaiveDate::from_ymd_opt(1969, 12, 31));
    }

    #[test]
    fn test_equivalent_ignores_order_and_timestamp() {
        let a = Snapshot {
            vehicles: vec![
                Vehicle {
                    id: 2,
                    name: "Moto".to_string(),
                    vehicle_type: VehicleType::Motorcycle,
                },
                Vehicle {
                    id: 1,
                    name: "Car".to_string(),
                    vehicle_type: VehicleType::Car,
                },
            ],
            odometer_records: vec![odo(1, 1, 10, 100.0), odo(2, 1, 20, 200.0)],
            updated_at_millis: 5,
            ..Snapshot::default()
        };
        let mut b = a.clone();
        b.vehicles.reverse();
        b.odometer_records.reverse();
        b.updated_at_millis = 99;
        assert!(a.equivalent(&b));

        b.odometer_records[0].odometer_km = 201.0;
        assert!(!a.equivalent(&b));
    }

    #[test]
    fn test_fuel_total_cost_is_derived() {
        let fuel = FuelRecord {
            id: 1,
            vehicle_id: 1,
            date_epoch_day: 0,
            odometer_km: 10.0,
            liters: 20.0,
            price_per_liter: 5.5,
        };
        assert!((fuel.total_cost() - 110.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_maintenance_recency_falls_back_to_created() {
        let mut m = MaintenanceRecord {
            id: 1,
            vehicle_id: 1,
            maintenance_type: MaintenanceType::OilChange,
            title: "Oil".to_string(),
            notes: String::new(),
            created_at_epoch_day: 100,
            due_date_epoch_day: None,
            due_odometer_km: None,
            estimated_cost: None,
            done: false,
        };
        assert_eq!(m.recency_day(), 100);
        m.due_date_epoch_day = Some(130);
        assert_eq!(m.recency_day(), 130);
    }

    #[test]
    fn test_latest_known_odometer_spans_fuel_and_odometer() {
        let odometers = vec![odo(1, 1, 10, 1000.0), odo(2, 2, 10, 9000.0)];
        let fuels = vec![FuelRecord {
            id: 1,
            vehicle_id: 1,
            date_epoch_day: 11,
            odometer_km: 1200.0,
            liters: 10.0,
            price_per_liter: 5.0,
        }];
        assert_eq!(latest_known_odometer(1, &odometers, &fuels), Some(1200.0));
        assert_eq!(latest_known_odometer(2, &odometers, &fuels), Some(9000.0));
        assert_eq!(latest_known_odometer(3, &odometers, &fuels), None);
    }

    #[test]
    fn test_validate_odometer_entry() {
        let entry = NewOdometerRecord {
            vehicle_id: 1,
            date_epoch_day: 10,
            odometer_km: 500.0,
        };
        assert!(validate_odometer_entry(&entry, 10, Some(400.0)).is_ok());
        assert!(validate_odometer_entry(&entry, 9, None).is_err());
        let err = validate_odometer_entry(&entry, 10, Some(600.0)).unwrap_err();
        assert!(err.to_string().contains("below"));
    }

    #[test]
    fn test_validate_fuel_entry_rejects_non_positive() {
        let mut entry = NewFuelRecord {
            vehicle_id: 1,
            date_epoch_day: 10,
            odometer_km: 500.0,
            liters: 0.0,
            price_per_liter: 5.0,
        };
        assert!(validate_fuel_entry(&entry, 10, None).is_err());
        entry.liters = 30.0;
        entry.price_per_liter = -1.0;
        assert!(validate_fuel_entry(&entry, 10, None).is_err());
        entry.price_per_liter = 5.9;
        assert!(validate_fuel_entry(&entry, 10, None).is_ok());
    }

    #[test]
    fn test_parse_types() {
        assert_eq!(VehicleType::parse("car"), Some(VehicleType::Car));
        assert_eq!(VehicleType::parse("MOTORCYCLE"), Some(VehicleType::Motorcycle));
        assert_eq!(VehicleType::parse("truck"), None);
        assert_eq!(
            MaintenanceType::parse("oil-change"),
            Some(MaintenanceType::OilChange)
        );
        assert_eq!(MaintenanceType::parse("nope"), None);
    }
}
