use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use tracing::info;

use crate::db::Database;
use crate::error::SyncError;
use crate::legacy::{ImportOutcome, LegacyImporter, LegacySnapshotSource};
use crate::models::{
    FuelRecord, MaintenanceRecord, NewFuelRecord, NewMaintenance, NewOdometerRecord,
    OdometerRecord, Settings, Snapshot, Vehicle, VehicleType, latest_known_odometer,
    validate_fuel_entry, validate_maintenance_entry, validate_odometer_entry,
    validate_vehicle_name,
};
use crate::report::{self, MaintenanceItem, MonthlyMetric, PeriodReport};
use crate::sync::LocalSnapshotStore;

/// Application facade over the local store.
///
/// Opening runs the schema migrator, then the legacy import, then makes sure at least
/// one vehicle exists. All three are blocking; async callers should open the service
/// on a blocking task.
#[derive(Clone)]
pub struct FleetService {
    db: Arc<Mutex<Database>>,
}

impl FleetService {
    pub fn open(db_path: &Path, legacy: &dyn LegacySnapshotSource) -> Result<Self> {
        let db = Database::open(db_path)?;
        Self::start(db, legacy)
    }

    pub fn open_in_memory(legacy: &dyn LegacySnapshotSource) -> Result<Self> {
        let db = Database::open_in_memory()?;
        Self::start(db, legacy)
    }

    fn start(db: Database, legacy: &dyn LegacySnapshotSource) -> Result<Self> {
        let outcome = LegacyImporter::new(&db, legacy).import_if_needed()?;
        if let ImportOutcome::Imported(summary) = &outcome {
            info!(vehicles = summary.vehicles, "legacy store imported on startup");
        }
        if db.ensure_default_vehicles()? {
            info!("seeded default vehicles into empty store");
        }
        Ok(FleetService {
            db: Arc::new(Mutex::new(db)),
        })
    }

    fn db(&self) -> MutexGuard<'_, Database> {
        self.db.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // --- Vehicles ---

    pub fn add_vehicle(&self, name: &str, vehicle_type: VehicleType) -> Result<Vehicle> {
        let name = validate_vehicle_name(name)?;
        self.db().add_vehicle(&name, vehicle_type)
    }

    pub fn rename_vehicle(&self, id: i64, name: &str) -> Result<Vehicle> {
        let name = validate_vehicle_name(name)?;
        self.db().rename_vehicle(id, &name)
    }

    pub fn list_vehicles(&self) -> Result<Vec<Vehicle>> {
        self.db().list_vehicles()
    }

    fn require_vehicle(db: &Database, vehicle_id: i64) -> Result<()> {
        if vehicle_id > 0 && db.get_vehicle(vehicle_id)?.is_none() {
            bail!("Vehicle not found: {vehicle_id}");
        }
        Ok(())
    }

    fn latest_km(db: &Database, vehicle_id: i64) -> Result<Option<f64>> {
        Ok(latest_known_odometer(
            vehicle_id,
            &db.list_odometer_records()?,
            &db.list_fuel_records()?,
        ))
    }

    // --- Records ---

    pub fn add_odometer(&self, entry: &NewOdometerRecord, today: i64) -> Result<OdometerRecord> {
        let db = self.db();
        Self::require_vehicle(&db, entry.vehicle_id)?;
        let latest = Self::latest_km(&db, entry.vehicle_id)?;
        validate_odometer_entry(entry, today, latest)?;
        db.add_odometer(entry)
    }

    pub fn add_fuel(&self, entry: &NewFuelRecord, today: i64) -> Result<FuelRecord> {
        let db = self.db();
        Self::require_vehicle(&db, entry.vehicle_id)?;
        let latest = Self::latest_km(&db, entry.vehicle_id)?;
        validate_fuel_entry(entry, today, latest)?;
        db.add_fuel(entry)
    }

    pub fn add_maintenance(&self, entry: &NewMaintenance) -> Result<MaintenanceRecord> {
        let db = self.db();
        Self::require_vehicle(&db, entry.vehicle_id)?;
        validate_maintenance_entry(entry)?;
        db.add_maintenance(entry)
    }

    pub fn set_maintenance_done(&self, id: i64, done: bool) -> Result<MaintenanceRecord> {
        self.db().set_maintenance_done(id, done)
    }

    pub fn list_odometer_records(&self) -> Result<Vec<OdometerRecord>> {
        self.db().list_odometer_records()
    }

    pub fn list_fuel_records(&self) -> Result<Vec<FuelRecord>> {
        self.db().list_fuel_records()
    }

    // --- Settings ---

    pub fn settings(&self) -> Result<Settings> {
        self.db().get_settings()
    }

    pub fn set_dark_theme(&self, enabled: bool) -> Result<()> {
        self.db().set_dark_theme(enabled)
    }

    // --- Reports ---

    pub fn period_report(&self, vehicle_id: i64, from: i64, to: i64) -> Result<PeriodReport> {
        if from > to {
            bail!("Report start must not be after its end");
        }
        let snapshot = self.snapshot()?;
        Ok(report::period_report(&snapshot, vehicle_id, from, to))
    }

    pub fn monthly_metrics(
        &self,
        vehicle_id: i64,
        today: i64,
        months_back: u32,
    ) -> Result<Vec<MonthlyMetric>> {
        let snapshot = self.snapshot()?;
        Ok(report::monthly_metrics(&snapshot, vehicle_id, today, months_back))
    }

    pub fn maintenance_overview(&self, today: i64) -> Result<Vec<MaintenanceItem>> {
        let snapshot = self.snapshot()?;
        Ok(report::maintenance_overview(&snapshot, today))
    }

    // --- Snapshot ---

    pub fn snapshot(&self) -> Result<Snapshot> {
        self.db().snapshot()
    }

    pub fn restore_snapshot(&self, snapshot: &Snapshot) -> Result<()> {
        self.db()
            .restore_snapshot(snapshot)
            .context("Local restore failed")
    }
}

/// SQLite calls run on the blocking pool so the engine's runtime workers stay free.
#[async_trait]
impl LocalSnapshotStore for FleetService {
    async fn read_snapshot(&self) -> Result<Snapshot, SyncError> {
        let svc = self.clone();
        flatten_blocking(tokio::task::spawn_blocking(move || svc.snapshot()).await)
    }

    async fn restore_snapshot(&self, snapshot: &Snapshot) -> Result<(), SyncError> {
        let svc = self.clone();
        let snapshot = snapshot.clone();
        let restore = move || FleetService::restore_snapshot(&svc, &snapshot);
        flatten_blocking(tokio::task::spawn_blocking(restore).await)
    }
}

fn flatten_blocking<T>(result: Result<Result<T>, tokio::task::JoinError>) -> Result<T, SyncError> {
    match result {
        Ok(inner) => inner.map_err(|e| SyncError::local(&e)),
        Err(e) => Err(SyncError::LocalStore(format!("blocking task failed: {e}"))),
    }
}
