//! One-time import of the legacy flat key-value store.
//!
//! The legacy store kept each collection as a serialized JSON array under a fixed key
//! (`vehicles`, `odometer_records`, `fuel_records`, `maintenance_records`) plus two
//! scalars (`dark_theme_enabled`, `data_updated_at`). The import runs at most once
//! effectively: the `legacy_import_done` flag is written in the same transaction as the
//! imported rows, so a failed run leaves it unset and the next startup retries.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::db::{self, Database};
use crate::error::SyncError;
use crate::models::{
    FuelRecord, MaintenanceRecord, OdometerRecord, Snapshot, Vehicle, default_vehicles,
};
use crate::remote::{
    FuelEntry, MaintenanceEntry, OdometerEntry, VehicleEntry, maintenance_type_or_other,
    parse_entries, vehicle_type_or_car,
};

pub const KEY_VEHICLES: &str = "vehicles";
pub const KEY_ODOMETER_RECORDS: &str = "odometer_records";
pub const KEY_FUEL_RECORDS: &str = "fuel_records";
pub const KEY_MAINTENANCE_RECORDS: &str = "maintenance_records";
pub const KEY_DARK_THEME: &str = "dark_theme_enabled";
pub const KEY_DATA_UPDATED_AT: &str = "data_updated_at";

/// Read access to the legacy flat store.
pub trait LegacySnapshotSource: Send + Sync {
    fn read_snapshot(&self) -> Result<Snapshot>;
    fn read_dark_theme(&self, default: bool) -> bool;
}

/// Legacy store persisted as one JSON object of key/value pairs.
///
/// Collection values may be either a JSON array or a string holding a serialized
/// array. Entries without a positive id or vehicle id are skipped.
#[derive(Debug, Clone)]
pub struct JsonLegacyStore {
    path: Option<PathBuf>,
    inline: Option<Map<String, Value>>,
}

impl JsonLegacyStore {
    /// A store backed by a file. A missing file reads as an empty store.
    #[must_use]
    pub fn new(path: &Path) -> Self {
        JsonLegacyStore {
            path: Some(path.to_path_buf()),
            inline: None,
        }
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let values: Map<String, Value> =
            serde_json::from_str(json).context("Legacy store is not a JSON object")?;
        Ok(JsonLegacyStore {
            path: None,
            inline: Some(values),
        })
    }

    fn load(&self) -> Result<Map<String, Value>> {
        if let Some(values) = &self.inline {
            return Ok(values.clone());
        }
        let Some(path) = &self.path else {
            return Ok(Map::new());
        };
        if !path.exists() {
            return Ok(Map::new());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read legacy store: {}", path.display()))?;
        if content.trim().is_empty() {
            return Ok(Map::new());
        }
        serde_json::from_str(&content)
            .with_context(|| format!("Legacy store is not a JSON object: {}", path.display()))
    }
}

fn collection<T: DeserializeOwned>(values: &Map<String, Value>, key: &str) -> Vec<T> {
    let raw = match values.get(key) {
        Some(Value::Array(items)) => items.clone(),
        Some(Value::String(text)) if !text.trim().is_empty() => {
            match serde_json::from_str::<Vec<Value>>(text) {
                Ok(items) => items,
                Err(e) => {
                    warn!(key, error = %e, "legacy collection is not a JSON array");
                    Vec::new()
                }
            }
        }
        _ => Vec::new(),
    };
    parse_entries(raw)
}

fn scalar_i64(value: Option<&Value>) -> Option<i64> {
    match value? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn scalar_bool(value: Option<&Value>) -> Option<bool> {
    match value? {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_i64().map(|n| n != 0),
        Value::String(s) => match s.trim() {
            "true" | "1" => Some(true),
            "false" | "0" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn positive(id: Option<i64>) -> Option<i64> {
    id.filter(|id| *id > 0)
}

fn non_blank_or(value: Option<String>, fallback: &str) -> String {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| fallback.to_string())
}

fn legacy_vehicle(entry: VehicleEntry) -> Option<Vehicle> {
    Some(Vehicle {
        id: positive(entry.id)?,
        name: non_blank_or(entry.name, "Vehicle"),
        vehicle_type: vehicle_type_or_car(entry.vehicle_type.as_deref()),
    })
}

fn legacy_odometer(entry: OdometerEntry) -> Option<OdometerRecord> {
    Some(OdometerRecord {
        id: positive(entry.id)?,
        vehicle_id: positive(entry.vehicle_id)?,
        date_epoch_day: entry.date_epoch_day.unwrap_or(0),
        odometer_km: entry.odometer_km.unwrap_or(0.0),
    })
}

fn legacy_fuel(entry: FuelEntry) -> Option<FuelRecord> {
    Some(FuelRecord {
        id: positive(entry.id)?,
        vehicle_id: positive(entry.vehicle_id)?,
        date_epoch_day: entry.date_epoch_day.unwrap_or(0),
        odometer_km: entry.odometer_km.unwrap_or(0.0),
        liters: entry.liters.unwrap_or(0.0),
        price_per_liter: entry.price_per_liter.unwrap_or(0.0),
    })
}

fn legacy_maintenance(entry: MaintenanceEntry) -> Option<MaintenanceRecord> {
    Some(MaintenanceRecord {
        id: positive(entry.id)?,
        vehicle_id: positive(entry.vehicle_id)?,
        maintenance_type: maintenance_type_or_other(entry.maintenance_type.as_deref()),
        title: non_blank_or(entry.title, "Maintenance"),
        notes: entry.notes.unwrap_or_default(),
        created_at_epoch_day: entry.created_at_epoch_day.unwrap_or(0),
        due_date_epoch_day: entry.due_date_epoch_day,
        due_odometer_km: entry.due_odometer_km,
        estimated_cost: entry.estimated_cost,
        done: entry.done.unwrap_or(false),
    })
}

impl LegacySnapshotSource for JsonLegacyStore {
    fn read_snapshot(&self) -> Result<Snapshot> {
        let values = self.load()?;
        Ok(Snapshot {
            vehicles: collection(&values, KEY_VEHICLES)
                .into_iter()
                .filter_map(legacy_vehicle)
                .collect(),
            odometer_records: collection(&values, KEY_ODOMETER_RECORDS)
                .into_iter()
                .filter_map(legacy_odometer)
                .collect(),
            fuel_records: collection(&values, KEY_FUEL_RECORDS)
                .into_iter()
                .filter_map(legacy_fuel)
                .collect(),
            maintenance_records: collection(&values, KEY_MAINTENANCE_RECORDS)
                .into_iter()
                .filter_map(legacy_maintenance)
                .collect(),
            updated_at_millis: scalar_i64(values.get(KEY_DATA_UPDATED_AT)).unwrap_or(0),
        })
    }

    fn read_dark_theme(&self, default: bool) -> bool {
        match self.load() {
            Ok(values) => scalar_bool(values.get(KEY_DARK_THEME)).unwrap_or(default),
            Err(e) => {
                warn!(error = %e, "could not read legacy theme preference");
                default
            }
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct LegacyImportSummary {
    pub vehicles: usize,
    pub odometer_records: usize,
    pub fuel_records: usize,
    pub maintenance_records: usize,
    pub seeded_default_vehicles: bool,
    /// The store already had vehicles, so only settings were migrated.
    pub settings_only: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ImportOutcome {
    AlreadyDone,
    Imported(LegacyImportSummary),
}

pub struct LegacyImporter<'a> {
    db: &'a Database,
    source: &'a dyn LegacySnapshotSource,
}

impl<'a> LegacyImporter<'a> {
    pub fn new(db: &'a Database, source: &'a dyn LegacySnapshotSource) -> Self {
        LegacyImporter { db, source }
    }

    /// Safe to call on every startup.
    pub fn import_if_needed(&self) -> Result<ImportOutcome> {
        let settings = self.db.get_settings()?;
        if settings.legacy_import_done {
            debug!("legacy import already done");
            return Ok(ImportOutcome::AlreadyDone);
        }

        let legacy = self
            .source
            .read_snapshot()
            .context("Failed to read legacy store")
            .map_err(migration_failed)?;
        let dark_theme = self.source.read_dark_theme(settings.dark_theme_enabled);

        let summary = self
            .db
            .in_transaction(|conn| {
                let mut summary = LegacyImportSummary::default();
                if db::count_vehicles(conn)? == 0 {
                    let mut incoming = legacy.clone();
                    if incoming.vehicles.is_empty() {
                        incoming.vehicles = default_vehicles();
                        summary.seeded_default_vehicles = true;
                    }
                    db::insert_snapshot_records(conn, &incoming)?;
                    summary.vehicles = incoming.vehicles.len();
                    summary.odometer_records = incoming.odometer_records.len();
                    summary.fuel_records = incoming.fuel_records.len();
                    summary.maintenance_records = incoming.maintenance_records.len();
                } else {
                    summary.settings_only = true;
                }

                let mut current = db::read_settings(conn)?;
                let marker = current
                    .data_updated_at_millis
                    .max(legacy.updated_at_millis);
                current.data_updated_at_millis = if marker > 0 {
                    marker
                } else {
                    db::now_millis()
                };
                current.dark_theme_enabled = dark_theme;
                current.legacy_import_done = true;
                db::write_settings(conn, &current)?;
                Ok(summary)
            })
            .context("Legacy import transaction failed")
            .map_err(migration_failed)?;

        info!(
            vehicles = summary.vehicles,
            odometer = summary.odometer_records,
            fuel = summary.fuel_records,
            maintenance = summary.maintenance_records,
            seeded_defaults = summary.seeded_default_vehicles,
            settings_only = summary.settings_only,
            "legacy import complete"
        );
        Ok(ImportOutcome::Imported(summary))
    }
}

fn migration_failed(err: anyhow::Error) -> anyhow::Error {
    anyhow::Error::new(SyncError::MigrationFailed(format!("{err:#}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::VehicleType;

    const LEGACY_JSON: &str = r#"{
        "vehicles": "[{\"id\":1,\"name\":\"Civic\",\"type\":\"CAR\"},{\"id\":2,\"name\":\"  \",\"type\":\"BOAT\"},{\"id\":0,\"name\":\"Ghost\"}]",
        "odometer_records": [
            {"id": 1, "vehicleId": 1, "dateEpochDay": 19000, "odometerKm": 1500},
            {"id": 2, "vehicleId": 0, "dateEpochDay": 19001, "odometerKm": 1600}
        ],
        "fuel_records": "[{\"id\":1,\"vehicleId\":1,\"dateEpochDay\":19002,\"odometerKm\":1550,\"liters\":40,\"pricePerLiter\":5.8}]",
        "maintenance_records": [{"id": 1, "vehicleId": 1, "type": "OIL_CHANGE", "title": " ", "dueDateEpochDay": 19100}],
        "dark_theme_enabled": false,
        "data_updated_at": "123456"
    }"#;

    struct FailingSource;

    impl LegacySnapshotSource for FailingSource {
        fn read_snapshot(&self) -> Result<Snapshot> {
            anyhow::bail!("storage unavailable")
        }

        fn read_dark_theme(&self, default: bool) -> bool {
            default
        }
    }

    #[test]
    fn test_reads_legacy_shapes_and_applies_defaults() {
        let store = JsonLegacyStore::from_json(LEGACY_JSON).unwrap();
        let snapshot = store.read_snapshot().unwrap();

        assert_eq!(snapshot.vehicles.len(), 2);
        assert_eq!(snapshot.vehicles[1].name, "Vehicle");
        assert_eq!(snapshot.vehicles[1].vehicle_type, VehicleType::Car);
        assert_eq!(snapshot.odometer_records.len(), 1);
        assert_eq!(snapshot.fuel_records.len(), 1);
        assert_eq!(snapshot.maintenance_records[0].title, "Maintenance");
        assert_eq!(snapshot.maintenance_records[0].due_date_epoch_day, Some(19100));
        assert_eq!(snapshot.updated_at_millis, 123_456);
        assert!(!store.read_dark_theme(true));
    }

    #[test]
    fn test_missing_file_reads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonLegacyStore::new(&dir.path().join("absent.json"));
        let snapshot = store.read_snapshot().unwrap();
        assert_eq!(snapshot.record_count(), 0);
        assert!(store.read_dark_theme(true));
    }

    #[test]
    fn test_corrupt_collection_string_is_skipped() {
        let store = JsonLegacyStore::from_json(r#"{"vehicles": "not json"}"#).unwrap();
        assert!(store.read_snapshot().unwrap().vehicles.is_empty());
    }

    #[test]
    fn test_import_into_empty_store() {
        let db = Database::open_in_memory().unwrap();
        let store = JsonLegacyStore::from_json(LEGACY_JSON).unwrap();
        let outcome = LegacyImporter::new(&db, &store).import_if_needed().unwrap();

        let ImportOutcome::Imported(summary) = outcome else {
            panic!("expected import");
        };
        assert_eq!(summary.vehicles, 2);
        assert!(!summary.seeded_default_vehicles);
        assert_eq!(db.count_vehicles().unwrap(), 2);
        assert_eq!(db.list_fuel_records().unwrap().len(), 1);

        let settings = db.get_settings().unwrap();
        assert!(settings.legacy_import_done);
        assert!(!settings.dark_theme_enabled);
        assert_eq!(settings.data_updated_at_millis, 123_456);
    }

    #[test]
    fn test_import_twice_is_idempotent() {
        let db = Database::open_in_memory().unwrap();
        let store = JsonLegacyStore::from_json(LEGACY_JSON).unwrap();
        LegacyImporter::new(&db, &store).import_if_needed().unwrap();
        let first = db.snapshot().unwrap();

        let outcome = LegacyImporter::new(&db, &store).import_if_needed().unwrap();
        assert!(matches!(outcome, ImportOutcome::AlreadyDone));
        let second = db.snapshot().unwrap();
        assert!(first.equivalent(&second));
        assert_eq!(first.updated_at_millis, second.updated_at_millis);
        assert!(db.get_settings().unwrap().legacy_import_done);
    }

    #[test]
    fn test_empty_legacy_seeds_default_vehicles() {
        let db = Database::open_in_memory().unwrap();
        let store = JsonLegacyStore::from_json("{}").unwrap();
        let outcome = LegacyImporter::new(&db, &store).import_if_needed().unwrap();
        let ImportOutcome::Imported(summary) = outcome else {
            panic!("expected import");
        };
        assert!(summary.seeded_default_vehicles);

        let vehicles = db.list_vehicles().unwrap();
        assert_eq!(vehicles.len(), 2);
        assert_eq!(vehicles[0].vehicle_type, VehicleType::Car);
        assert_eq!(vehicles[1].vehicle_type, VehicleType::Motorcycle);
        assert!(db.get_settings().unwrap().data_updated_at_millis > 0);
    }

    #[test]
    fn test_existing_vehicles_only_migrate_settings() {
        let db = Database::open_in_memory().unwrap();
        db.add_vehicle("Already here", VehicleType::Car).unwrap();
        let before = db.get_settings().unwrap().data_updated_at_millis;

        let store = JsonLegacyStore::from_json(LEGACY_JSON).unwrap();
        let outcome = LegacyImporter::new(&db, &store).import_if_needed().unwrap();
        let ImportOutcome::Imported(summary) = outcome else {
            panic!("expected import");
        };
        assert!(summary.settings_only);
        assert_eq!(db.count_vehicles().unwrap(), 1);
        assert!(db.list_odometer_records().unwrap().is_empty());

        let settings = db.get_settings().unwrap();
        assert!(!settings.dark_theme_enabled);
        assert_eq!(settings.data_updated_at_millis, before.max(123_456));
    }

    #[test]
    fn test_failed_read_leaves_flag_unset() {
        let db = Database::open_in_memory().unwrap();
        let err = LegacyImporter::new(&db, &FailingSource)
            .import_if_needed()
            .unwrap_err();
        assert!(format!("{err:#}").contains("storage unavailable"));
        assert!(matches!(
            err.downcast_ref::<SyncError>(),
            Some(SyncError::MigrationFailed(_))
        ));
        assert!(!db.get_settings().unwrap().legacy_import_done);
        assert_eq!(db.count_vehicles().unwrap(), 0);
    }

    #[test]
    fn test_aborted_import_rolls_back_everything() {
        let db = Database::open_in_memory().unwrap();
        // Settings are written last, after every record insert.
        db.in_transaction(|conn| {
            conn.execute_batch(
                "CREATE TRIGGER block_settings_insert BEFORE INSERT ON settings
                 BEGIN SELECT RAISE(ABORT, 'settings locked'); END;
                 CREATE TRIGGER block_settings_update BEFORE UPDATE ON settings
                 BEGIN SELECT RAISE(ABORT, 'settings locked'); END;",
            )?;
            Ok(())
        })
        .unwrap();
        let store = JsonLegacyStore::from_json(LEGACY_JSON).unwrap();

        let err = LegacyImporter::new(&db, &store).import_if_needed().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<SyncError>(),
            Some(SyncError::MigrationFailed(msg)) if msg.contains("settings locked")
        ));
        assert_eq!(db.count_vehicles().unwrap(), 0);
        assert!(db.list_odometer_records().unwrap().is_empty());
        assert!(db.list_fuel_records().unwrap().is_empty());
        assert!(db.list_maintenance_records().unwrap().is_empty());
        assert!(!db.get_settings().unwrap().legacy_import_done);

        db.in_transaction(|conn| {
            conn.execute_batch(
                "DROP TRIGGER block_settings_insert;
                 DROP TRIGGER block_settings_update;",
            )?;
            Ok(())
        })
        .unwrap();
        let outcome = LegacyImporter::new(&db, &store).import_if_needed().unwrap();
        assert!(matches!(outcome, ImportOutcome::Imported(_)));
        assert_eq!(db.count_vehicles().unwrap(), 2);
        assert_eq!(db.list_fuel_records().unwrap().len(), 1);
        assert!(db.get_settings().unwrap().legacy_import_done);
    }
}
