use std::path::Path;

use anyhow::{Context, Result, bail};
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params};

use crate::models::{
    FuelRecord, MaintenanceRecord, MaintenanceType, NewFuelRecord, NewMaintenance,
    NewOdometerRecord, OdometerRecord, Record, Settings, Snapshot, Vehicle, VehicleType,
    default_vehicles,
};
use crate::schema;

#[must_use]
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Id-bearing collections. Each has its own allocator sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Collection {
    Vehicles,
    OdometerRecords,
    FuelRecords,
    MaintenanceRecords,
}

impl Collection {
    #[must_use]
    pub fn table(self) -> &'static str {
        match self {
            Self::Vehicles => "vehicles",
            Self::OdometerRecords => "odometer_records",
            Self::FuelRecords => "fuel_records",
            Self::MaintenanceRecords => "maintenance_records",
        }
    }
}

pub struct Database {
    conn: Connection,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database: {}", path.display()))?;
        schema::migrate(&conn)?;
        Ok(Database { conn })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        schema::migrate(&conn)?;
        Ok(Database { conn })
    }

    /// Run `f` inside one transaction. Nothing is committed if `f` fails.
    pub(crate) fn in_transaction<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let tx = self.conn.unchecked_transaction()?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }

    // --- Vehicles ---

    pub fn add_vehicle(&self, name: &str, vehicle_type: VehicleType) -> Result<Vehicle> {
        self.in_transaction(|conn| {
            let vehicle = Vehicle {
                id: next_id(conn, Collection::Vehicles)?,
                name: name.to_string(),
                vehicle_type,
            };
            insert_vehicle(conn, &vehicle)?;
            touch(conn)?;
            Ok(vehicle)
        })
    }

    pub fn rename_vehicle(&self, id: i64, name: &str) -> Result<Vehicle> {
        self.in_transaction(|conn| {
            let changed = conn.execute(
                "UPDATE vehicles SET name = ?1 WHERE id = ?2",
                params![name, id],
            )?;
            if changed == 0 {
                bail!("Vehicle not found: {id}");
            }
            touch(conn)?;
            get_vehicle(conn, id)?.with_context(|| format!("Vehicle not found: {id}"))
        })
    }

    pub fn get_vehicle(&self, id: i64) -> Result<Option<Vehicle>> {
        get_vehicle(&self.conn, id)
    }

    pub fn list_vehicles(&self) -> Result<Vec<Vehicle>> {
        list_vehicles(&self.conn)
    }

    pub fn count_vehicles(&self) -> Result<i64> {
        count_vehicles(&self.conn)
    }

    /// Seed the default vehicles when the store has none. Returns whether it seeded.
    pub fn ensure_default_vehicles(&self) -> Result<bool> {
        self.in_transaction(|conn| {
            if count_vehicles(conn)? > 0 {
                return Ok(false);
            }
            for mut vehicle in default_vehicles() {
                vehicle.id = next_id(conn, Collection::Vehicles)?;
                insert_vehicle(conn, &vehicle)?;
            }
            touch(conn)?;
            Ok(true)
        })
    }

    // --- Records ---

    pub fn add_odometer(&self, entry: &NewOdometerRecord) -> Result<OdometerRecord> {
        self.in_transaction(|conn| {
            let record = OdometerRecord {
                id: next_id(conn, Collection::OdometerRecords)?,
                vehicle_id: entry.vehicle_id,
                date_epoch_day: entry.date_epoch_day,
                odometer_km: entry.odometer_km,
            };
            insert_odometer(conn, &record)?;
            touch(conn)?;
            Ok(record)
        })
    }

    pub fn add_fuel(&self, entry: &NewFuelRecord) -> Result<FuelRecord> {
        self.in_transaction(|conn| {
            let record = FuelRecord {
                id: next_id(conn, Collection::FuelRecords)?,
                vehicle_id: entry.vehicle_id,
                date_epoch_day: entry.date_epoch_day,
                odometer_km: entry.odometer_km,
                liters: entry.liters,
                price_per_liter: entry.price_per_liter,
            };
            insert_fuel(conn, &record)?;
            touch(conn)?;
            Ok(record)
        })
    }

    pub fn add_maintenance(&self, entry: &NewMaintenance) -> Result<MaintenanceRecord> {
        self.in_transaction(|conn| {
            let record = MaintenanceRecord {
                id: next_id(conn, Collection::MaintenanceRecords)?,
                vehicle_id: entry.vehicle_id,
                maintenance_type: entry.maintenance_type,
                title: entry.title.trim().to_string(),
                notes: entry.notes.clone(),
                created_at_epoch_day: entry.created_at_epoch_day,
                due_date_epoch_day: entry.due_date_epoch_day,
                due_odometer_km: entry.due_odometer_km,
                estimated_cost: entry.estimated_cost,
                done: false,
            };
            insert_maintenance(conn, &record)?;
            touch(conn)?;
            Ok(record)
        })
    }

    pub fn set_maintenance_done(&self, id: i64, done: bool) -> Result<MaintenanceRecord> {
        self.in_transaction(|conn| {
            let changed = conn.execute(
                "UPDATE maintenance_records SET done = ?1 WHERE id = ?2",
                params![done, id],
            )?;
            if changed == 0 {
                bail!("Maintenance record not found: {id}");
            }
            touch(conn)?;
            conn.query_row(
                &format!("{MAINTENANCE_SELECT} WHERE id = ?1"),
                params![id],
                maintenance_from_row,
            )
            .context("Failed to reload maintenance record")
        })
    }

    pub fn list_odometer_records(&self) -> Result<Vec<OdometerRecord>> {
        list_odometer_records(&self.conn)
    }

    pub fn list_fuel_records(&self) -> Result<Vec<FuelRecord>> {
        list_fuel_records(&self.conn)
    }

    pub fn list_maintenance_records(&self) -> Result<Vec<MaintenanceRecord>> {
        list_maintenance_records(&self.conn)
    }

    // --- Settings ---

    pub fn get_settings(&self) -> Result<Settings> {
        read_settings(&self.conn)
    }

    /// Theme is a device preference and does not move the data marker.
    pub fn set_dark_theme(&self, enabled: bool) -> Result<()> {
        self.conn.execute(
            "UPDATE settings SET dark_theme_enabled = ?1 WHERE id = 1",
            params![enabled],
        )?;
        Ok(())
    }

    // --- Snapshot ---

    pub fn snapshot(&self) -> Result<Snapshot> {
        self.in_transaction(|conn| {
            let settings = read_settings(conn)?;
            let updated_at_millis = if settings.data_updated_at_millis > 0 {
                settings.data_updated_at_millis
            } else {
                now_millis()
            };
            Ok(Snapshot {
                vehicles: list_vehicles(conn)?,
                odometer_records: list_odometer_records(conn)?,
                fuel_records: list_fuel_records(conn)?,
                maintenance_records: list_maintenance_records(conn)?,
                updated_at_millis,
            })
        })
        .context("Failed to read local snapshot")
    }

    /// Replace all four collections with the snapshot's, atomically.
    pub fn restore_snapshot(&self, snapshot: &Snapshot) -> Result<()> {
        self.in_transaction(|conn| {
            conn.execute_batch(
                "DELETE FROM vehicles;
                 DELETE FROM odometer_records;
                 DELETE FROM fuel_records;
                 DELETE FROM maintenance_records;",
            )?;
            insert_snapshot_records(conn, snapshot)?;

            let mut settings = read_settings(conn)?;
            settings.data_updated_at_millis = if snapshot.updated_at_millis > 0 {
                snapshot.updated_at_millis
            } else {
                now_millis()
            };
            settings.legacy_import_done = true;
            write_settings(conn, &settings)
        })
        .context("Failed to restore snapshot")
    }
}

// --- Connection-level helpers, shared with the legacy importer ---

pub(crate) fn insert_snapshot_records(conn: &Connection, snapshot: &Snapshot) -> Result<()> {
    for vehicle in &snapshot.vehicles {
        insert_vehicle(conn, vehicle)?;
    }
    for record in &snapshot.odometer_records {
        insert_odometer(conn, record)?;
    }
    for record in &snapshot.fuel_records {
        insert_fuel(conn, record)?;
    }
    for record in &snapshot.maintenance_records {
        insert_maintenance(conn, record)?;
    }
    note_issued(conn, Collection::Vehicles, max_id(&snapshot.vehicles))?;
    note_issued(conn, Collection::OdometerRecords, max_id(&snapshot.odometer_records))?;
    note_issued(conn, Collection::FuelRecords, max_id(&snapshot.fuel_records))?;
    note_issued(
        conn,
        Collection::MaintenanceRecords,
        max_id(&snapshot.maintenance_records),
    )?;
    Ok(())
}

fn max_id<T: Record>(items: &[T]) -> i64 {
    items.iter().map(Record::id).max().unwrap_or(0)
}

/// Allocate the next id: one past both the highest id ever issued and the highest present.
pub(crate) fn next_id(conn: &Connection, collection: Collection) -> Result<i64> {
    let id: i64 = conn.query_row(
        &format!(
            "SELECT MAX(
                COALESCE((SELECT last_id FROM id_sequences WHERE collection = ?1), 0),
                COALESCE((SELECT MAX(id) FROM {}), 0)
             ) + 1",
            collection.table()
        ),
        params![collection.table()],
        |row| row.get(0),
    )?;
    note_issued(conn, collection, id)?;
    Ok(id)
}

fn note_issued(conn: &Connection, collection: Collection, id: i64) -> Result<()> {
    if id <= 0 {
        return Ok(());
    }
    conn.execute(
        "INSERT INTO id_sequences (collection, last_id) VALUES (?1, ?2)
         ON CONFLICT(collection) DO UPDATE SET last_id = MAX(last_id, excluded.last_id)",
        params![collection.table(), id],
    )?;
    Ok(())
}

/// Move the data marker forward. It never decreases, even if the clock does.
pub(crate) fn touch(conn: &Connection) -> Result<()> {
    conn.execute(
        "UPDATE settings SET data_updated_at_millis = MAX(data_updated_at_millis + 1, ?1) WHERE id = 1",
        params![now_millis()],
    )?;
    Ok(())
}

pub(crate) fn read_settings(conn: &Connection) -> Result<Settings> {
    let settings = conn
        .query_row(
            "SELECT dark_theme_enabled, legacy_import_done, data_updated_at_millis
             FROM settings WHERE id = 1",
            [],
            |row| {
                Ok(Settings {
                    dark_theme_enabled: row.get(0)?,
                    legacy_import_done: row.get(1)?,
                    data_updated_at_millis: row.get(2)?,
                })
            },
        )
        .optional()?;
    Ok(settings.unwrap_or(Settings {
        dark_theme_enabled: true,
        legacy_import_done: false,
        data_updated_at_millis: 0,
    }))
}

pub(crate) fn write_settings(conn: &Connection, settings: &Settings) -> Result<()> {
    conn.execute(
        "INSERT INTO settings (id, dark_theme_enabled, legacy_import_done, data_updated_at_millis)
         VALUES (1, ?1, ?2, ?3)
         ON CONFLICT(id) DO UPDATE SET
            dark_theme_enabled = excluded.dark_theme_enabled,
            legacy_import_done = excluded.legacy_import_done,
            data_updated_at_millis = excluded.data_updated_at_millis",
        params![
            settings.dark_theme_enabled,
            settings.legacy_import_done,
            settings.data_updated_at_millis
        ],
    )?;
    Ok(())
}

pub(crate) fn count_vehicles(conn: &Connection) -> Result<i64> {
    Ok(conn.query_row("SELECT COUNT(*) FROM vehicles", [], |row| row.get(0))?)
}

fn insert_vehicle(conn: &Connection, vehicle: &Vehicle) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO vehicles (id, name, type) VALUES (?1, ?2, ?3)",
        params![vehicle.id, vehicle.name, vehicle.vehicle_type.as_str()],
    )?;
    Ok(())
}

fn insert_odometer(conn: &Connection, record: &OdometerRecord) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO odometer_records (id, vehicle_id, date_epoch_day, odometer_km)
         VALUES (?1, ?2, ?3, ?4)",
        params![
            record.id,
            record.vehicle_id,
            record.date_epoch_day,
            record.odometer_km
        ],
    )?;
    Ok(())
}

fn insert_fuel(conn: &Connection, record: &FuelRecord) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO fuel_records
         (id, vehicle_id, date_epoch_day, odometer_km, liters, price_per_liter)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            record.id,
            record.vehicle_id,
            record.date_epoch_day,
            record.odometer_km,
            record.liters,
            record.price_per_liter
        ],
    )?;
    Ok(())
}

fn insert_maintenance(conn: &Connection, record: &MaintenanceRecord) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO maintenance_records
         (id, vehicle_id, type, title, notes, created_at_epoch_day,
          due_date_epoch_day, due_odometer_km, estimated_cost, done)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            record.id,
            record.vehicle_id,
            record.maintenance_type.as_str(),
            record.title,
            record.notes,
            record.created_at_epoch_day,
            record.due_date_epoch_day,
            record.due_odometer_km,
            record.estimated_cost,
            record.done
        ],
    )?;
    Ok(())
}

fn get_vehicle(conn: &Connection, id: i64) -> Result<Option<Vehicle>> {
    Ok(conn
        .query_row(
            "SELECT id, name, type FROM vehicles WHERE id = ?1",
            params![id],
            vehicle_from_row,
        )
        .optional()?)
}

fn list_vehicles(conn: &Connection) -> Result<Vec<Vehicle>> {
    let mut stmt = conn.prepare("SELECT id, name, type FROM vehicles ORDER BY id ASC")?;
    let rows = stmt
        .query_map([], vehicle_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

fn list_odometer_records(conn: &Connection) -> Result<Vec<OdometerRecord>> {
    let mut stmt = conn.prepare(
        "SELECT id, vehicle_id, date_epoch_day, odometer_km FROM odometer_records
         ORDER BY date_epoch_day DESC, id DESC",
    )?;
    let rows = stmt
        .query_map([], |row| {
            Ok(OdometerRecord {
                id: row.get(0)?,
                vehicle_id: row.get(1)?,
                date_epoch_day: row.get(2)?,
                odometer_km: row.get(3)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

fn list_fuel_records(conn: &Connection) -> Result<Vec<FuelRecord>> {
    let mut stmt = conn.prepare(
        "SELECT id, vehicle_id, date_epoch_day, odometer_km, liters, price_per_liter
         FROM fuel_records ORDER BY date_epoch_day DESC, id DESC",
    )?;
    let rows = stmt
        .query_map([], |row| {
            Ok(FuelRecord {
                id: row.get(0)?,
                vehicle_id: row.get(1)?,
                date_epoch_day: row.get(2)?,
                odometer_km: row.get(3)?,
                liters: row.get(4)?,
                price_per_liter: row.get(5)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

const MAINTENANCE_SELECT: &str = "SELECT id, vehicle_id, type, title, notes, created_at_epoch_day,
    due_date_epoch_day, due_odometer_km, estimated_cost, done FROM maintenance_records";

fn list_maintenance_records(conn: &Connection) -> Result<Vec<MaintenanceRecord>> {
    let mut stmt = conn.prepare(&format!(
        "{MAINTENANCE_SELECT}
         ORDER BY done ASC, COALESCE(due_date_epoch_day, 9223372036854775807) ASC, id ASC"
    ))?;
    let rows = stmt
        .query_map([], maintenance_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

// Unknown stored enum values fall back rather than failing the whole read.
fn vehicle_from_row(row: &rusqlite::Row) -> rusqlite::Result<Vehicle> {
    let kind: String = row.get(2)?;
    Ok(Vehicle {
        id: row.get(0)?,
        name: row.get(1)?,
        vehicle_type: VehicleType::parse(&kind).unwrap_or(VehicleType::Car),
    })
}

fn maintenance_from_row(row: &rusqlite::Row) -> rusqlite::Result<MaintenanceRecord> {
    let kind: String = row.get(2)?;
    Ok(MaintenanceRecord {
        id: row.get(0)?,
        vehicle_id: row.get(1)?,
        maintenance_type: MaintenanceType::parse(&kind).unwrap_or(MaintenanceType::Other),
        title: row.get(3)?,
        notes: row.get(4)?,
        created_at_epoch_day: row.get(5)?,
        due_date_epoch_day: row.get(6)?,
        due_odometer_km: row.get(7)?,
        estimated_cost: row.get(8)?,
        done: row.get(9)?,
    })
}
