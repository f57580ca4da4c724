//! Structural upgrades of the local store.
//!
//! Version 1 kept snake_case tables with short column names and a `meta(key, long_value)`
//! table for flags. Version 2 is the current layout. Every table is rebuilt the same way:
//! the old table is renamed out of the way, the new definition is created, each column is
//! copied from the first source column that exists (or a literal default when none does),
//! and the renamed table is dropped. A store with no tables at all goes through the same
//! path and simply ends up with empty tables.

use anyhow::{Context, Result};
use rusqlite::Connection;
use tracing::{debug, info};

use crate::error::SyncError;

pub const SCHEMA_VERSION: i64 = 2;

const LEGACY_SUFFIX: &str = "_legacy_v1";

struct Column {
    name: &'static str,
    sources: &'static [&'static str],
    /// SQL literal used when no source column exists or the value is NULL.
    fallback: &'static str,
}

const fn col(
    name: &'static str,
    sources: &'static [&'static str],
    fallback: &'static str,
) -> Column {
    Column {
        name,
        sources,
        fallback,
    }
}

impl Column {
    fn select_expr(&self, present: &[String]) -> String {
        let source = self
            .sources
            .iter()
            .find(|s| present.iter().any(|p| p.eq_ignore_ascii_case(s)));
        match source {
            Some(source) if self.fallback == "NULL" => (*source).to_string(),
            Some(source) => format!("COALESCE({source}, {})", self.fallback),
            None => self.fallback.to_string(),
        }
    }
}

struct Table {
    name: &'static str,
    create: &'static str,
    indexes: &'static str,
    columns: &'static [Column],
}

const VEHICLES: Table = Table {
    name: "vehicles",
    create: "CREATE TABLE vehicles (
        id INTEGER PRIMARY KEY,
        name TEXT NOT NULL,
        type TEXT NOT NULL
    )",
    indexes: "",
    columns: &[
        col("id", &["id"], "rowid"),
        col("name", &["name"], "'Vehicle'"),
        col("type", &["type", "vehicle_type", "vehicleType"], "'CAR'"),
    ],
};

const ODOMETER_RECORDS: Table = Table {
    name: "odometer_records",
    create: "CREATE TABLE odometer_records (
        id INTEGER PRIMARY KEY,
        vehicle_id INTEGER NOT NULL,
        date_epoch_day INTEGER NOT NULL,
        odometer_km REAL NOT NULL
    )",
    indexes: "CREATE INDEX IF NOT EXISTS idx_odometer_vehicle_date
        ON odometer_records(vehicle_id, date_epoch_day);",
    columns: &[
        col("id", &["id"], "rowid"),
        col("vehicle_id", &["vehicle_id", "vehicleId"], "1"),
        col("date_epoch_day", &["date_epoch_day", "dateEpochDay", "date"], "0"),
        col("odometer_km", &["odometer_km", "odometerKm", "km"], "0"),
    ],
};

const FUEL_RECORDS: Table = Table {
    name: "fuel_records",
    create: "CREATE TABLE fuel_records (
        id INTEGER PRIMARY KEY,
        vehicle_id INTEGER NOT NULL,
        date_epoch_day INTEGER NOT NULL,
        odometer_km REAL NOT NULL,
        liters REAL NOT NULL,
        price_per_liter REAL NOT NULL
    )",
    indexes: "CREATE INDEX IF NOT EXISTS idx_fuel_vehicle_date
        ON fuel_records(vehicle_id, date_epoch_day);",
    columns: &[
        col("id", &["id"], "rowid"),
        col("vehicle_id", &["vehicle_id", "vehicleId"], "1"),
        col("date_epoch_day", &["date_epoch_day", "dateEpochDay", "date"], "0"),
        col("odometer_km", &["odometer_km", "odometerKm", "km"], "0"),
        col("liters", &["liters"], "0"),
        col(
            "price_per_liter",
            &["price_per_liter", "pricePerLiter", "price"],
            "0",
        ),
    ],
};

const MAINTENANCE_RECORDS: Table = Table {
    name: "maintenance_records",
    create: "CREATE TABLE maintenance_records (
        id INTEGER PRIMARY KEY,
        vehicle_id INTEGER NOT NULL,
        type TEXT NOT NULL,
        title TEXT NOT NULL,
        notes TEXT NOT NULL,
        created_at_epoch_day INTEGER NOT NULL,
        due_date_epoch_day INTEGER,
        due_odometer_km REAL,
        estimated_cost REAL,
        done INTEGER NOT NULL DEFAULT 0
    )",
    indexes: "CREATE INDEX IF NOT EXISTS idx_maintenance_vehicle
        ON maintenance_records(vehicle_id);",
    columns: &[
        col("id", &["id"], "rowid"),
        col("vehicle_id", &["vehicle_id", "vehicleId"], "1"),
        col("type", &["type", "maintenance_type"], "'OTHER'"),
        col("title", &["title"], "''"),
        col("notes", &["notes"], "''"),
        col(
            "created_at_epoch_day",
            &["created_at_epoch_day", "createdAtEpochDay", "created_at"],
            "0",
        ),
        col(
            "due_date_epoch_day",
            &["due_date_epoch_day", "dueDateEpochDay", "due_date"],
            "NULL",
        ),
        col(
            "due_odometer_km",
            &["due_odometer_km", "dueOdometerKm", "due_km"],
            "NULL",
        ),
        col(
            "estimated_cost",
            &["estimated_cost", "estimatedCost", "cost"],
            "NULL",
        ),
        col("done", &["done"], "0"),
    ],
};

const SETTINGS: Table = Table {
    name: "settings",
    create: "CREATE TABLE settings (
        id INTEGER PRIMARY KEY CHECK (id = 1),
        dark_theme_enabled INTEGER NOT NULL,
        legacy_import_done INTEGER NOT NULL,
        data_updated_at_millis INTEGER NOT NULL
    )",
    indexes: "",
    columns: &[
        col("id", &[], "1"),
        col(
            "dark_theme_enabled",
            &["dark_theme_enabled", "darkThemeEnabled", "dark_theme"],
            "1",
        ),
        col(
            "legacy_import_done",
            &["legacy_import_done", "legacyImportDone"],
            "0",
        ),
        col(
            "data_updated_at_millis",
            &["data_updated_at_millis", "dataUpdatedAtMillis", "data_updated_at"],
            "0",
        ),
    ],
};

const TABLES: [&Table; 4] = [
    &VEHICLES,
    &ODOMETER_RECORDS,
    &FUEL_RECORDS,
    &MAINTENANCE_RECORDS,
];

/// Bring the store up to [`SCHEMA_VERSION`]. All steps run in one transaction;
/// on failure nothing is changed and `user_version` keeps its old value.
pub fn migrate(conn: &Connection) -> Result<()> {
    let version: i64 = conn
        .pragma_query_value(None, "user_version", |row| row.get(0))
        .context("Failed to read schema version")?;
    if version >= SCHEMA_VERSION {
        return Ok(());
    }

    run(conn, version)
        .map_err(|e| anyhow::Error::new(SyncError::MigrationFailed(format!("{e:#}"))))?;
    info!(from = version, to = SCHEMA_VERSION, "schema migrated");
    Ok(())
}

fn run(conn: &Connection, version: i64) -> Result<()> {
    let tx = conn.unchecked_transaction()?;

    for table in TABLES {
        restructure_table(&tx, table)
            .with_context(|| format!("Failed to restructure {} (from v{version})", table.name))?;
    }

    let had_settings = restructure_table(&tx, &SETTINGS).context("Failed to restructure settings")?;
    if !had_settings && table_exists(&tx, "meta")? {
        fold_meta_into_settings(&tx).context("Failed to migrate meta flags")?;
    }

    tx.execute_batch(
        "CREATE TABLE IF NOT EXISTS id_sequences (
            collection TEXT PRIMARY KEY,
            last_id INTEGER NOT NULL
        );

        INSERT OR IGNORE INTO settings (id, dark_theme_enabled, legacy_import_done, data_updated_at_millis)
        VALUES (1, 1, 0, 0);",
    )?;

    tx.pragma_update(None, "user_version", SCHEMA_VERSION)?;
    tx.commit()?;
    Ok(())
}

/// Returns whether the table existed before and had its rows carried over.
fn restructure_table(conn: &Connection, table: &Table) -> Result<bool> {
    let existed = table_exists(conn, table.name)?;
    let legacy = format!("{}{LEGACY_SUFFIX}", table.name);

    if existed {
        conn.execute_batch(&format!(
            "DROP TABLE IF EXISTS {legacy};
             ALTER TABLE {} RENAME TO {legacy};",
            table.name
        ))?;
    }

    conn.execute_batch(table.create)?;

    if existed {
        let present = column_names(conn, &legacy)?;
        let targets = table
            .columns
            .iter()
            .map(|c| c.name)
            .collect::<Vec<_>>()
            .join(", ");
        let exprs = table
            .columns
            .iter()
            .map(|c| c.select_expr(&present))
            .collect::<Vec<_>>()
            .join(", ");
        let copied = conn.execute(
            &format!(
                "INSERT OR IGNORE INTO {} ({targets}) SELECT {exprs} FROM {legacy}",
                table.name
            ),
            [],
        )?;
        conn.execute_batch(&format!("DROP TABLE {legacy};"))?;
        debug!(table = table.name, rows = copied, "table restructured");
    }

    // Indexes of the renamed table were dropped with it, so create after the drop.
    conn.execute_batch(table.indexes)?;
    Ok(existed)
}

fn fold_meta_into_settings(conn: &Connection) -> Result<()> {
    let present = column_names(conn, "meta")?;
    if present.iter().any(|c| c.eq_ignore_ascii_case("key")) {
        let value = ["long_value", "longValue", "value"]
            .into_iter()
            .find(|v| present.iter().any(|p| p.eq_ignore_ascii_case(v)))
            .unwrap_or("NULL");
        conn.execute_batch(&format!(
            "INSERT OR IGNORE INTO settings (id, dark_theme_enabled, legacy_import_done, data_updated_at_millis)
             VALUES (1,
                COALESCE((SELECT {value} FROM meta WHERE key = 'dark_theme'), 1),
                COALESCE((SELECT {value} FROM meta WHERE key = 'legacy_import_done'), 0),
                COALESCE((SELECT {value} FROM meta WHERE key = 'data_updated_at'), 0));"
        ))?;
    }
    conn.execute_batch("DROP TABLE meta;")?;
    Ok(())
}

fn table_exists(conn: &Connection, name: &str) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
        [name],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

fn column_names(conn: &Connection, table: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(names)
}
