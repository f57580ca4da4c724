//! Wire shape of the per-user remote replica document.
//!
//! Every entry field is typed and optional. Entries that fail to parse or lack a
//! required field are dropped individually instead of failing the whole document,
//! and collections absent from older documents default to empty lists.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use tracing::warn;

use crate::models::{
    FuelRecord, MaintenanceRecord, MaintenanceType, OdometerRecord, Snapshot, Vehicle, VehicleType,
};

pub const DOCUMENT_SCHEMA_VERSION: i64 = 2;

/// Condition attached to a remote write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WritePrecondition {
    /// Unconditional overwrite.
    Any,
    /// Only when no document exists yet.
    Absent,
    /// Only when the stored document still has this `updatedAtMillis`.
    UpdatedAt(i64),
}

impl WritePrecondition {
    /// Check the condition against the `updatedAtMillis` of the currently stored document.
    #[must_use]
    pub fn holds(self, current: Option<i64>) -> bool {
        match self {
            Self::Any => true,
            Self::Absent => current.is_none(),
            Self::UpdatedAt(expected) => current == Some(expected),
        }
    }

    #[must_use]
    pub fn expected(self) -> Option<i64> {
        match self {
            Self::UpdatedAt(expected) => Some(expected),
            Self::Any | Self::Absent => None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteDocument {
    #[serde(default)]
    pub schema_version: i64,
    #[serde(default)]
    pub updated_at_millis: i64,
    #[serde(default, deserialize_with = "lenient_entries")]
    pub vehicles: Vec<VehicleEntry>,
    #[serde(default, deserialize_with = "lenient_entries")]
    pub odometer_records: Vec<OdometerEntry>,
    #[serde(default, deserialize_with = "lenient_entries")]
    pub fuel_records: Vec<FuelEntry>,
    #[serde(default, deserialize_with = "lenient_entries")]
    pub maintenance_records: Vec<MaintenanceEntry>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VehicleEntry {
    pub id: Option<i64>,
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub vehicle_type: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OdometerEntry {
    pub id: Option<i64>,
    pub vehicle_id: Option<i64>,
    pub date_epoch_day: Option<i64>,
    pub odometer_km: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FuelEntry {
    pub id: Option<i64>,
    pub vehicle_id: Option<i64>,
    pub date_epoch_day: Option<i64>,
    pub odometer_km: Option<f64>,
    pub liters: Option<f64>,
    pub price_per_liter: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MaintenanceEntry {
    pub id: Option<i64>,
    pub vehicle_id: Option<i64>,
    #[serde(rename = "type")]
    pub maintenance_type: Option<String>,
    pub title: Option<String>,
    pub notes: Option<String>,
    pub created_at_epoch_day: Option<i64>,
    pub due_date_epoch_day: Option<i64>,
    pub due_odometer_km: Option<f64>,
    pub estimated_cost: Option<f64>,
    pub done: Option<bool>,
}

/// Parse a list entry by entry, keeping the ones that match `T`. `null` reads as empty.
pub(crate) fn lenient_entries<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let values = Option::<Vec<serde_json::Value>>::deserialize(deserializer)?.unwrap_or_default();
    Ok(parse_entries(values))
}

pub(crate) fn parse_entries<T: DeserializeOwned>(values: Vec<serde_json::Value>) -> Vec<T> {
    let total = values.len();
    let parsed: Vec<T> = values
        .into_iter()
        .filter_map(|v| serde_json::from_value(v).ok())
        .collect();
    if parsed.len() < total {
        warn!(dropped = total - parsed.len(), "skipped malformed entries");
    }
    parsed
}

impl RemoteDocument {
    #[must_use]
    pub fn from_snapshot(snapshot: &Snapshot) -> Self {
        RemoteDocument {
            schema_version: DOCUMENT_SCHEMA_VERSION,
            updated_at_millis: snapshot.updated_at_millis,
            vehicles: snapshot
                .vehicles
                .iter()
                .map(|v| VehicleEntry {
                    id: Some(v.id),
                    name: Some(v.name.clone()),
                    vehicle_type: Some(v.vehicle_type.as_str().to_string()),
                })
                .collect(),
            odometer_records: snapshot
                .odometer_records
                .iter()
                .map(|r| OdometerEntry {
                    id: Some(r.id),
                    vehicle_id: Some(r.vehicle_id),
                    date_epoch_day: Some(r.date_epoch_day),
                    odometer_km: Some(r.odometer_km),
                })
                .collect(),
            fuel_records: snapshot
                .fuel_records
                .iter()
                .map(|r| FuelEntry {
                    id: Some(r.id),
                    vehicle_id: Some(r.vehicle_id),
                    date_epoch_day: Some(r.date_epoch_day),
                    odometer_km: Some(r.odometer_km),
                    liters: Some(r.liters),
                    price_per_liter: Some(r.price_per_liter),
                })
                .collect(),
            maintenance_records: snapshot
                .maintenance_records
                .iter()
                .map(|r| MaintenanceEntry {
                    id: Some(r.id),
                    vehicle_id: Some(r.vehicle_id),
                    maintenance_type: Some(r.maintenance_type.as_str().to_string()),
                    title: Some(r.title.clone()),
                    notes: Some(r.notes.clone()),
                    created_at_epoch_day: Some(r.created_at_epoch_day),
                    due_date_epoch_day: r.due_date_epoch_day,
                    due_odometer_km: r.due_odometer_km,
                    estimated_cost: r.estimated_cost,
                    done: Some(r.done),
                })
                .collect(),
        }
    }

    #[must_use]
    pub fn into_snapshot(self) -> Snapshot {
        Snapshot {
            vehicles: self
                .vehicles
                .into_iter()
                .filter_map(VehicleEntry::into_vehicle)
                .collect(),
            odometer_records: self
                .odometer_records
                .into_iter()
                .filter_map(OdometerEntry::into_record)
                .collect(),
            fuel_records: self
                .fuel_records
                .into_iter()
                .filter_map(FuelEntry::into_record)
                .collect(),
            maintenance_records: self
                .maintenance_records
                .into_iter()
                .filter_map(MaintenanceEntry::into_record)
                .collect(),
            updated_at_millis: self.updated_at_millis,
        }
    }
}

impl VehicleEntry {
    fn into_vehicle(self) -> Option<Vehicle> {
        Some(Vehicle {
            id: self.id?,
            name: self.name?,
            vehicle_type: vehicle_type_or_car(self.vehicle_type.as_deref()),
        })
    }
}

impl OdometerEntry {
    fn into_record(self) -> Option<OdometerRecord> {
        Some(OdometerRecord {
            id: self.id?,
            vehicle_id: self.vehicle_id?,
            date_epoch_day: self.date_epoch_day?,
            odometer_km: self.odometer_km?,
        })
    }
}

impl FuelEntry {
    fn into_record(self) -> Option<FuelRecord> {
        Some(FuelRecord {
            id: self.id?,
            vehicle_id: self.vehicle_id?,
            date_epoch_day: self.date_epoch_day?,
            odometer_km: self.odometer_km?,
            liters: self.liters?,
            price_per_liter: self.price_per_liter?,
        })
    }
}

impl MaintenanceEntry {
    fn into_record(self) -> Option<MaintenanceRecord> {
        let maintenance_type = maintenance_type_or_other(self.maintenance_type.as_deref());
        let title = self
            .title
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| maintenance_type.label().to_string());
        Some(MaintenanceRecord {
            id: self.id?,
            vehicle_id: self.vehicle_id?,
            maintenance_type,
            title,
            notes: self.notes.unwrap_or_default(),
            created_at_epoch_day: self.created_at_epoch_day.unwrap_or(0),
            due_date_epoch_day: self.due_date_epoch_day,
            due_odometer_km: self.due_odometer_km,
            estimated_cost: self.estimated_cost,
            done: self.done.unwrap_or(false),
        })
    }
}

pub(crate) fn vehicle_type_or_car(value: Option<&str>) -> VehicleType {
    value.and_then(VehicleType::parse).unwrap_or(VehicleType::Car)
}

pub(crate) fn maintenance_type_or_other(value: Option<&str>) -> MaintenanceType {
    value
        .and_then(MaintenanceType::parse)
        .unwrap_or(MaintenanceType::Other)
}
