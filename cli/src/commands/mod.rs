mod helpers;
mod records;
mod report;
mod sync;
mod vehicle;

pub(crate) use records::{
    MaintenanceArgs, cmd_fuel_add, cmd_fuel_list, cmd_maintenance_add, cmd_maintenance_done,
    cmd_maintenance_list, cmd_odometer_add, cmd_odometer_list,
};
pub(crate) use report::{cmd_report, cmd_theme};
pub(crate) use sync::{SyncAction, cmd_login, cmd_logout, cmd_sync, cmd_whoami};
pub(crate) use vehicle::{cmd_vehicle_add, cmd_vehicle_list, cmd_vehicle_rename};
