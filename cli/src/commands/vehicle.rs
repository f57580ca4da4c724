use anyhow::Result;
use tabled::{Table, Tabled, settings::Style};

use fleetlog_core::FleetService;
use fleetlog_core::models::Vehicle;

use super::helpers::parse_vehicle_type;

pub(crate) fn cmd_vehicle_list(svc: &FleetService, json: bool) -> Result<()> {
    let vehicles = svc.list_vehicles()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&vehicles)?);
    } else {
        print_vehicle_table(&vehicles);
    }
    Ok(())
}

pub(crate) fn cmd_vehicle_add(
    svc: &FleetService,
    name: &str,
    vehicle_type: &str,
    json: bool,
) -> Result<()> {
    let vehicle_type = parse_vehicle_type(vehicle_type)?;
    let vehicle = svc.add_vehicle(name, vehicle_type)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&vehicle)?);
    } else {
        println!(
            "Added {} '{}' (id {})",
            vehicle.vehicle_type.label().to_lowercase(),
            vehicle.name,
            vehicle.id
        );
    }
    Ok(())
}

pub(crate) fn cmd_vehicle_rename(
    svc: &FleetService,
    id: i64,
    name: &str,
    json: bool,
) -> Result<()> {
    let vehicle = svc.rename_vehicle(id, name)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&vehicle)?);
    } else {
        println!("Renamed vehicle {} to '{}'", vehicle.id, vehicle.name);
    }
    Ok(())
}

fn print_vehicle_table(vehicles: &[Vehicle]) {
    #[derive(Tabled)]
    struct VehicleRow {
        #[tabled(rename = "ID")]
        id: i64,
        #[tabled(rename = "Name")]
        name: String,
        #[tabled(rename = "Type")]
        kind: &'static str,
    }

    let rows: Vec<VehicleRow> = vehicles
        .iter()
        .map(|v| VehicleRow {
            id: v.id,
            name: v.name.clone(),
            kind: v.vehicle_type.label(),
        })
        .collect();
    println!("{}", Table::new(&rows).with(Style::rounded()));
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetlog_core::legacy::JsonLegacyStore;

    fn service() -> FleetService {
        FleetService::open_in_memory(&JsonLegacyStore::from_json("{}").unwrap()).unwrap()
    }

    #[test]
    fn test_vehicle_add_and_rename() {
        let svc = service();
        cmd_vehicle_add(&svc, "Fusca", "car", true).unwrap();
        let added = svc.list_vehicles().unwrap().into_iter().last().unwrap();
        assert_eq!(added.name, "Fusca");

        cmd_vehicle_rename(&svc, added.id, "Fusca 1972", false).unwrap();
        let renamed = svc
            .list_vehicles()
            .unwrap()
            .into_iter()
            .find(|v| v.id == added.id)
            .unwrap();
        assert_eq!(renamed.name, "Fusca 1972");
    }

    #[test]
    fn test_vehicle_add_rejects_unknown_type() {
        let svc = service();
        assert!(cmd_vehicle_add(&svc, "Bus", "bus", false).is_err());
        assert_eq!(svc.list_vehicles().unwrap().len(), 2);
    }
}
