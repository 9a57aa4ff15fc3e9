//! Fleet allocation
//!
//! The driver/vehicle pairing is a single relation owned by neither record.
//! [`tx_link`] and [`tx_unlink`] are the only code that writes it, and they
//! always write both directions inside the caller's transaction.
use chrono::Utc;
use sled::transaction::TransactionalTree;

use crate::error::WorkflowError;
use crate::store::{TxResult, abort, driver_key, tx_get_string, vehicle_key};
use crate::types::TimeStamp;
use crate::vehicle::{Vehicle, VehicleStatus};
use crate::warehouse::Warehouse;

/// Links that had to be broken to make room for a new pairing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkChange {
    /// The driver's previous vehicle.
    pub previous_vehicle: Option<String>,
    /// The driver that previously held the vehicle.
    pub displaced_driver: Option<String>,
}

pub(crate) fn tx_link(links: &TransactionalTree, driver_id: &str, vehicle_id: &str) -> TxResult<LinkChange> {
    let mut change = LinkChange::default();

    if let Some(old_vehicle) = tx_get_string(links, &driver_key(driver_id))? {
        if old_vehicle != vehicle_id {
            links.remove(vehicle_key(&old_vehicle).as_bytes())?;
            change.previous_vehicle = Some(old_vehicle);
        }
    }
    if let Some(old_driver) = tx_get_string(links, &vehicle_key(vehicle_id))? {
        if old_driver != driver_id {
            links.remove(driver_key(&old_driver).as_bytes())?;
            change.displaced_driver = Some(old_driver);
        }
    }

    links.insert(driver_key(driver_id).as_bytes(), vehicle_id.as_bytes())?;
    links.insert(vehicle_key(vehicle_id).as_bytes(), driver_id.as_bytes())?;

    Ok(change)
}

/// Break the driver's link. Returns the vehicle it pointed at.
pub(crate) fn tx_unlink(links: &TransactionalTree, driver_id: &str) -> TxResult<String> {
    let Some(vehicle_id) = tx_get_string(links, &driver_key(driver_id))? else {
        return abort(WorkflowError::NothingAssigned(driver_id.to_string()));
    };

    links.remove(driver_key(driver_id).as_bytes())?;
    links.remove(vehicle_key(&vehicle_id).as_bytes())?;

    Ok(vehicle_id)
}

/// Break whatever link the vehicle has, if any.
pub(crate) fn tx_unlink_vehicle(links: &TransactionalTree, vehicle_id: &str) -> TxResult<Option<String>> {
    let driver = tx_get_string(links, &vehicle_key(vehicle_id))?;
    if let Some(driver_id) = &driver {
        links.remove(driver_key(driver_id).as_bytes())?;
        links.remove(vehicle_key(vehicle_id).as_bytes())?;
    }
    Ok(driver)
}

/// Move an available vehicle into service at `warehouse_id`.
/// Returns false, leaving the vehicle untouched, if it is not available.
pub fn allocate(vehicle: &mut Vehicle, warehouse_id: &str, now: TimeStamp<Utc>) -> bool {
    if !vehicle.is_available() {
        return false;
    }
    vehicle.status = VehicleStatus::InUse;
    vehicle.current_warehouse = Some(warehouse_id.to_string());
    vehicle.updated_at = now;
    true
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct AllocationProposal {
    pub vehicle_id: String,
    pub license_plate: String,
    pub warehouse_id: String,
    pub warehouse_name: String,
    /// Warehouse utilization once this vehicle's volume is added.
    pub projected_utilization: f64,
}

/// Suggest a home for every available vehicle.
///
/// Each vehicle goes to the least utilized active warehouse whose free
/// capacity fits the vehicle's volume. Projected loads accumulate so later
/// vehicles see the earlier proposals. Vehicles that fit nowhere are left out.
pub fn plan_allocation(vehicles: &[Vehicle], warehouses: &[Warehouse]) -> Vec<AllocationProposal> {
    // working copies whose current_load tracks the proposals made so far
    let mut projected: Vec<Warehouse> = warehouses.iter().filter(|w| w.is_active).cloned().collect();

    let mut proposals = Vec::new();
    for vehicle in vehicles.iter().filter(|v| v.is_available()) {
        projected.sort_by(|a, b| a.utilization_percentage().total_cmp(&b.utilization_percentage()));

        let Some(warehouse) = projected
            .iter_mut()
            .find(|warehouse| vehicle.volume <= warehouse.free_capacity())
        else {
            continue;
        };
        let Some(after) = warehouse.current_load.checked_add(vehicle.volume) else {
            continue;
        };
        warehouse.current_load = after;

        proposals.push(AllocationProposal {
            vehicle_id: vehicle.id.clone(),
            license_plate: vehicle.license_plate.clone(),
            warehouse_id: warehouse.id.clone(),
            warehouse_name: warehouse.name.clone(),
            projected_utilization: warehouse.utilization_percentage(),
        });
    }

    proposals
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Quantity;
    use crate::vehicle::VehicleKind;

    fn vehicle(id: &str, status: VehicleStatus, volume: i64) -> Vehicle {
        Vehicle {
            id: id.into(),
            license_plate: format!("{id}-plate"),
            model: String::new(),
            kind: VehicleKind::Van,
            capacity: Quantity::from(3),
            volume: Quantity::from(volume),
            status,
            current_warehouse: None,
            year: 2019,
            vin: None,
            is_active: true,
            created_at: TimeStamp::new(),
            updated_at: TimeStamp::new(),
        }
    }

    fn warehouse(id: &str, capacity: i64, load: i64) -> Warehouse {
        Warehouse {
            id: id.into(),
            name: id.to_uppercase(),
            address: String::new(),
            capacity: Quantity::from(capacity),
            current_load: Quantity::from(load),
            contact_person: None,
            is_active: true,
            created_at: TimeStamp::new(),
            updated_at: TimeStamp::new(),
        }
    }

    #[test]
    fn allocate_only_moves_available() {
        let now = TimeStamp::new_with(2024, 3, 1, 12, 0, 0);
        let mut free = vehicle("veh_a", VehicleStatus::Available, 10);
        let mut busy = vehicle("veh_b", VehicleStatus::InUse, 10);

        assert!(allocate(&mut free, "wh_1", now));
        assert_eq!(free.status, VehicleStatus::InUse);
        assert_eq!(free.current_warehouse.as_deref(), Some("wh_1"));

        let before = busy.clone();
        assert!(!allocate(&mut busy, "wh_1", now));
        assert_eq!(busy, before);
    }

    #[test]
    fn plan_prefers_least_utilized_and_accumulates() {
        let warehouses = vec![warehouse("wh_busy", 100, 60), warehouse("wh_idle", 100, 10)];
        let vehicles = vec![
            vehicle("veh_1", VehicleStatus::Available, 60),
            vehicle("veh_2", VehicleStatus::Available, 30),
            vehicle("veh_3", VehicleStatus::InUse, 5),
        ];

        let plan = plan_allocation(&vehicles, &warehouses);

        assert_eq!(plan.len(), 2);
        assert_eq!(plan[0].vehicle_id, "veh_1");
        assert_eq!(plan[0].warehouse_id, "wh_idle");
        assert_eq!(plan[0].projected_utilization, 70.0);
        // wh_idle is projected at 70 now, so wh_busy at 60 wins the next one
        assert_eq!(plan[1].vehicle_id, "veh_2");
        assert_eq!(plan[1].warehouse_id, "wh_busy");
        assert_eq!(plan[1].projected_utilization, 90.0);
    }

    #[test]
    fn plan_skips_vehicles_that_fit_nowhere() {
        let warehouses = vec![warehouse("wh_small", 20, 15)];
        let vehicles = vec![vehicle("veh_big", VehicleStatus::Available, 10)];

        assert!(plan_allocation(&vehicles, &warehouses).is_empty());
    }

    #[test]
    fn plan_skips_overloaded_warehouses() {
        let warehouses = vec![warehouse("wh_over", 10, 25), warehouse("wh_full", 40, 30)];
        let vehicles = vec![vehicle("veh_1", VehicleStatus::Available, 10)];

        let plan = plan_allocation(&vehicles, &warehouses);

        // wh_full has exactly ten left, wh_over has none
        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].warehouse_id, "wh_full");
        assert_eq!(plan[0].projected_utilization, 100.0);
    }
}
