//! Assignment rules: pure checks run before any write, and again inside the
//! transaction that commits the write.
use crate::error::{Result, ValidationError, WorkflowError};
use crate::user::{Role, User, WAREHOUSE_CONTACT_ROLES};
use crate::vehicle::{Driver, Vehicle};

/// A shipment may take `vehicle` and `driver` only if the driver is already
/// linked to that vehicle and the vehicle is available.
///
/// `linked_vehicle` is the vehicle the driver is currently linked to.
pub fn check_shipment_assignment(
    vehicle: &Vehicle,
    driver: &Driver,
    linked_vehicle: Option<&str>,
) -> Result<()> {
    if linked_vehicle != Some(vehicle.id.as_str()) {
        return Err(WorkflowError::IncompatiblePairing {
            driver: driver.id.clone(),
            vehicle: vehicle.id.clone(),
        });
    }
    if !vehicle.is_available() {
        return Err(WorkflowError::VehicleUnavailable {
            vehicle: vehicle.id.clone(),
            status: vehicle.status.to_string(),
        });
    }
    Ok(())
}

/// Only users with the driver role may back a driver profile.
pub fn check_driver_user(user: &User) -> std::result::Result<(), ValidationError> {
    user.require_role("user", &[Role::Driver], "DRIVER")
}

pub fn check_warehouse_contact(user: &User) -> std::result::Result<(), ValidationError> {
    user.require_role(
        "contact_person",
        WAREHOUSE_CONTACT_ROLES,
        "LOGISTICS_MANAGER or DISPATCHER",
    )
}
