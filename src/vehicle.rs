//! Vehicles and drivers
//!
//! Neither record stores the driver/vehicle pairing; that lives in the link
//! relation managed by [`crate::fleet`].
use std::str::FromStr;

use chrono::Utc;

use crate::error::{ValidationError, WorkflowError};
use crate::types::{Quantity, TimeStamp};

#[derive(minicbor::Encode, minicbor::Decode, serde::Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum VehicleKind {
    #[n(0)]
    Truck,
    #[n(1)]
    Van,
    #[n(2)]
    Trailer,
    #[n(3)]
    Special,
}

#[derive(
    minicbor::Encode,
    minicbor::Decode,
    serde::Serialize,
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
)]
pub enum VehicleStatus {
    #[n(0)]
    Available,
    #[n(1)]
    InUse,
    #[n(2)]
    Maintenance,
    #[n(3)]
    Broken,
}

#[derive(minicbor::Encode, minicbor::Decode, serde::Serialize, Debug, Clone, PartialEq, Eq)]
pub struct Vehicle {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub license_plate: String, // unique
    #[n(2)]
    pub model: String,
    #[n(3)]
    pub kind: VehicleKind,
    #[n(4)]
    pub capacity: Quantity, // tonnes
    #[n(5)]
    pub volume: Quantity, // m³
    #[n(6)]
    pub status: VehicleStatus,
    #[n(7)]
    pub current_warehouse: Option<String>,
    #[n(8)]
    pub year: u16,
    #[n(9)]
    pub vin: Option<String>,
    #[n(10)]
    pub is_active: bool,
    #[n(11)]
    pub created_at: TimeStamp<Utc>,
    #[n(12)]
    pub updated_at: TimeStamp<Utc>,
}

#[derive(minicbor::Encode, minicbor::Decode, serde::Serialize, Debug, Clone, PartialEq, Eq)]
pub struct Driver {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub user_id: String, // one-to-one, role Driver
    #[n(2)]
    pub license_number: String, // unique
    #[n(3)]
    pub license_category: String,
    #[n(4)]
    pub license_expiry: TimeStamp<Utc>,
    #[n(5)]
    pub phone_number: String,
    #[n(6)]
    pub is_active: bool,
    #[n(7)]
    pub created_at: TimeStamp<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewVehicle {
    pub license_plate: String,
    pub model: String,
    pub kind: VehicleKind,
    pub capacity: Quantity,
    pub volume: Quantity,
    pub year: u16,
    pub vin: Option<String>,
    pub current_warehouse: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewDriver {
    pub user_id: String,
    pub license_number: String,
    pub license_category: String,
    pub license_expiry: TimeStamp<Utc>,
    pub phone_number: String,
}

impl VehicleStatus {
    pub const ALL: [VehicleStatus; 4] = [
        VehicleStatus::Available,
        VehicleStatus::InUse,
        VehicleStatus::Maintenance,
        VehicleStatus::Broken,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            VehicleStatus::Available => "AVAILABLE",
            VehicleStatus::InUse => "IN_USE",
            VehicleStatus::Maintenance => "MAINTENANCE",
            VehicleStatus::Broken => "BROKEN",
        }
    }
}

impl std::fmt::Display for VehicleStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VehicleStatus {
    type Err = WorkflowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        VehicleStatus::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| WorkflowError::InvalidStatus(s.to_string()))
    }
}

impl Vehicle {
    pub fn is_available(&self) -> bool {
        self.status == VehicleStatus::Available
    }
}

impl NewVehicle {
    pub fn new(license_plate: &str, kind: VehicleKind, capacity: Quantity, volume: Quantity) -> Self {
        Self {
            license_plate: license_plate.to_string(),
            model: String::new(),
            kind,
            capacity,
            volume,
            year: 2020,
            vin: None,
            current_warehouse: None,
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.license_plate.trim().is_empty() {
            return Err(ValidationError::Missing {
                field: "license_plate",
            });
        }
        if !self.capacity.is_positive() {
            return Err(ValidationError::NotPositive { field: "capacity" });
        }
        if !self.volume.is_positive() {
            return Err(ValidationError::NotPositive { field: "volume" });
        }
        Ok(())
    }
}

impl NewDriver {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.license_number.trim().is_empty() {
            return Err(ValidationError::Missing {
                field: "license_number",
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_parsing() {
        assert_eq!("in_use".parse::<VehicleStatus>().unwrap(), VehicleStatus::InUse);
        assert!(matches!(
            "WAITING_ALLOCATION".parse::<VehicleStatus>(),
            Err(WorkflowError::InvalidStatus(s)) if s == "WAITING_ALLOCATION"
        ));
    }

    #[test]
    fn vehicle_needs_positive_dimensions() {
        let draft = NewVehicle::new("A123BC", VehicleKind::Van, Quantity::from(3), Quantity::ZERO);
        assert_eq!(
            draft.validate(),
            Err(ValidationError::NotPositive { field: "volume" })
        );
    }
}
