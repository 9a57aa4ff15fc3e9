//! Shipment records, drafts and the status history they accumulate
use std::str::FromStr;

use chrono::{Duration, Utc};

use crate::error::{ValidationError, WorkflowError};
use crate::types::{Quantity, TimeStamp};

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
pub enum ShipmentStatus {
    #[n(0)]
    Planned,
    #[n(1)]
    Assigned,
    #[n(2)]
    InTransit,
    #[n(3)]
    AtWarehouse,
    #[n(4)]
    Unloading,
    #[n(5)]
    Completed,
    #[n(6)]
    Cancelled,
    #[n(7)]
    Delayed,
}

#[derive(
    minicbor::Encode,
    minicbor::Decode,
    serde::Serialize,
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
)]
pub enum Priority {
    #[n(0)]
    Low,
    #[n(1)]
    #[default]
    Medium,
    #[n(2)]
    High,
    #[n(3)]
    Urgent,
}

#[derive(minicbor::Encode, minicbor::Decode, serde::Serialize, Debug, Clone, PartialEq, Eq)]
pub struct Shipment {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub cargo_type: String,
    #[n(2)]
    pub weight: Quantity, // tonnes
    #[n(3)]
    pub volume: Quantity, // m³
    #[n(4)]
    pub description: String,
    #[n(5)]
    pub origin_warehouse: String,
    #[n(6)]
    pub destination_warehouse: String,
    #[n(7)]
    pub planned_departure: TimeStamp<Utc>,
    #[n(8)]
    pub planned_arrival: TimeStamp<Utc>,
    #[n(9)]
    pub actual_departure: Option<TimeStamp<Utc>>,
    #[n(10)]
    pub actual_arrival: Option<TimeStamp<Utc>>,
    #[n(11)]
    pub assigned_vehicle: Option<String>,
    #[n(12)]
    pub assigned_driver: Option<String>,
    #[n(13)]
    pub status: ShipmentStatus,
    #[n(14)]
    pub priority: Priority,
    #[n(15)]
    pub created_by: String,
    #[n(16)]
    pub assigned_by: Option<String>,
    #[n(17)]
    pub special_instructions: String,
    #[n(18)]
    pub delay_reason: String,
    #[n(19)]
    pub created_at: TimeStamp<Utc>,
    #[n(20)]
    pub updated_at: TimeStamp<Utc>,
}

// Used for constructing shipments before they are stored
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ShipmentDraft {
    cargo_type: Option<String>,
    weight: Quantity,
    volume: Quantity,
    description: String,
    origin_warehouse: Option<String>,
    destination_warehouse: Option<String>,
    planned_departure: Option<TimeStamp<Utc>>,
    planned_arrival: Option<TimeStamp<Utc>>,
    priority: Priority,
    special_instructions: String,
}

/// One entry of a shipment's status history.
#[derive(minicbor::Encode, minicbor::Decode, serde::Serialize, Debug, Clone, PartialEq, Eq)]
pub struct StatusEvent {
    #[n(0)]
    pub shipment_id: String,
    #[n(1)]
    pub from: Option<ShipmentStatus>, // None for the creation event
    #[n(2)]
    pub to: ShipmentStatus,
    #[n(3)]
    pub actor: Option<String>,
    #[n(4)]
    pub notes: String,
    #[n(5)]
    pub at: TimeStamp<Utc>,
}

impl ShipmentStatus {
    pub const ALL: [ShipmentStatus; 8] = [
        ShipmentStatus::Planned,
        ShipmentStatus::Assigned,
        ShipmentStatus::InTransit,
        ShipmentStatus::AtWarehouse,
        ShipmentStatus::Unloading,
        ShipmentStatus::Completed,
        ShipmentStatus::Cancelled,
        ShipmentStatus::Delayed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ShipmentStatus::Planned => "PLANNED",
            ShipmentStatus::Assigned => "ASSIGNED",
            ShipmentStatus::InTransit => "IN_TRANSIT",
            ShipmentStatus::AtWarehouse => "AT_WAREHOUSE",
            ShipmentStatus::Unloading => "UNLOADING",
            ShipmentStatus::Completed => "COMPLETED",
            ShipmentStatus::Cancelled => "CANCELLED",
            ShipmentStatus::Delayed => "DELAYED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ShipmentStatus::Completed | ShipmentStatus::Cancelled)
    }
}

impl std::fmt::Display for ShipmentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ShipmentStatus {
    type Err = WorkflowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ShipmentStatus::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| WorkflowError::InvalidStatus(s.to_string()))
    }
}

impl Shipment {
    /// Delayed by status, or because it arrived after the planned arrival.
    pub fn is_delayed(&self) -> bool {
        if self.status == ShipmentStatus::Delayed {
            return true;
        }
        match &self.actual_arrival {
            Some(actual) => *actual > self.planned_arrival,
            None => false,
        }
    }

    /// Time between actual departure and actual arrival, when both are known.
    pub fn duration(&self) -> Option<Duration> {
        match (&self.actual_departure, &self.actual_arrival) {
            (Some(departed), Some(arrived)) => Some(arrived.since(departed)),
            _ => None,
        }
    }

    pub fn is_active(&self) -> bool {
        !self.status.is_terminal()
    }
}

/// Checks `departure < arrival`
pub fn check_schedule(
    departure: &TimeStamp<Utc>,
    arrival: &TimeStamp<Utc>,
) -> Result<(), ValidationError> {
    if arrival <= departure {
        return Err(ValidationError::ArrivalNotAfterDeparture);
    }
    Ok(())
}

/// A draft that passed field validation. Referenced ids are still unchecked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidShipment {
    pub cargo_type: String,
    pub weight: Quantity,
    pub volume: Quantity,
    pub description: String,
    pub origin_warehouse: String,
    pub destination_warehouse: String,
    pub planned_departure: TimeStamp<Utc>,
    pub planned_arrival: TimeStamp<Utc>,
    pub priority: Priority,
    pub special_instructions: String,
}

impl ShipmentDraft {
    /// Construct a new builder object, this becomes the basis for a shipment
    pub fn new() -> Self {
        Self::default()
    }
    pub fn set_cargo_type(mut self, cargo_type: &str) -> Self {
        self.cargo_type = Some(cargo_type.to_string());
        self
    }
    pub fn set_weight(mut self, weight: Quantity) -> Self {
        self.weight = weight;
        self
    }
    pub fn set_volume(mut self, volume: Quantity) -> Self {
        self.volume = volume;
        self
    }
    pub fn set_description(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }
    pub fn set_origin(mut self, warehouse: &str) -> Self {
        self.origin_warehouse = Some(warehouse.to_string());
        self
    }
    pub fn set_destination(mut self, warehouse: &str) -> Self {
        self.destination_warehouse = Some(warehouse.to_string());
        self
    }
    pub fn set_planned_departure(mut self, date: TimeStamp<Utc>) -> Self {
        self.planned_departure = Some(date);
        self
    }
    pub fn set_planned_arrival(mut self, date: TimeStamp<Utc>) -> Self {
        self.planned_arrival = Some(date);
        self
    }
    pub fn set_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }
    pub fn set_special_instructions(mut self, text: &str) -> Self {
        self.special_instructions = text.to_string();
        self
    }

    // Checks fields, and performs validation. Nothing here touches the store.
    pub fn validate(&self) -> Result<ValidShipment, ValidationError> {
        let cargo_type = self
            .cargo_type
            .clone()
            .ok_or(ValidationError::Missing { field: "cargo_type" })?;
        let origin_warehouse = self.origin_warehouse.clone().ok_or(ValidationError::Missing {
            field: "origin_warehouse",
        })?;
        let destination_warehouse =
            self.destination_warehouse
                .clone()
                .ok_or(ValidationError::Missing {
                    field: "destination_warehouse",
                })?;
        let planned_departure = self.planned_departure.ok_or(ValidationError::Missing {
            field: "planned_departure",
        })?;
        let planned_arrival = self.planned_arrival.ok_or(ValidationError::Missing {
            field: "planned_arrival",
        })?;

        if !self.weight.is_positive() {
            return Err(ValidationError::NotPositive { field: "weight" });
        }
        if !self.volume.is_positive() {
            return Err(ValidationError::NotPositive { field: "volume" });
        }
        check_schedule(&planned_departure, &planned_arrival)?;
        if origin_warehouse == destination_warehouse {
            return Err(ValidationError::SameOriginAndDestination);
        }

        Ok(ValidShipment {
            cargo_type,
            weight: self.weight,
            volume: self.volume,
            description: self.description.clone(),
            origin_warehouse,
            destination_warehouse,
            planned_departure,
            planned_arrival,
            priority: self.priority,
            special_instructions: self.special_instructions.clone(),
        })
    }
}

impl StatusEvent {
    /// CBOR encoding of the event and its sha256 digest
    pub fn build(&self) -> crate::error::Result<(String, Vec<u8>)> {
        let cbor = minicbor::to_vec(self)?;
        let hash = sha256::digest(&cbor);

        Ok((hash, cbor))
    }
}
