use chrono::Utc;

use crate::error::ValidationError;
use crate::types::{Quantity, TimeStamp};

#[derive(minicbor::Encode, minicbor::Decode, serde::Serialize, Debug, Clone, PartialEq, Eq)]
pub struct Warehouse {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub name: String,
    #[n(2)]
    pub address: String,
    #[n(3)]
    pub capacity: Quantity, // m³
    #[n(4)]
    pub current_load: Quantity, // m³
    #[n(5)]
    pub contact_person: Option<String>, // user id, manager or dispatcher
    #[n(6)]
    pub is_active: bool,
    #[n(7)]
    pub created_at: TimeStamp<Utc>,
    #[n(8)]
    pub updated_at: TimeStamp<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewWarehouse {
    pub name: String,
    pub address: String,
    pub capacity: Quantity,
    pub current_load: Quantity,
    pub contact_person: Option<String>,
}

impl Warehouse {
    /// Load as a percentage of capacity, 0 when capacity is 0.
    pub fn utilization_percentage(&self) -> f64 {
        self.current_load.percent_of(self.capacity)
    }

    /// Volume still free, never negative.
    pub fn free_capacity(&self) -> Quantity {
        let free = self.capacity.value() - self.current_load.value();
        if free.is_sign_negative() {
            Quantity::ZERO
        } else {
            Quantity::new(free)
        }
    }
}

/// `0 <= load <= capacity`
pub fn check_load(load: Quantity, capacity: Quantity) -> Result<(), ValidationError> {
    if load.is_negative() || load > capacity {
        return Err(ValidationError::LoadOutOfRange {
            load: load.to_string(),
            capacity: capacity.to_string(),
        });
    }
    Ok(())
}

impl NewWarehouse {
    pub fn new(name: &str, capacity: Quantity) -> Self {
        Self {
            name: name.to_string(),
            address: String::new(),
            capacity,
            current_load: Quantity::ZERO,
            contact_person: None,
        }
    }

    pub fn validate(&self, enforce_capacity: bool) -> Result<(), ValidationError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::Missing { field: "name" });
        }
        if !self.capacity.is_positive() {
            return Err(ValidationError::NotPositive { field: "capacity" });
        }
        if enforce_capacity {
            check_load(self.current_load, self.capacity)?;
        } else if self.current_load.is_negative() {
            return Err(ValidationError::LoadOutOfRange {
                load: self.current_load.to_string(),
                capacity: self.capacity.to_string(),
            });
        }
        Ok(())
    }
}
