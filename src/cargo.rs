use chrono::Utc;

use crate::error::ValidationError;
use crate::types::{Quantity, TimeStamp};

/// UN dangerous goods class, 1 through 9.
#[derive(minicbor::Encode, minicbor::Decode, serde::Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum HazardClass {
    #[n(1)]
    Explosives,
    #[n(2)]
    Gases,
    #[n(3)]
    FlammableLiquids,
    #[n(4)]
    FlammableSolids,
    #[n(5)]
    Oxidizers,
    #[n(6)]
    Toxic,
    #[n(7)]
    Radioactive,
    #[n(8)]
    Corrosive,
    #[n(9)]
    Miscellaneous,
}

#[derive(minicbor::Encode, minicbor::Decode, serde::Serialize, Debug, Clone, PartialEq, Eq)]
pub struct CargoType {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub name: String,
    #[n(2)]
    pub description: String,
    #[n(3)]
    pub hazard_class: Option<HazardClass>,
    #[n(4)]
    pub requires_special_handling: bool,
    #[n(5)]
    pub min_temperature: Option<Quantity>,
    #[n(6)]
    pub max_temperature: Option<Quantity>,
    #[n(7)]
    pub is_active: bool,
    #[n(8)]
    pub created_at: TimeStamp<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct NewCargoType {
    pub name: String,
    pub description: String,
    pub hazard_class: Option<HazardClass>,
    pub requires_special_handling: bool,
    pub min_temperature: Option<Quantity>,
    pub max_temperature: Option<Quantity>,
}

impl TryFrom<u8> for HazardClass {
    type Error = ValidationError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            1 => HazardClass::Explosives,
            2 => HazardClass::Gases,
            3 => HazardClass::FlammableLiquids,
            4 => HazardClass::FlammableSolids,
            5 => HazardClass::Oxidizers,
            6 => HazardClass::Toxic,
            7 => HazardClass::Radioactive,
            8 => HazardClass::Corrosive,
            9 => HazardClass::Miscellaneous,
            other => return Err(ValidationError::HazardClass(other)),
        })
    }
}

impl NewCargoType {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::Missing { field: "name" });
        }
        if let (Some(min), Some(max)) = (self.min_temperature, self.max_temperature) {
            if max < min {
                return Err(ValidationError::TemperatureRange);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn temperature_range() {
        let mut draft = NewCargoType::new("Frozen fish");
        draft.min_temperature = Some(Quantity::from(-18));
        draft.max_temperature = Some(Quantity::from(-25));
        assert_eq!(draft.validate(), Err(ValidationError::TemperatureRange));

        draft.max_temperature = Some(Quantity::from(-18));
        assert!(draft.validate().is_ok());

        // one bound alone is never checked
        draft.min_temperature = None;
        draft.max_temperature = Some(Quantity::from(-40));
        assert!(draft.validate().is_ok());
    }

    #[test]
    fn hazard_class_bounds() {
        assert_eq!(HazardClass::try_from(3), Ok(HazardClass::FlammableLiquids));
        assert_eq!(HazardClass::try_from(0), Err(ValidationError::HazardClass(0)));
        assert_eq!(HazardClass::try_from(10), Err(ValidationError::HazardClass(10)));
    }
}
