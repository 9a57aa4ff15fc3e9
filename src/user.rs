//! User directory records and role capabilities
use std::str::FromStr;

use chrono::Utc;

use crate::error::{ValidationError, WorkflowError};
use crate::types::TimeStamp;

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
pub enum Role {
    #[n(0)]
    LogisticsManager,
    #[n(1)]
    Dispatcher,
    #[n(2)]
    Driver,
}

/// Roles allowed to be the contact person of a warehouse.
pub const WAREHOUSE_CONTACT_ROLES: &[Role] = &[Role::LogisticsManager, Role::Dispatcher];

#[derive(minicbor::Encode, minicbor::Decode, serde::Serialize, Debug, Clone, PartialEq, Eq)]
pub struct User {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub username: String,
    #[n(2)]
    pub full_name: String,
    #[n(3)]
    pub role: Role,
    #[n(4)]
    pub phone_number: Option<String>,
    #[n(5)]
    pub created_at: TimeStamp<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub full_name: String,
    pub role: Role,
    pub phone_number: Option<String>,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::LogisticsManager => "LOGISTICS_MANAGER",
            Role::Dispatcher => "DISPATCHER",
            Role::Driver => "DRIVER",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = WorkflowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "LOGISTICS_MANAGER" | "MANAGER" => Ok(Role::LogisticsManager),
            "DISPATCHER" => Ok(Role::Dispatcher),
            "DRIVER" => Ok(Role::Driver),
            other => Err(ValidationError::UnknownRole(other.to_string()).into()),
        }
    }
}

impl User {
    pub fn has_role(&self, roles: &[Role]) -> bool {
        roles.contains(&self.role)
    }

    /// Check the user may fill `field`, which demands one of `roles`.
    pub(crate) fn require_role(
        &self,
        field: &'static str,
        roles: &[Role],
        expected: &'static str,
    ) -> Result<(), ValidationError> {
        if self.has_role(roles) {
            Ok(())
        } else {
            Err(ValidationError::RoleMismatch { field, expected })
        }
    }
}

impl NewUser {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.username.trim().is_empty() {
            return Err(ValidationError::Missing { field: "username" });
        }
        Ok(())
    }
}
