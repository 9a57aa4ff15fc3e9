use sled::transaction::TransactionError;

use crate::store::EntityKind;

/// Field-level rule violations. Each variant knows which field it rejects.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("planned arrival must be later than planned departure")]
    ArrivalNotAfterDeparture,
    #[error("destination warehouse cannot be the origin warehouse")]
    SameOriginAndDestination,
    #[error("max temperature cannot be lower than min temperature")]
    TemperatureRange,
    #[error("{field} must be a positive number")]
    NotPositive { field: &'static str },
    #[error("warehouse load must be between 0 and {capacity}, got {load}")]
    LoadOutOfRange { load: String, capacity: String },
    #[error("{field} requires a user with role {expected}")]
    RoleMismatch {
        field: &'static str,
        expected: &'static str,
    },
    #[error("{field} '{value}' is already taken")]
    Duplicate { field: &'static str, value: String },
    #[error("{field} is required")]
    Missing { field: &'static str },
    #[error("hazard class must be between 1 and 9, got {0}")]
    HazardClass(u8),
    #[error("unknown role '{0}'")]
    UnknownRole(String),
}

impl ValidationError {
    /// The name of the field the rule was evaluated against.
    pub fn field(&self) -> &'static str {
        match self {
            ValidationError::ArrivalNotAfterDeparture => "planned_arrival",
            ValidationError::SameOriginAndDestination => "destination_warehouse",
            ValidationError::TemperatureRange => "max_temperature",
            ValidationError::NotPositive { field } => field,
            ValidationError::LoadOutOfRange { .. } => "current_load",
            ValidationError::RoleMismatch { field, .. } => field,
            ValidationError::Duplicate { field, .. } => field,
            ValidationError::Missing { field } => field,
            ValidationError::HazardClass(_) => "hazard_class",
            ValidationError::UnknownRole(_) => "role",
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum WorkflowError {
    #[error("{kind} '{id}' not found")]
    NotFound { kind: EntityKind, id: String },
    #[error("validation failed on {field}: {0}", field = .0.field())]
    ValidationFailed(#[from] ValidationError),
    #[error("vehicle '{vehicle}' is not available (status {status})")]
    VehicleUnavailable { vehicle: String, status: String },
    #[error("driver '{driver}' is not linked to vehicle '{vehicle}'")]
    IncompatiblePairing { driver: String, vehicle: String },
    #[error("'{0}' is not a valid status")]
    InvalidStatus(String),
    #[error("shipment cannot move from {from} to {to}")]
    IllegalTransition { from: String, to: String },
    #[error("driver '{0}' has no vehicle assigned")]
    NothingAssigned(String),
    #[error("{kind} '{id}' is still referenced by {references} record(s)")]
    Protected {
        kind: EntityKind,
        id: String,
        references: u64,
    },
    #[error("storage failure: {0}")]
    Storage(#[from] sled::Error),
    #[error("codec failure: {0}")]
    Codec(String),
}

pub type Result<T> = std::result::Result<T, WorkflowError>;

impl WorkflowError {
    pub(crate) fn not_found(kind: EntityKind, id: &str) -> Self {
        WorkflowError::NotFound {
            kind,
            id: id.to_string(),
        }
    }
}

impl From<TransactionError<WorkflowError>> for WorkflowError {
    fn from(value: TransactionError<WorkflowError>) -> Self {
        match value {
            TransactionError::Abort(err) => err,
            TransactionError::Storage(err) => WorkflowError::Storage(err),
        }
    }
}

impl From<minicbor::decode::Error> for WorkflowError {
    fn from(value: minicbor::decode::Error) -> Self {
        WorkflowError::Codec(value.to_string())
    }
}

impl<E: std::fmt::Display> From<minicbor::encode::Error<E>> for WorkflowError {
    fn from(value: minicbor::encode::Error<E>) -> Self {
        WorkflowError::Codec(value.to_string())
    }
}
