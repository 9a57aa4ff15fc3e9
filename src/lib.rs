pub mod cargo;
pub mod clock;
pub mod config;
pub mod error;
pub mod fleet;
pub mod lifecycle;
pub mod logging;
pub mod rules;
pub mod service;
pub mod shipment;
pub mod stats;
pub mod store;
pub mod types;
pub mod user;
pub mod utils;
pub mod vehicle;
pub mod warehouse;

pub use config::Config;
pub use error::{Result, ValidationError, WorkflowError};
pub use logging::init_logging;
pub use service::{LogisticsService, Pairing, WorkflowPolicy};
