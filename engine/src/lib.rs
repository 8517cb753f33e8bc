// Household chore scheduling engine: job lifecycle, recurrence triggers and
// fair assignment across team members

pub mod assigner;
pub mod availability;
pub mod clock;
pub mod config;
pub mod errors;
pub mod lifecycle;
pub mod models;
pub mod notify;
pub mod random;
pub mod rules;
pub mod scheduler;
pub mod storage;
pub mod telemetry;

pub use errors::{EngineError, EngineResult};
pub use scheduler::{Engine, Housekeeper, NewJob};
