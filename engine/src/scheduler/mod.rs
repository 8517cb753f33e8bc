// Scheduler module: lifecycle orchestration, trigger processing and the
// periodic housekeeping sweep

pub mod engine;
pub mod housekeeping;
pub mod triggers;

pub use engine::{Engine, NewJob};
pub use housekeeping::Housekeeper;
