//! `tickwork-core` — configuration, errors and the small parsing helpers
//! shared by the scheduler and the `tickwork` binary.

pub mod config;
pub mod error;
pub mod time;
pub mod vars;

pub use config::{DualRegistration, JobConfig, SchedulerConfig, TickworkConfig};
pub use error::{CoreError, Result};
pub use time::parse_duration;
pub use vars::{Resolver, VariableResolver};
