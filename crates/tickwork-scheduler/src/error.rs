use thiserror::Error;

/// Errors that can occur within the scheduler subsystem.
///
/// None of these escape registration or re-arming: the engine logs them and
/// records them on the affected entry. Only [`crate::JobScheduler::start`] and
/// the raw [`crate::WorkerPool`] submission API return them directly.
#[derive(Debug, Clone, Error)]
pub enum SchedulerError {
    /// A schedule literal could not be used (empty interval, zero seconds…).
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A fixed-delay literal is not a valid duration.
    #[error("Invalid duration: {0}")]
    InvalidDuration(String),

    /// The calendar expression could not be parsed.
    #[error("Invalid cron expression '{expression}': {reason}")]
    InvalidCron { expression: String, reason: String },

    /// The pool queue is full; the submission was rejected.
    #[error("Pool queue is full ({capacity} pending submissions)")]
    Capacity { capacity: usize },

    /// The task is already registered under the other scheduling mode.
    #[error("Task '{task}' is already registered with another schedule mode")]
    DualRegistration { task: String },

    /// The pool runtime could not be built.
    #[error("Runtime error: {0}")]
    Runtime(String),

    /// The pool has been shut down or never started.
    #[error("Scheduler is not running")]
    NotRunning,

    #[error("Scheduler already started")]
    AlreadyStarted,
}

impl SchedulerError {
    /// Short error code string used in logs and status reports.
    pub fn code(&self) -> &'static str {
        match self {
            SchedulerError::Configuration(_) => "CONFIGURATION_ERROR",
            SchedulerError::InvalidDuration(_) => "INVALID_DURATION",
            SchedulerError::InvalidCron { .. } => "INVALID_CRON",
            SchedulerError::Capacity { .. } => "CAPACITY_ERROR",
            SchedulerError::DualRegistration { .. } => "DUAL_REGISTRATION",
            SchedulerError::Runtime(_) => "RUNTIME_ERROR",
            SchedulerError::NotRunning => "NOT_RUNNING",
            SchedulerError::AlreadyStarted => "ALREADY_STARTED",
        }
    }
}

impl From<tickwork_core::CoreError> for SchedulerError {
    fn from(e: tickwork_core::CoreError) -> Self {
        match e {
            tickwork_core::CoreError::InvalidDuration(literal) => {
                SchedulerError::InvalidDuration(literal)
            }
            tickwork_core::CoreError::Config(msg) => SchedulerError::Configuration(msg),
        }
    }
}

impl From<std::io::Error> for SchedulerError {
    fn from(e: std::io::Error) -> Self {
        SchedulerError::Runtime(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
