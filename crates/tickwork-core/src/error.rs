use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid duration pattern: {0}")]
    InvalidDuration(String),
}

impl CoreError {
    /// Short, stable error code for logs and reports.
    pub fn code(&self) -> &'static str {
        match self {
            CoreError::Config(_) => "CONFIG_ERROR",
            CoreError::InvalidDuration(_) => "INVALID_DURATION",
        }
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
