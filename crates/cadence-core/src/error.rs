use thiserror::Error;

#[derive(Debug, Error)]
pub enum CadenceError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Logging setup failed: {0}")]
    Logging(String),
}

impl CadenceError {
    /// Short, stable error code for log fields and host-side matching.
    pub fn code(&self) -> &'static str {
        match self {
            CadenceError::Config(_) => "CONFIG_ERROR",
            CadenceError::Logging(_) => "LOGGING_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, CadenceError>;
