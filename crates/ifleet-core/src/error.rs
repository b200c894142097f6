use thiserror::Error;

pub type Result<T> = std::result::Result<T, FleetError>;

/// Error taxonomy for fleet operations.
///
/// Transient failures (daemon unreachable, round-trip timed out) are
/// retryable; failures reported by the device itself and caller mistakes
/// are not.
#[derive(Debug, Error)]
pub enum FleetError {
    #[error("connection to device {udid} failed: {message}")]
    Connection { udid: String, message: String },

    #[error("{operation} timed out after {seconds}s")]
    Timeout { operation: String, seconds: u64 },

    #[error("device command failed: {0}")]
    Command(String),

    #[error("device not found: {0}")]
    DeviceNotFound(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}

impl FleetError {
    pub fn connection(udid: impl Into<String>, message: impl Into<String>) -> Self {
        FleetError::Connection {
            udid: udid.into(),
            message: message.into(),
        }
    }

    pub fn timeout(operation: impl Into<String>, seconds: u64) -> Self {
        FleetError::Timeout {
            operation: operation.into(),
            seconds,
        }
    }

    /// Whether a retry has any chance of succeeding.
    pub fn is_retryable(&self) -> bool {
        match self {
            FleetError::Connection { .. } | FleetError::Timeout { .. } => true,
            FleetError::Http(e) => e.is_connect() || e.is_timeout(),
            _ => false,
        }
    }
}
