use thiserror::Error;

#[derive(Debug, Error)]
pub enum CenturionError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Lock error: {0}")]
    Lock(String),

    #[error("Egress policy violation: {0}")]
    PolicyViolation(String),

    #[error("Payload too large: {size} bytes (max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("LLM provider unavailable: {0}")]
    LlmUnavailable(String),

    #[error("External tool failure: {0}")]
    ExternalFailure(String),

    #[error("Channel error ({channel}): {reason}")]
    Channel { channel: String, reason: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Request timeout after {ms}ms")]
    Timeout { ms: u64 },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CenturionError {
    /// Short error code surfaced in tool results and log fields.
    pub fn code(&self) -> &'static str {
        match self {
            CenturionError::Config(_) => "CONFIG_ERROR",
            CenturionError::InvalidInput(_) => "INVALID_INPUT",
            CenturionError::Database(_) => "DATABASE_ERROR",
            CenturionError::Lock(_) => "LOCK_ERROR",
            CenturionError::PolicyViolation(_) => "POLICY_VIOLATION",
            CenturionError::PayloadTooLarge { .. } => "PAYLOAD_TOO_LARGE",
            CenturionError::LlmUnavailable(_) => "LLM_UNAVAILABLE",
            CenturionError::ExternalFailure(_) => "EXTERNAL_FAILURE",
            CenturionError::Channel { .. } => "CHANNEL_ERROR",
            CenturionError::Serialization(_) => "SERIALIZATION_ERROR",
            CenturionError::Io(_) => "IO_ERROR",
            CenturionError::Timeout { .. } => "TIMEOUT",
            CenturionError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl From<rusqlite::Error> for CenturionError {
    fn from(e: rusqlite::Error) -> Self {
        CenturionError::Database(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CenturionError>;
