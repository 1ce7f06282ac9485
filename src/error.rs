/// Centralized error types for the synchronization pipeline
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    // Upstream payload errors
    #[error("Deserialization failed for '{field}': {message}")]
    Deserialization { field: String, message: String },

    // Network errors
    #[error("HTTP request failed: {status_code} {status_text}")]
    Http {
        status_code: i32,
        status_text: String,
        body: String,
    },

    // Fetch pool errors
    #[error("Fetch pool aborted: {0}")]
    PoolAborted(Box<SyncError>),

    // Storage errors
    #[error("Persistence failed: {0}")]
    Persistence(String),

    #[error("Instrument not found: {0}")]
    NotFound(String),

    // Coordinator errors
    #[error("Synchronization failed for instrument {instrument_id}")]
    SyncFailed {
        instrument_id: String,
        #[source]
        source: Box<SyncError>,
    },

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    // File I/O errors
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, SyncError>;

/// Status text used when the upstream never answered
pub const NO_RESPONSE_STATUS_TEXT: &str = "Did not get response from the backend server";

impl SyncError {
    pub fn deserialization(field: impl Into<String>, message: impl Into<String>) -> Self {
        SyncError::Deserialization {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Field named by a deserialization failure, looking through wrappers
    pub fn field(&self) -> Option<&str> {
        match self {
            SyncError::Deserialization { field, .. } => Some(field),
            SyncError::PoolAborted(inner) => inner.field(),
            SyncError::SyncFailed { source, .. } => source.field(),
            _ => None,
        }
    }

    /// Check if retrying the same call could succeed
    pub fn is_recoverable(&self) -> bool {
        match self {
            SyncError::Http { status_code, .. } => *status_code < 0 || *status_code >= 500,
            SyncError::PoolAborted(inner) => inner.is_recoverable(),
            SyncError::SyncFailed { source, .. } => source.is_recoverable(),
            SyncError::Persistence(_) => true,
            _ => false,
        }
    }

    /// Get error code for logging/monitoring
    pub fn error_code(&self) -> &str {
        match self {
            SyncError::Deserialization { .. } => "DATA_001",
            SyncError::Http { .. } => "NET_001",
            SyncError::PoolAborted(_) => "POOL_001",
            SyncError::Persistence(_) => "STORE_001",
            SyncError::NotFound(_) => "STORE_002",
            SyncError::SyncFailed { .. } => "SYNC_001",
            SyncError::Config(_) => "CFG_001",
            SyncError::Io(_) => "FILE_001",
            SyncError::Internal(_) => "INT_001",
        }
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(e: reqwest::Error) -> Self {
        match e.status() {
            Some(status) => SyncError::Http {
                status_code: i32::from(status.as_u16()),
                status_text: status.canonical_reason().unwrap_or_default().to_string(),
                body: e.to_string(),
            },
            None => SyncError::Http {
                status_code: -1,
                status_text: NO_RESPONSE_STATUS_TEXT.to_string(),
                body: e.to_string(),
            },
        }
    }
}

impl From<sqlx::Error> for SyncError {
    fn from(e: sqlx::Error) -> Self {
        SyncError::Persistence(e.to_string())
    }
}
