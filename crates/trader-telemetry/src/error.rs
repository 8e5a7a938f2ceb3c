//! Telemetry error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("Logging initialization failed: {0}")]
    Init(String),

    #[error("Serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

pub type TelemetryResult<T> = Result<T, TelemetryError>;
