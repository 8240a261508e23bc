use crate::infrastructure::bluetooth::transport::TransportError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BridgeError {
    /// Report shorter than the fixed layout. Dropped without touching the baseline.
    #[error("malformed input report: {len} bytes (need at least {min})")]
    MalformedReport { len: usize, min: usize },

    #[error("transport failure: {0}")]
    Transport(#[from] TransportError),

    #[error("no controller found within {timeout_ms} ms")]
    DeviceNotFound { timeout_ms: u64 },

    #[error("keyboard sink error: {0}")]
    Keyboard(String),
}

pub type BridgeResult<T> = std::result::Result<T, BridgeError>;
