// src/error.rs

use thiserror::Error;

/// Root causes the engine reports. Wrapped in `anyhow::Error` at the API
/// boundary; callers that care about the kind can `downcast_ref` it.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("Capture source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Chop points must be strictly increasing and inside the buffer")]
    InvalidChopPoints,
}

/// True when `err` was caused by the given engine error kind.
pub fn is_engine_error(err: &anyhow::Error, kind: &EngineError) -> bool {
    match err.downcast_ref::<EngineError>() {
        Some(e) => std::mem::discriminant(e) == std::mem::discriminant(kind),
        None => false,
    }
}
