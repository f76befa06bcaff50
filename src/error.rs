//! Internal error type for the engine.
//!
//! Every fallible operation inside the store, authenticator, policy engine
//! and persistence adapter returns `Result<T, EngineError>`. The dispatcher
//! is the only place an `EngineError` is converted to the wire-level
//! `EfiStatus` (see [`crate::status::EfiStatus`]); nothing upstream of the
//! dispatcher should ever construct an `EfiStatus` directly.

use thiserror::Error;

use crate::status::EfiStatus;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("variable not found")]
    NotFound,

    #[error("caller-supplied buffer too small, need {required} bytes")]
    BufferTooSmall { required: usize },

    #[error("invalid parameter: {0}")]
    InvalidParameter(&'static str),

    #[error("storage quota exceeded")]
    OutOfResources,

    #[error("write rejected in runtime phase")]
    WriteProtected,

    #[error("authentication or monotonicity check failed: {0}")]
    SecurityViolation(&'static str),

    #[error("unsupported attribute or opcode: {0}")]
    Unsupported(&'static str),

    #[error("persistence backend failure: {0}")]
    PersistenceFailure(String),
}

impl EngineError {
    pub fn to_status(&self) -> EfiStatus {
        match self {
            EngineError::NotFound => EfiStatus::NotFound,
            EngineError::BufferTooSmall { .. } => EfiStatus::BufferTooSmall,
            EngineError::InvalidParameter(_) => EfiStatus::InvalidParameter,
            EngineError::OutOfResources => EfiStatus::OutOfResources,
            EngineError::WriteProtected => EfiStatus::WriteProtected,
            EngineError::SecurityViolation(_) => EfiStatus::SecurityViolation,
            EngineError::Unsupported(_) => EfiStatus::Unsupported,
            EngineError::PersistenceFailure(_) => EfiStatus::DeviceError,
        }
    }
}
