//! Error types for the core crate

use thiserror::Error;

pub type Result<T> = std::result::Result<T, CoreError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    #[error("Unknown entity kind: {0}")]
    UnknownEntityKind(String),

    #[error("Unknown change operation: {0}")]
    UnknownOperation(String),

    #[error("Invalid change event: {0}")]
    InvalidEvent(String),
}
