//! Persistence error types

use scylla::transport::errors::{NewSessionError, QueryError};
use thiserror::Error;

use crate::classify::{classify, ErrorClass};

/// Error reported by the cluster driver, kept as the driver's message
///
/// Recovery decisions are taken on the message text through
/// [`classify`](crate::classify::classify).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct DriverError {
    message: String,
}

impl DriverError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn class(&self) -> ErrorClass {
        classify(&self.message)
    }
}

impl From<QueryError> for DriverError {
    fn from(err: QueryError) -> Self {
        Self::new(err.to_string())
    }
}

impl From<NewSessionError> for DriverError {
    fn from(err: NewSessionError) -> Self {
        Self::new(err.to_string())
    }
}

#[derive(Error, Debug)]
pub enum PersistenceError {
    /// Connection could not be established within the configured retries.
    /// Callers may treat this one as fatal.
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Driver error: {0}")]
    Driver(#[from] DriverError),

    #[error("Schema error: {0}")]
    SchemaError(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("{column} is not a column defined in this metadata (table {table})")]
    StaleStatement { table: String, column: String },

    #[error("Column repair on {table} gave up after {attempts} attempts (last column: {column})")]
    RepairExhausted {
        table: String,
        column: String,
        attempts: u32,
    },
}

impl PersistenceError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Connection(_))
    }

    /// Recovery class of this error
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Driver(e) => e.class(),
            Self::StaleStatement { .. } => ErrorClass::StaleStatement,
            _ => ErrorClass::Other,
        }
    }
}
