//! Driver error classification
//!
//! Every recovery decision in the engine (wait for hosts, repair a column,
//! evict a prepared statement, fall back to serial writes) is taken on the
//! text of a driver error. All of that matching lives here so that changes
//! in driver or server wording only have to be handled in one place.

use once_cell::sync::Lazy;
use regex::Regex;

/// What the engine should do about a failed call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorClass {
    /// No node reachable; wait for the cluster and retry
    NoHostAvailable,
    /// Write names a column the table does not have yet
    MissingColumn(String),
    /// Prepared statement does not bind a column being written
    StaleStatement,
    /// Logged batch exceeds the cluster's size ceiling
    BatchTooLarge,
    /// Engine refuses to drop this column
    CannotDropColumn,
    /// Column to drop does not exist
    ColumnNotFound,
    /// Column to add already exists
    ColumnExists,
    /// Target table does not exist
    UnknownTable,
    Other,
}

static MISSING_COLUMN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)(?:undefined column name|unknown identifier)\s+("(?:[^"]|"")+"|[^\s,;]+)"#)
        .unwrap()
});

const NO_HOST_PATTERNS: &[&str] = &[
    "no host available",
    "no hosts available",
    "all host(s) tried for query failed",
    "no connections in the pool",
    "unable to connect to any",
    "could not connect to any",
];

const COLUMN_EXISTS_PATTERNS: &[&str] = &[
    "conflicts with an existing column",
    "already exists",
];

const UNKNOWN_TABLE_PATTERNS: &[&str] = &["unconfigured table", "unconfigured columnfamily"];

/// Classify a driver error message
pub fn classify(message: &str) -> ErrorClass {
    let lowered = message.to_lowercase();

    if NO_HOST_PATTERNS.iter().any(|p| lowered.contains(p)) {
        return ErrorClass::NoHostAvailable;
    }
    if lowered.contains("batch too large") {
        return ErrorClass::BatchTooLarge;
    }
    if lowered.contains("is not a column defined in this metadata") {
        return ErrorClass::StaleStatement;
    }
    if COLUMN_EXISTS_PATTERNS.iter().any(|p| lowered.contains(p)) {
        return ErrorClass::ColumnExists;
    }
    if lowered.contains("was not found in table") {
        return ErrorClass::ColumnNotFound;
    }
    if lowered.contains("cannot drop") {
        return ErrorClass::CannotDropColumn;
    }
    if UNKNOWN_TABLE_PATTERNS.iter().any(|p| lowered.contains(p)) {
        return ErrorClass::UnknownTable;
    }
    if let Some(column) = missing_column(message) {
        return ErrorClass::MissingColumn(column);
    }
    ErrorClass::Other
}

/// Extract the column name from an "undefined column" / "unknown identifier" message
pub fn missing_column(message: &str) -> Option<String> {
    let captures = MISSING_COLUMN.captures(message)?;
    let raw = captures.get(1)?.as_str();
    let name = match raw.strip_prefix('"').and_then(|r| r.strip_suffix('"')) {
        Some(quoted) => quoted.replace("\"\"", "\""),
        None => raw.to_string(),
    };
    if name.is_empty() {
        None
    } else {
        Some(name)
    }
}
