//! Loosely-typed field values to bound statement parameters
//!
//! Upstream field values arrive as JSON. Each value is converted according
//! to the type of the column it is written to:
//! - numeric columns never stay unset; empty or unparsable input binds zero
//! - timestamps parse `yyyy-MM-dd HH:mm:ss`; empty input binds the sentinel
//!   date and the token `now` binds the current time
//! - text columns bind the value as-is, `null` as the empty string

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, Utc};
use once_cell::sync::Lazy;
use pim_sync_core::{infer_column_type, ColumnType, FieldMap};
use regex::Regex;
use serde_json::Value;
use std::sync::Arc;

use crate::error::PersistenceError;
use crate::schema_cache::ColumnMap;
use crate::statement_cache::{BoundStatement, StatementHandle};
use crate::value::BoundValue;

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Stored for empty and unreadable timestamps
pub const SENTINEL_TIMESTAMP: &str = "0000-00-00 00:00:00";

const NOW_TOKEN: &str = "now";
const DEFAULT_TIME: &str = "00:00:00";

static LENIENT_TIMESTAMP: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(-?\d{1,4})-(\d{1,2})-(\d{1,2})[ T](\d{1,2}):(\d{1,2}):(\d{1,2})(?:\.\d+)?$").unwrap()
});

static DATE_ONLY: Lazy<Regex> = Lazy::new(|| Regex::new(r"^-?\d{1,4}-\d{1,2}-\d{1,2}$").unwrap());

/// Convert one raw value for a column of type `column_type`
pub fn coerce(column_type: ColumnType, value: &Value) -> BoundValue {
    match column_type {
        ColumnType::Int => BoundValue::Int(parse_int(value).unwrap_or(0)),
        ColumnType::BigInt => BoundValue::BigInt(parse_integer(value).unwrap_or(0)),
        ColumnType::Float => BoundValue::Float(parse_number(value).unwrap_or(0.0) as f32),
        ColumnType::Double => BoundValue::Double(parse_number(value).unwrap_or(0.0)),
        ColumnType::Timestamp => BoundValue::Timestamp(coerce_timestamp(value)),
        ColumnType::ListInt => BoundValue::ListInt(coerce_list(value)),
        ColumnType::Text => BoundValue::Text(match value {
            Value::Null => String::new(),
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }),
    }
}

/// Bind `row` against a prepared insert.
///
/// Columns of the statement that `row` does not carry stay unset. A column
/// in `row` that the statement does not bind means the statement is stale.
pub fn bind(
    handle: &Arc<StatementHandle>,
    row: &FieldMap,
    types: &ColumnMap,
) -> Result<BoundStatement, PersistenceError> {
    if let Some(column) = row.keys().find(|c| !handle.binds(c)) {
        return Err(PersistenceError::StaleStatement {
            table: handle.table.clone(),
            column: column.clone(),
        });
    }

    let values = handle
        .columns
        .iter()
        .map(|column| match row.get(column) {
            Some(value) => {
                let column_type = types
                    .get(column)
                    .copied()
                    .unwrap_or_else(|| infer_column_type(column));
                coerce(column_type, value)
            },
            None => BoundValue::Unset,
        })
        .collect();

    Ok(BoundStatement {
        handle: Arc::clone(handle),
        values,
    })
}

/// `0000-00-00 00:00:00` read with calendar rollover
pub fn sentinel_timestamp() -> NaiveDateTime {
    parse_lenient(SENTINEL_TIMESTAMP).unwrap_or(NaiveDateTime::MIN)
}

/// Parse `yyyy-MM-dd HH:mm:ss`.
///
/// Out-of-range fields roll over into the neighbouring unit, so month `0`
/// is December of the previous year and day `0` the last day of the
/// previous month.
pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    NaiveDateTime::parse_from_str(raw, TIMESTAMP_FORMAT)
        .ok()
        .or_else(|| parse_lenient(raw))
}

fn parse_lenient(raw: &str) -> Option<NaiveDateTime> {
    let caps = LENIENT_TIMESTAMP.captures(raw)?;
    let field = |i: usize| caps.get(i).and_then(|m| m.as_str().parse::<i64>().ok());
    let (year, month, day) = (field(1)?, field(2)?, field(3)?);
    let (hour, minute, second) = (field(4)?, field(5)?, field(6)?);

    let months = year * 12 + (month - 1);
    let first = NaiveDate::from_ymd_opt(
        i32::try_from(months.div_euclid(12)).ok()?,
        u32::try_from(months.rem_euclid(12) + 1).ok()?,
        1,
    )?;
    first
        .and_hms_opt(0, 0, 0)?
        .checked_add_signed(Duration::days(day - 1))?
        .checked_add_signed(Duration::seconds(hour * 3600 + minute * 60 + second))
}

fn coerce_timestamp(value: &Value) -> NaiveDateTime {
    let raw = match value {
        Value::Null => return sentinel_timestamp(),
        Value::Number(n) => {
            return n
                .as_i64()
                .and_then(DateTime::<Utc>::from_timestamp_millis)
                .map(|dt| dt.naive_utc())
                .unwrap_or_else(sentinel_timestamp);
        },
        Value::String(s) => s.trim(),
        _ => return sentinel_timestamp(),
    };

    if raw.is_empty() {
        return sentinel_timestamp();
    }
    if raw.eq_ignore_ascii_case(NOW_TOKEN) {
        return now_millis();
    }
    if let Some(ts) = parse_timestamp(raw) {
        return ts;
    }
    if DATE_ONLY.is_match(raw) {
        if let Some(ts) = parse_timestamp(&format!("{} {}", raw, DEFAULT_TIME)) {
            return ts;
        }
    }

    tracing::warn!(value = %raw, "Unreadable timestamp, storing sentinel date");
    sentinel_timestamp()
}

/// Current time at the cluster's millisecond precision
fn now_millis() -> NaiveDateTime {
    let now = Utc::now();
    DateTime::<Utc>::from_timestamp_millis(now.timestamp_millis())
        .unwrap_or(now)
        .naive_utc()
}

fn parse_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
    .filter(|n| n.is_finite())
}

/// Exact integer; decimals and out-of-range values do not parse
fn parse_integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        Value::Bool(b) => Some(i64::from(*b)),
        _ => None,
    }
}

fn parse_int(value: &Value) -> Option<i32> {
    match value {
        Value::String(s) => s.trim().parse::<i32>().ok(),
        other => parse_integer(other).and_then(|n| i32::try_from(n).ok()),
    }
}

fn coerce_list(value: &Value) -> Vec<i32> {
    match value {
        Value::Array(items) => items
            .iter()
            .filter_map(parse_int)
            .collect(),
        Value::String(s) => s
            .split(',')
            .filter_map(|part| part.trim().parse::<i32>().ok())
            .collect(),
        Value::Number(_) => parse_int(value).into_iter().collect(),
        _ => Vec::new(),
    }
}
