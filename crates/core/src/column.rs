//! Column types and table schema descriptors
//!
//! Column types are advisory: a column created on demand gets its type from
//! its name alone (see [`infer_column_type`]), never from the value that
//! triggered the creation.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Column names that always hold timestamps
pub const DATE_FIELDS: &[&str] = &[
    "CreationDate",
    "LastChange",
    "LastModified",
    "ValidFrom",
    "ValidTo",
    "PublishDate",
    "CheckoutDate",
    "_LastWritten",
    "_InsertTime",
];

/// Column names that always hold integer flags
pub const INT_FLAG_FIELDS: &[&str] = &[
    "_IsCreated",
    "IsFolder",
    "IsLink",
    "IsDefault",
    "IsInherited",
    "IsActive",
    "IsLocked",
    "SortOrder",
];

/// Wide-column type of a column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    #[default]
    Text,
    Int,
    BigInt,
    Float,
    Double,
    Timestamp,
    ListInt,
}

impl ColumnType {
    /// CQL spelling used in DDL
    pub fn cql_name(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Int => "int",
            Self::BigInt => "bigint",
            Self::Float => "float",
            Self::Double => "double",
            Self::Timestamp => "timestamp",
            Self::ListInt => "list<int>",
        }
    }

    /// Parse a CQL type name as reported by cluster metadata.
    ///
    /// Types the engine never creates (uuid, boolean, maps, ...) are treated
    /// as text for binding purposes.
    pub fn from_cql_name(name: &str) -> Self {
        let normalized: String = name
            .trim()
            .to_ascii_lowercase()
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect();
        match normalized.as_str() {
            "int" | "smallint" | "tinyint" => Self::Int,
            "bigint" | "counter" | "varint" => Self::BigInt,
            "float" => Self::Float,
            "double" | "decimal" => Self::Double,
            "timestamp" => Self::Timestamp,
            "list<int>" | "frozen<list<int>>" => Self::ListInt,
            _ => Self::Text,
        }
    }

    /// Parse a column type from a schema header value; empty means text
    pub fn from_header(value: &str) -> Self {
        if value.trim().is_empty() {
            return Self::Text;
        }
        Self::from_cql_name(value)
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Self::Int | Self::BigInt | Self::Float | Self::Double)
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.cql_name())
    }
}

/// Pick the type of a column created on demand from its name
pub fn infer_column_type(name: &str) -> ColumnType {
    if DATE_FIELDS.contains(&name) {
        ColumnType::Timestamp
    } else if INT_FLAG_FIELDS.contains(&name) {
        ColumnType::Int
    } else {
        ColumnType::Text
    }
}

/// A single column as observed on the cluster
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDescriptor {
    pub name: String,
    pub column_type: ColumnType,
}

impl ColumnDescriptor {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
        }
    }
}

/// Columns of one physical table
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    pub table_name: String,
    pub columns: BTreeMap<String, ColumnDescriptor>,
}

impl TableSchema {
    pub fn new(table_name: impl Into<String>) -> Self {
        Self {
            table_name: table_name.into(),
            columns: BTreeMap::new(),
        }
    }

    pub fn from_types(table_name: impl Into<String>, types: &BTreeMap<String, ColumnType>) -> Self {
        let columns = types
            .iter()
            .map(|(name, ty)| (name.clone(), ColumnDescriptor::new(name.clone(), *ty)))
            .collect();
        Self {
            table_name: table_name.into(),
            columns,
        }
    }

    pub fn column_type(&self, name: &str) -> Option<ColumnType> {
        self.columns.get(name).map(|c| c.column_type)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.columns.contains_key(name)
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}
