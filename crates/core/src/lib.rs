//! Core domain types for the PIM synchronizer
//!
//! This crate provides the types shared by every other crate:
//! - Entity kinds and the records the upstream feed hands to the engine
//! - Column types and descriptors for the wide-column schema
//! - Name-based column type inference for columns created on demand
//! - Error types

pub mod column;
pub mod entity;
pub mod error;

pub use column::{infer_column_type, ColumnDescriptor, ColumnType, TableSchema};
pub use entity::{ChangeEvent, ChangeOp, EntityKind, EntityRecord, FieldMap, LanguageMap};
pub use error::{CoreError, Result};
