//! Schema-evolving writes
//!
//! Turns entity records into inserts against tables whose columns are not
//! known in advance. A write that names a column the table lacks is repaired
//! in place: the column is added with a type inferred from its name and the
//! write is attempted again. A write against a table that does not exist yet
//! creates the table from its kind's base layout first.
//!
//! Table shapes differ per entity kind and are described by a fixed
//! [`KindStrategy`] table, one entry per [`EntityKind`].

mod configuration;
mod item;
mod language;
mod mapping;
pub mod naming;
mod reference;
mod subtable;

use pim_sync_core::{infer_column_type, ColumnType, EntityKind, EntityRecord, FieldMap, LanguageMap};
use serde_json::{Map, Value};
use std::sync::Arc;

use crate::classify::ErrorClass;
use crate::coercer::coerce;
use crate::context::StorageContext;
use crate::coordinator::WriteCoordinator;
use crate::error::PersistenceError;
use crate::schema::{PrimaryKey, Statement};
use crate::schema_cache::ColumnMap;
use crate::schema_ops::SchemaOps;
use crate::value::BoundValue;

pub use naming::{base_entity_name, header_key, parse_header_key, table_name};

pub(crate) const ID: &str = "ID";
pub(crate) const LANGUAGE_ID: &str = "LanguageID";
pub(crate) const STATE_ID: &str = "StateID";
pub(crate) const WORKFLOW_ID: &str = "WorkflowID";

/// Columns and key of a freshly created table
#[derive(Debug, Clone, PartialEq)]
pub struct TableLayout {
    pub columns: Vec<(String, ColumnType)>,
    pub primary_key: PrimaryKey,
}

impl TableLayout {
    pub(crate) fn new(columns: &[(&str, ColumnType)], primary_key: PrimaryKey) -> Self {
        Self {
            columns: columns
                .iter()
                .map(|(name, ty)| (name.to_string(), *ty))
                .collect(),
            primary_key,
        }
    }

    fn push_missing(&mut self, name: &str, column_type: ColumnType) {
        if !self.columns.iter().any(|(c, _)| c == name) {
            self.columns.push((name.to_string(), column_type));
        }
    }
}

/// Extra objects created next to a table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Secondary {
    None,
    /// Materialized views per indexed field, text-search indexes
    ItemViews,
    /// Default-flag and short-name indexes
    LanguageIndexes,
}

/// Follow-up work after a row delete
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Cascade {
    None,
    /// Clear `WorkflowID`/`StateID` on item rows in the deleted state
    WorkflowState,
    /// Delete item rows of the deleted language
    LanguageRows,
}

/// How one entity kind maps onto tables
pub(crate) struct KindStrategy {
    pub kind: EntityKind,
    /// Rows carry `LanguageID` taken from the language map key
    pub language_scoped: bool,
    /// Header columns are ignored; the layout is all there is
    pub fixed_shape: bool,
    pub layout: fn(&str) -> TableLayout,
    /// Bookkeeping columns present in every table of this kind
    pub meta_columns: &'static [(&'static str, ColumnType)],
    /// Fill bookkeeping values into a row about to be written
    pub stamp: fn(&mut FieldMap),
    pub secondary: Secondary,
    pub cascade: fn(&str) -> Cascade,
}

pub(crate) fn strategy(kind: EntityKind) -> &'static KindStrategy {
    match kind {
        EntityKind::Item => &item::STRATEGY,
        EntityKind::Reference => &reference::STRATEGY,
        EntityKind::Subtable => &subtable::STRATEGY,
        EntityKind::Mapping => &mapping::STRATEGY,
        EntityKind::Configuration => &configuration::STRATEGY,
        EntityKind::Language => &language::STRATEGY,
    }
}

pub(crate) fn no_stamp(_row: &mut FieldMap) {}

pub(crate) fn no_cascade(_entity: &str) -> Cascade {
    Cascade::None
}

#[derive(Clone)]
pub struct SchemaEvolver {
    coordinator: WriteCoordinator,
    ops: SchemaOps,
}

impl SchemaEvolver {
    pub fn new(coordinator: WriteCoordinator) -> Self {
        let ops = SchemaOps::new(coordinator.clone());
        Self { coordinator, ops }
    }

    pub fn schema_ops(&self) -> &SchemaOps {
        &self.ops
    }

    fn ctx(&self) -> &Arc<StorageContext> {
        self.coordinator.context()
    }

    pub fn table_name(&self, kind: EntityKind, entity: &str) -> String {
        naming::table_name(kind, entity)
    }

    pub fn header_key(&self, kind: EntityKind, entity: &str) -> String {
        naming::header_key(kind, entity)
    }

    /// Base layout of the table `kind`/`entity` is written to
    pub fn layout(&self, kind: EntityKind, entity: &str) -> TableLayout {
        let strategy = strategy(kind);
        let mut layout = (strategy.layout)(entity);
        for (name, column_type) in strategy.meta_columns {
            layout.push_missing(name, *column_type);
        }
        layout
    }

    /// Create (or widen) the table for `entity` from a schema header.
    ///
    /// `header` maps field names to column type names; an empty type name is
    /// text. Columns of an existing table are never changed or removed, only
    /// missing ones are added. Returns the table's columns afterwards.
    pub async fn create_table_from_headers(
        &self,
        kind: EntityKind,
        entity: &str,
        header: &Map<String, Value>,
    ) -> Result<ColumnMap, PersistenceError> {
        let strategy = strategy(kind);
        let table = naming::table_name(kind, entity);
        let mut layout = self.layout(kind, entity);

        if strategy.fixed_shape {
            if !header.is_empty() {
                tracing::debug!(table = %table, "Fixed-shape table, header columns ignored");
            }
        } else {
            for (name, type_name) in header {
                let column_type = ColumnType::from_header(type_name.as_str().unwrap_or_default());
                layout.push_missing(name, column_type);
            }
        }

        let columns = if self.ops.check_table(&table).await? {
            let added = self.ops.ensure_columns(&table, &layout.columns).await?;
            if added > 0 {
                tracing::info!(table = %table, added, "Widened existing table from header");
            }
            self.ops.get_columns(&table).await?
        } else {
            self.ops
                .create_table(&table, &layout.columns, &layout.primary_key)
                .await?
        };

        self.create_secondary(kind, entity, &table, &columns).await?;
        Ok(columns)
    }

    /// Apply a header document keyed by [`header_key`]; returns the number of
    /// tables processed
    pub async fn create_tables_from_header_document(&self, document: &Value) -> Result<usize, PersistenceError> {
        let headers = document
            .as_object()
            .ok_or_else(|| PersistenceError::InvalidData("header document is not a JSON object".to_string()))?;

        let mut applied = 0;
        for (key, header) in headers {
            let Some((kind, entity)) = naming::parse_header_key(key) else {
                tracing::warn!(key = %key, "Skipping header with unrecognized key");
                continue;
            };
            let header = header.as_object().ok_or_else(|| {
                PersistenceError::InvalidData(format!("header '{}' is not a JSON object", key))
            })?;
            self.create_table_from_headers(kind, &entity, header).await?;
            applied += 1;
        }
        Ok(applied)
    }

    /// Write one entity's rows, one per language; `true` on success
    pub async fn insert_item_data(&self, kind: EntityKind, entity: &str, data: &LanguageMap) -> bool {
        let record = EntityRecord::new(kind, entity).with_languages(data.clone());
        self.write_record(&record).await
    }

    /// Write a record, repairing the schema as needed; `true` on success.
    ///
    /// Failures are logged, not returned.
    pub async fn write_record(&self, record: &EntityRecord) -> bool {
        match self.try_write_record(record).await {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(
                    kind = %record.entity_kind,
                    entity = %record.entity,
                    error = %e,
                    "Write failed"
                );
                false
            },
        }
    }

    /// Write a record with the column-repair loop.
    ///
    /// Each missing column or missing table costs one repair; the loop gives
    /// up after `max_column_repairs` repairs. Host outages are waited out
    /// below this level and do not count.
    pub async fn try_write_record(&self, record: &EntityRecord) -> Result<(), PersistenceError> {
        let kind = record.entity_kind;
        let table = naming::table_name(kind, &record.entity);
        let rows = self.build_rows(record)?;
        let limit = self.ctx().cluster().max_column_repairs;
        let mut repairs = 0u32;

        loop {
            let error = match self.persist(&table, &rows).await {
                Ok(()) => return Ok(()),
                Err(e) => e,
            };

            let missing_column = match error.class() {
                ErrorClass::MissingColumn(column) => Some(column),
                ErrorClass::UnknownTable => None,
                _ => return Err(error),
            };

            repairs += 1;
            if repairs > limit {
                return Err(PersistenceError::RepairExhausted {
                    table,
                    column: missing_column.unwrap_or_default(),
                    attempts: limit,
                });
            }

            match missing_column {
                Some(column) => {
                    self.repair_column(kind, &record.entity, &table, &column)
                        .await?
                },
                None => {
                    tracing::warn!(table = %table, "Table does not exist, creating it");
                    self.create_table_from_headers(kind, &record.entity, &Map::new())
                        .await?;
                },
            }
        }
    }

    /// Delete the row(s) addressed by `keys`; `true` on success
    pub async fn delete_row(&self, kind: EntityKind, entity: &str, keys: &FieldMap) -> bool {
        match self.try_delete_row(kind, entity, keys).await {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(kind = %kind, entity = %entity, error = %e, "Delete failed");
                false
            },
        }
    }

    /// Delete by key and run the kind's cascade.
    ///
    /// `keys` must cover the partition key and may name a prefix of the
    /// clustering columns. Language-scoped items addressed without a
    /// `LanguageID` are deleted in every known language.
    pub async fn try_delete_row(
        &self,
        kind: EntityKind,
        entity: &str,
        keys: &FieldMap,
    ) -> Result<(), PersistenceError> {
        let strategy = strategy(kind);
        let table = naming::table_name(kind, entity);
        let layout = (strategy.layout)(entity);
        let types = self.ops.get_columns(&table).await?;

        if types.is_empty() {
            tracing::debug!(table = %table, "Table does not exist, nothing to delete");
        } else {
            let across_languages = layout.primary_key.partition.iter().any(|c| c == LANGUAGE_ID)
                && !keys.contains_key(LANGUAGE_ID);
            if across_languages {
                let languages = self.language_ids().await?;
                if languages.is_empty() {
                    return Err(PersistenceError::InvalidData(format!(
                        "no LanguageID given for {} and no languages known",
                        table
                    )));
                }
                for language in languages {
                    let mut scoped = keys.clone();
                    scoped.insert(LANGUAGE_ID.to_string(), language.to_json());
                    self.delete_by_key(&table, &layout.primary_key, &types, &scoped)
                        .await?;
                }
            } else {
                self.delete_by_key(&table, &layout.primary_key, &types, keys)
                    .await?;
            }
        }

        match (strategy.cascade)(entity) {
            Cascade::None => {},
            Cascade::WorkflowState => {
                if let Some(state) = keys.get(ID) {
                    let cleared = self.clear_workflow_state(state).await?;
                    tracing::info!(state = %state, cleared, "Cleared deleted workflow state from items");
                }
            },
            Cascade::LanguageRows => {
                if let Some(language) = keys.get(ID) {
                    let deleted = self.delete_language_rows(language).await?;
                    tracing::info!(language = %language, deleted, "Deleted item rows of removed language");
                }
            },
        }
        Ok(())
    }

    /// `TRUNCATE` the table of `entity`; `true` on success
    pub async fn truncate_table(&self, kind: EntityKind, entity: &str) -> bool {
        let table = naming::table_name(kind, entity);
        match self.ops.truncate(&table).await {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(table = %table, error = %e, "Truncate failed");
                false
            },
        }
    }

    /// One row per language, keys and bookkeeping columns filled in
    fn build_rows(&self, record: &EntityRecord) -> Result<Vec<FieldMap>, PersistenceError> {
        let strategy = strategy(record.entity_kind);
        let layout = (strategy.layout)(&record.entity);

        let mut rows = Vec::new();
        if record.language_scoped_attributes.is_empty() {
            rows.push(record.primary_key_fields.clone());
        }
        for (language, attributes) in &record.language_scoped_attributes {
            let mut row = record.primary_key_fields.clone();
            if strategy.language_scoped {
                row.insert(LANGUAGE_ID.to_string(), language_value(language));
            }
            row.extend(attributes.iter().map(|(k, v)| (k.clone(), v.clone())));
            rows.push(row);
        }

        for row in &mut rows {
            (strategy.stamp)(row);
            if let Some(missing) = layout.primary_key.columns().find(|c| !row.contains_key(*c)) {
                return Err(PersistenceError::InvalidData(format!(
                    "{} {} row has no value for key column {}",
                    strategy.kind, record.entity, missing
                )));
            }
        }
        Ok(rows)
    }

    async fn persist(&self, table: &str, rows: &[FieldMap]) -> Result<(), PersistenceError> {
        let statements = self.coordinator.bind_rows(table, rows).await?;
        self.coordinator.execute_batch(statements).await
    }

    async fn repair_column(
        &self,
        kind: EntityKind,
        entity: &str,
        table: &str,
        column: &str,
    ) -> Result<(), PersistenceError> {
        let column_type = infer_column_type(column);
        metrics::counter!("pim_sync_column_repairs_total").increment(1);
        tracing::info!(table = %table, column = %column, column_type = %column_type, "Repairing missing column");

        self.ops.add_column(table, column, column_type).await?;

        let sync = &self.ctx().sync;
        let indexed = sync.indexed_fields.iter().any(|f| f == column)
            || sync.text_search_fields.iter().any(|f| f == column);
        if indexed {
            let columns = self.ops.get_columns(table).await?;
            self.create_secondary(kind, entity, table, &columns).await?;
        }
        Ok(())
    }

    async fn create_secondary(
        &self,
        kind: EntityKind,
        entity: &str,
        table: &str,
        columns: &ColumnMap,
    ) -> Result<(), PersistenceError> {
        match strategy(kind).secondary {
            Secondary::None => Ok(()),
            Secondary::ItemViews => self.create_item_objects(entity, table, columns).await,
            Secondary::LanguageIndexes => self.create_language_indexes(table).await,
        }
    }

    async fn delete_by_key(
        &self,
        table: &str,
        primary_key: &PrimaryKey,
        types: &ColumnMap,
        keys: &FieldMap,
    ) -> Result<(), PersistenceError> {
        let filters = key_filters(table, primary_key, types, keys)?;
        self.coordinator
            .execute_statement(&Statement::Delete {
                table: table.to_string(),
                filters,
            })
            .await?;
        tracing::debug!(table = %table, "Row deleted");
        Ok(())
    }

    /// IDs in the language table; empty when there is none
    async fn language_ids(&self) -> Result<Vec<BoundValue>, PersistenceError> {
        let select = Statement::Select {
            table: naming::LANGUAGE_TABLE.to_string(),
            columns: vec![ID.to_string()],
            filters: Vec::new(),
            allow_filtering: false,
        };
        match self.coordinator.execute_statement(&select).await {
            Ok(rows) => Ok(rows
                .into_iter()
                .filter_map(|mut row| row.remove(ID))
                .filter(|id| !id.is_null_or_unset())
                .collect()),
            Err(e) if e.class() == ErrorClass::UnknownTable => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }

    fn column_type(types: &ColumnMap, column: &str) -> ColumnType {
        types
            .get(column)
            .copied()
            .unwrap_or_else(|| infer_column_type(column))
    }
}

/// `WHERE` filters for a delete: whole partition key, then a clustering prefix
fn key_filters(
    table: &str,
    primary_key: &PrimaryKey,
    types: &ColumnMap,
    keys: &FieldMap,
) -> Result<Vec<(String, BoundValue)>, PersistenceError> {
    let mut filters = Vec::new();
    for column in &primary_key.partition {
        let value = keys.get(column).ok_or_else(|| {
            PersistenceError::InvalidData(format!("delete on {} needs partition key {}", table, column))
        })?;
        filters.push((column.clone(), coerce(SchemaEvolver::column_type(types, column), value)));
    }
    for column in &primary_key.clustering {
        match keys.get(column) {
            Some(value) => filters.push((column.clone(), coerce(SchemaEvolver::column_type(types, column), value))),
            None => break,
        }
    }
    Ok(filters)
}

/// Language map keys are numeric IDs; anything else is kept as text
fn language_value(language: &str) -> Value {
    language
        .trim()
        .parse::<i64>()
        .map(Value::from)
        .unwrap_or_else(|_| Value::String(language.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_every_kind_has_a_strategy() {
        for kind in EntityKind::ALL {
            let strategy = strategy(kind);
            assert_eq!(strategy.kind, kind);
            let layout = (strategy.layout)("Pdmarticle");
            assert!(!layout.primary_key.is_empty());
            assert!(layout.primary_key.columns().all(|c| layout.columns.iter().any(|(n, _)| n == c)));
        }
    }

    #[test]
    fn test_key_filters_take_clustering_prefix() {
        let key = PrimaryKey::new(&["ItemID"], &["SourceType", "LanguageID", "AttributeID"]);
        let mut keys = FieldMap::new();
        keys.insert("ItemID".to_string(), json!("5"));
        keys.insert("SourceType".to_string(), json!("Pdmarticle"));
        keys.insert("AttributeID".to_string(), json!(9));

        let mut types = ColumnMap::new();
        types.insert("ItemID".to_string(), ColumnType::BigInt);
        types.insert("SourceType".to_string(), ColumnType::Text);

        let filters = key_filters("pdmarticle_reference", &key, &types, &keys).unwrap();
        assert_eq!(
            filters,
            vec![
                ("ItemID".to_string(), BoundValue::BigInt(5)),
                ("SourceType".to_string(), BoundValue::from("Pdmarticle")),
            ]
        );

        keys.remove("ItemID");
        assert!(key_filters("pdmarticle_reference", &key, &types, &keys).is_err());
    }

    #[test]
    fn test_language_value() {
        assert_eq!(language_value("2"), json!(2));
        assert_eq!(language_value("de"), json!("de"));
    }
}
