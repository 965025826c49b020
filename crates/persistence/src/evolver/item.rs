//! Item tables: one row per entity and language

use pim_sync_core::{ColumnType, EntityKind, FieldMap};
use serde_json::Value;

use super::{naming, KindStrategy, Secondary, SchemaEvolver, TableLayout, ID, LANGUAGE_ID, STATE_ID};
use crate::error::PersistenceError;
use crate::schema::PrimaryKey;
use crate::schema_cache::ColumnMap;

const IS_CREATED: &str = "_IsCreated";
const LAST_WRITTEN: &str = "_LastWritten";
const INSERT_TIME: &str = "_InsertTime";

pub(super) static STRATEGY: KindStrategy = KindStrategy {
    kind: EntityKind::Item,
    language_scoped: true,
    fixed_shape: false,
    layout,
    meta_columns: &[
        (IS_CREATED, ColumnType::Int),
        (LAST_WRITTEN, ColumnType::Timestamp),
        (INSERT_TIME, ColumnType::Timestamp),
    ],
    stamp,
    secondary: Secondary::ItemViews,
    cascade: super::no_cascade,
};

fn layout(entity: &str) -> TableLayout {
    if naming::is_record_entity(entity) {
        TableLayout::new(
            &[
                (ID, ColumnType::BigInt),
                (STATE_ID, ColumnType::BigInt),
                (LANGUAGE_ID, ColumnType::BigInt),
            ],
            PrimaryKey::new(&[ID], &[STATE_ID]),
        )
    } else {
        TableLayout::new(
            &[(ID, ColumnType::BigInt), (LANGUAGE_ID, ColumnType::BigInt)],
            PrimaryKey::new(&[LANGUAGE_ID], &[ID]),
        )
    }
}

fn stamp(row: &mut FieldMap) {
    row.insert(IS_CREATED.to_string(), Value::from(1));
    row.insert(LAST_WRITTEN.to_string(), Value::from("now"));
    row.entry(INSERT_TIME.to_string())
        .or_insert_with(|| Value::from("now"));
}

impl SchemaEvolver {
    /// Views for indexed fields and, on Cassandra, text-search indexes.
    ///
    /// Only fields the table already has are covered; record-like tables
    /// get neither.
    pub(super) async fn create_item_objects(
        &self,
        entity: &str,
        table: &str,
        columns: &ColumnMap,
    ) -> Result<(), PersistenceError> {
        if naming::is_record_entity(entity) {
            return Ok(());
        }
        let sync = &self.ctx().sync;

        for field in &sync.indexed_fields {
            if field == ID || field == LANGUAGE_ID || !columns.contains_key(field) {
                continue;
            }
            let key = PrimaryKey::new(&[LANGUAGE_ID], &[field.as_str(), ID]);
            self.ops
                .create_view(&naming::view_name(table, field), table, &key)
                .await?;
        }

        let engine = self.ctx().manager.engine().await?;
        if engine.supports_text_search_index() {
            for field in &sync.text_search_fields {
                if columns.contains_key(field) {
                    self.ops
                        .create_text_search_index(&naming::text_index_name(table, field), table, field)
                        .await?;
                }
            }
        }
        Ok(())
    }
}
