//! The language table, and the hard delete of a removed language's items

use pim_sync_core::{ColumnType, EntityKind};
use serde_json::Value;

use super::{naming, Cascade, KindStrategy, SchemaEvolver, Secondary, TableLayout, ID, LANGUAGE_ID, STATE_ID};
use crate::coercer::coerce;
use crate::error::PersistenceError;
use crate::schema::{PrimaryKey, Statement};

const SHORT_NAME: &str = "ShortName";
const IS_DEFAULT: &str = "IsDefault";

pub(super) static STRATEGY: KindStrategy = KindStrategy {
    kind: EntityKind::Language,
    language_scoped: false,
    fixed_shape: true,
    layout,
    meta_columns: &[],
    stamp: super::no_stamp,
    secondary: Secondary::LanguageIndexes,
    cascade,
};

fn layout(_entity: &str) -> TableLayout {
    TableLayout::new(
        &[
            (ID, ColumnType::BigInt),
            (SHORT_NAME, ColumnType::Text),
            ("Name", ColumnType::Text),
            (IS_DEFAULT, ColumnType::Int),
        ],
        PrimaryKey::new(&[ID], &[]),
    )
}

fn cascade(_entity: &str) -> Cascade {
    Cascade::LanguageRows
}

impl SchemaEvolver {
    pub(super) async fn create_language_indexes(&self, table: &str) -> Result<(), PersistenceError> {
        for column in [IS_DEFAULT, SHORT_NAME] {
            self.ops
                .create_index(&naming::index_name(table, column), table, column)
                .await?;
        }
        Ok(())
    }

    /// Delete every item row written in `language`.
    ///
    /// Ordinary item tables are partitioned by language and lose the whole
    /// partition; record-like tables are scanned for the language's rows.
    /// Returns the number of delete statements issued.
    pub(super) async fn delete_language_rows(&self, language: &Value) -> Result<usize, PersistenceError> {
        let mut deleted = 0;

        for entity in &self.ctx().sync.item_entities {
            let table = naming::table_name(EntityKind::Item, entity);
            let columns = self.ops.get_columns(&table).await?;
            if columns.is_empty() {
                continue;
            }
            let language = coerce(Self::column_type(&columns, LANGUAGE_ID), language);

            if !naming::is_record_entity(entity) {
                self.coordinator
                    .execute_statement(&Statement::Delete {
                        table: table.clone(),
                        filters: vec![(LANGUAGE_ID.to_string(), language)],
                    })
                    .await?;
                deleted += 1;
                continue;
            }

            let rows = self
                .coordinator
                .execute_statement(&Statement::Select {
                    table: table.clone(),
                    columns: vec![ID.to_string(), STATE_ID.to_string()],
                    filters: vec![(LANGUAGE_ID.to_string(), language)],
                    allow_filtering: true,
                })
                .await?;
            for mut row in rows {
                let (Some(id), Some(state)) = (row.remove(ID), row.remove(STATE_ID)) else {
                    continue;
                };
                self.coordinator
                    .execute_statement(&Statement::Delete {
                        table: table.clone(),
                        filters: vec![(ID.to_string(), id), (STATE_ID.to_string(), state)],
                    })
                    .await?;
                deleted += 1;
            }
            tracing::debug!(table = %table, "Removed record rows of deleted language");
        }
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_language_layout_is_fixed() {
        assert!(STRATEGY.fixed_shape);
        let layout = layout("Language");
        assert_eq!(layout.primary_key, PrimaryKey::new(&["ID"], &[]));
        let names: Vec<&str> = layout.columns.iter().map(|(c, _)| c.as_str()).collect();
        assert_eq!(names, vec!["ID", "ShortName", "Name", "IsDefault"]);
        assert_eq!((STRATEGY.cascade)("Language"), Cascade::LanguageRows);
    }
}
