//! Configuration tables, and the workflow-state cascade

use pim_sync_core::{ColumnType, EntityKind};
use serde_json::Value;

use super::{naming, Cascade, KindStrategy, SchemaEvolver, Secondary, TableLayout, ID, LANGUAGE_ID, STATE_ID, WORKFLOW_ID};
use crate::classify::ErrorClass;
use crate::coercer::coerce;
use crate::error::PersistenceError;
use crate::schema::{PrimaryKey, Statement};
use crate::value::{BoundValue, Row};

pub(super) static STRATEGY: KindStrategy = KindStrategy {
    kind: EntityKind::Configuration,
    language_scoped: false,
    fixed_shape: false,
    layout,
    meta_columns: &[],
    stamp: super::no_stamp,
    secondary: Secondary::None,
    cascade,
};

fn layout(_entity: &str) -> TableLayout {
    TableLayout::new(
        &[("ID", ColumnType::BigInt), ("ModuleTypeID", ColumnType::BigInt)],
        PrimaryKey::new(&["ID"], &["ModuleTypeID"]),
    )
}

fn cascade(entity: &str) -> Cascade {
    if naming::is_workflow(entity) {
        Cascade::WorkflowState
    } else {
        Cascade::None
    }
}

impl SchemaEvolver {
    /// Null `WorkflowID`/`StateID` on every item row in workflow state `state`.
    ///
    /// Rows are found per language through the table's `StateID` view, or by
    /// a filtered scan when the view does not exist. Record-like tables are
    /// left alone. Returns the number of rows cleared.
    pub(super) async fn clear_workflow_state(&self, state: &Value) -> Result<usize, PersistenceError> {
        let languages = self.language_ids().await?;
        let mut cleared = 0;

        for entity in &self.ctx().sync.item_entities {
            if naming::is_record_entity(entity) {
                continue;
            }
            let table = naming::table_name(EntityKind::Item, entity);
            let columns = self.ops.get_columns(&table).await?;
            let Some(state_type) = columns.get(STATE_ID).copied() else {
                continue;
            };
            let state_value = coerce(state_type, state);

            let assignments: Vec<(String, BoundValue)> = [WORKFLOW_ID, STATE_ID]
                .into_iter()
                .filter(|c| columns.contains_key(*c))
                .map(|c| (c.to_string(), BoundValue::Null))
                .collect();

            for (language, id) in self.rows_in_state(&table, &languages, &state_value).await? {
                self.coordinator
                    .execute_statement(&Statement::Update {
                        table: table.clone(),
                        assignments: assignments.clone(),
                        filters: vec![(LANGUAGE_ID.to_string(), language), (ID.to_string(), id)],
                    })
                    .await?;
                cleared += 1;
            }
        }
        Ok(cleared)
    }

    /// `(LanguageID, ID)` of the rows of `table` in `state`
    async fn rows_in_state(
        &self,
        table: &str,
        languages: &[BoundValue],
        state: &BoundValue,
    ) -> Result<Vec<(BoundValue, BoundValue)>, PersistenceError> {
        let projection = vec![LANGUAGE_ID.to_string(), ID.to_string()];
        let state_filter = (STATE_ID.to_string(), state.clone());

        if languages.is_empty() {
            let rows = self
                .coordinator
                .execute_statement(&Statement::Select {
                    table: table.to_string(),
                    columns: projection,
                    filters: vec![state_filter],
                    allow_filtering: true,
                })
                .await?;
            return Ok(key_pairs(rows));
        }

        let view = naming::view_name(table, STATE_ID);
        let mut found = Vec::new();
        for language in languages {
            let filters = vec![(LANGUAGE_ID.to_string(), language.clone()), state_filter.clone()];
            let by_view = Statement::Select {
                table: view.clone(),
                columns: projection.clone(),
                filters: filters.clone(),
                allow_filtering: false,
            };
            let rows = match self.coordinator.execute_statement(&by_view).await {
                Ok(rows) => rows,
                Err(e) if e.class() == ErrorClass::UnknownTable => {
                    tracing::debug!(view = %view, "No state view, scanning base table");
                    self.coordinator
                        .execute_statement(&Statement::Select {
                            table: table.to_string(),
                            columns: projection.clone(),
                            filters,
                            allow_filtering: true,
                        })
                        .await?
                },
                Err(e) => return Err(e),
            };
            found.extend(key_pairs(rows));
        }
        Ok(found)
    }
}

fn key_pairs(rows: Vec<Row>) -> Vec<(BoundValue, BoundValue)> {
    rows.into_iter()
        .filter_map(|mut row| {
            let language = row.remove(LANGUAGE_ID).filter(|v| !v.is_null_or_unset())?;
            let id = row.remove(ID).filter(|v| !v.is_null_or_unset())?;
            Some((language, id))
        })
        .collect()
}
