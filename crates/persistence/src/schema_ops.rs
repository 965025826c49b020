//! Table and column DDL
//!
//! Schema changes issued here update the schema cache and drop the prepared
//! statement of the table in the same call. "Already there" and "cannot be
//! dropped" answers from the cluster count as success.

use pim_sync_core::ColumnType;

use crate::classify::ErrorClass;
use crate::coordinator::WriteCoordinator;
use crate::error::PersistenceError;
use crate::schema::{PrimaryKey, Statement, TEXT_SEARCH_INDEX_CLASS};
use crate::schema_cache::ColumnMap;

const VALUE_SUFFIX: &str = ":Value";
const FORMATTED_VALUE_SUFFIX: &str = ":FormattedValue";

/// Column pair holding an attribute's raw and formatted value
pub fn attribute_columns(attribute_id: &str) -> [String; 2] {
    [
        format!("{}{}", attribute_id, VALUE_SUFFIX),
        format!("{}{}", attribute_id, FORMATTED_VALUE_SUFFIX),
    ]
}

#[derive(Clone)]
pub struct SchemaOps {
    coordinator: WriteCoordinator,
}

impl SchemaOps {
    pub fn new(coordinator: WriteCoordinator) -> Self {
        Self { coordinator }
    }

    /// True if `table` has any columns
    pub async fn check_table(&self, table: &str) -> Result<bool, PersistenceError> {
        Ok(!self.get_columns(table).await?.is_empty())
    }

    pub async fn check_column(&self, table: &str, column: &str) -> Result<bool, PersistenceError> {
        Ok(self.get_columns(table).await?.contains_key(column))
    }

    pub async fn get_columns(&self, table: &str) -> Result<ColumnMap, PersistenceError> {
        self.coordinator.columns(table).await
    }

    /// `ALTER TABLE ... ADD`; an existing column counts as added
    pub async fn add_column(
        &self,
        table: &str,
        column: &str,
        column_type: ColumnType,
    ) -> Result<(), PersistenceError> {
        let ctx = self.coordinator.context();
        let statement = Statement::AlterAdd {
            table: table.to_string(),
            column: column.to_string(),
            column_type,
        };

        match self.coordinator.execute_statement(&statement).await {
            Ok(_) => {
                ctx.schema.add_column(table, column, column_type);
                tracing::info!(table = %table, column = %column, column_type = %column_type, "Added column");
            },
            Err(e) if e.class() == ErrorClass::ColumnExists => {
                // Someone else added it; the live type wins
                tracing::debug!(table = %table, column = %column, error = %e, "Column already exists");
                ctx.schema.invalidate(table);
            },
            Err(e) => {
                tracing::warn!(table = %table, column = %column, error = %e, "Failed to add column");
                return Err(e);
            },
        }
        ctx.statements.evict(table);
        Ok(())
    }

    /// `ALTER TABLE ... DROP`; idempotent
    ///
    /// The DROP is always sent, since the cache may not know about columns
    /// added elsewhere. A column or table the cluster does not have is a
    /// no-op, and a column the engine refuses to drop is left in place
    /// without an error.
    pub async fn drop_column(&self, table: &str, column: &str) -> Result<(), PersistenceError> {
        let ctx = self.coordinator.context();
        let statement = Statement::AlterDrop {
            table: table.to_string(),
            column: column.to_string(),
        };
        match self.coordinator.execute_statement(&statement).await {
            Ok(_) => {
                ctx.schema.remove_column(table, column);
                tracing::info!(table = %table, column = %column, "Dropped column");
            },
            Err(e) if e.class() == ErrorClass::ColumnNotFound => {
                ctx.schema.remove_column(table, column);
                tracing::debug!(table = %table, column = %column, "Column already gone");
            },
            Err(e) if e.class() == ErrorClass::UnknownTable => {
                tracing::debug!(table = %table, column = %column, "Table not present, nothing to drop");
                return Ok(());
            },
            Err(e) if e.class() == ErrorClass::CannotDropColumn => {
                tracing::warn!(table = %table, column = %column, error = %e, "Cluster refuses to drop column, keeping it");
                return Ok(());
            },
            Err(e) => {
                tracing::warn!(table = %table, column = %column, error = %e, "Failed to drop column");
                return Err(e);
            },
        }
        ctx.statements.evict(table);
        Ok(())
    }

    /// Add the `<id>:Value` / `<id>:FormattedValue` text pair
    pub async fn add_attribute_columns(&self, table: &str, attribute_id: &str) -> Result<(), PersistenceError> {
        for column in attribute_columns(attribute_id) {
            if !self.check_column(table, &column).await? {
                self.add_column(table, &column, ColumnType::Text).await?;
            }
        }
        Ok(())
    }

    pub async fn drop_attribute_columns(&self, table: &str, attribute_id: &str) -> Result<(), PersistenceError> {
        for column in attribute_columns(attribute_id) {
            self.drop_column(table, &column).await?;
        }
        Ok(())
    }

    /// `CREATE TABLE IF NOT EXISTS` and reload the table's metadata
    pub async fn create_table(
        &self,
        table: &str,
        columns: &[(String, ColumnType)],
        primary_key: &PrimaryKey,
    ) -> Result<ColumnMap, PersistenceError> {
        let statement = Statement::CreateTable {
            table: table.to_string(),
            columns: columns.to_vec(),
            primary_key: primary_key.clone(),
        };
        self.coordinator.execute_statement(&statement).await?;

        let ctx = self.coordinator.context();
        ctx.schema.invalidate(table);
        ctx.statements.evict(table);
        tracing::info!(table = %table, columns = columns.len(), "Table ensured");
        self.get_columns(table).await
    }

    /// Add every column of `columns` the table does not have yet
    pub async fn ensure_columns(
        &self,
        table: &str,
        columns: &[(String, ColumnType)],
    ) -> Result<usize, PersistenceError> {
        let live = self.get_columns(table).await?;
        let mut added = 0;
        for (column, column_type) in columns {
            if !live.contains_key(column) {
                self.add_column(table, column, *column_type).await?;
                added += 1;
            }
        }
        Ok(added)
    }

    pub async fn create_view(
        &self,
        view: &str,
        base: &str,
        primary_key: &PrimaryKey,
    ) -> Result<(), PersistenceError> {
        let statement = Statement::CreateMaterializedView {
            view: view.to_string(),
            base: base.to_string(),
            primary_key: primary_key.clone(),
        };
        self.coordinator.execute_statement(&statement).await?;
        tracing::info!(view = %view, base = %base, "Materialized view ensured");
        Ok(())
    }

    /// Plain secondary index
    pub async fn create_index(&self, name: &str, table: &str, column: &str) -> Result<(), PersistenceError> {
        let statement = Statement::CreateIndex {
            name: name.to_string(),
            table: table.to_string(),
            column: column.to_string(),
            using: None,
            options: Vec::new(),
        };
        self.coordinator.execute_statement(&statement).await?;
        tracing::info!(index = %name, table = %table, column = %column, "Index ensured");
        Ok(())
    }

    /// SASI `CONTAINS` index for substring search
    pub async fn create_text_search_index(
        &self,
        name: &str,
        table: &str,
        column: &str,
    ) -> Result<(), PersistenceError> {
        let statement = Statement::CreateIndex {
            name: name.to_string(),
            table: table.to_string(),
            column: column.to_string(),
            using: Some(TEXT_SEARCH_INDEX_CLASS.to_string()),
            options: vec![
                ("mode".to_string(), "CONTAINS".to_string()),
                (
                    "analyzer_class".to_string(),
                    "org.apache.cassandra.index.sasi.analyzer.NonTokenizingAnalyzer".to_string(),
                ),
                ("case_sensitive".to_string(), "false".to_string()),
            ],
        };
        self.coordinator.execute_statement(&statement).await?;
        tracing::info!(index = %name, table = %table, column = %column, "Text search index ensured");
        Ok(())
    }

    pub async fn truncate(&self, table: &str) -> Result<(), PersistenceError> {
        self.coordinator
            .execute_statement(&Statement::Truncate {
                table: table.to_string(),
            })
            .await?;
        tracing::info!(table = %table, "Table truncated");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ClusterConnectionManager;
    use crate::context::StorageContext;
    use crate::memory::InMemoryCluster;
    use pim_sync_config::{ClusterSettings, SyncSettings};
    use std::sync::Arc;

    fn ops(cluster: &InMemoryCluster) -> SchemaOps {
        let settings = ClusterSettings {
            keyspace: "pim".to_string(),
            retry_count: 0,
            retry_delay_ms: 5,
            ..ClusterSettings::default()
        };
        let manager = ClusterConnectionManager::new(settings, Arc::new(cluster.clone()));
        let ctx = Arc::new(StorageContext::new(manager, SyncSettings::default()));
        SchemaOps::new(WriteCoordinator::new(ctx))
    }

    async fn mapping_table(ops: &SchemaOps) {
        ops.create_table(
            "pdmarticle_mapping",
            &[
                ("ClassID".to_string(), ColumnType::BigInt),
                ("AttributeID".to_string(), ColumnType::BigInt),
            ],
            &PrimaryKey::new(&["ClassID"], &["AttributeID"]),
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_check_table_and_column() {
        let cluster = InMemoryCluster::new();
        let ops = ops(&cluster);
        assert!(!ops.check_table("pdmarticle_mapping").await.unwrap());

        mapping_table(&ops).await;
        assert!(ops.check_table("pdmarticle_mapping").await.unwrap());
        assert!(ops.check_column("pdmarticle_mapping", "ClassID").await.unwrap());
        assert!(!ops.check_column("pdmarticle_mapping", "Label").await.unwrap());
    }

    #[tokio::test]
    async fn test_add_column_twice() {
        let cluster = InMemoryCluster::new();
        let ops = ops(&cluster);
        mapping_table(&ops).await;

        ops.add_column("pdmarticle_mapping", "Label", ColumnType::Text).await.unwrap();
        ops.add_column("pdmarticle_mapping", "Label", ColumnType::Text).await.unwrap();
        assert_eq!(
            ops.get_columns("pdmarticle_mapping").await.unwrap().get("Label"),
            Some(&ColumnType::Text)
        );
    }

    #[tokio::test]
    async fn test_drop_column_is_idempotent() {
        let cluster = InMemoryCluster::new();
        let ops = ops(&cluster);
        mapping_table(&ops).await;
        ops.add_column("pdmarticle_mapping", "Label", ColumnType::Text).await.unwrap();

        ops.drop_column("pdmarticle_mapping", "Label").await.unwrap();
        assert!(!ops.check_column("pdmarticle_mapping", "Label").await.unwrap());
        ops.drop_column("pdmarticle_mapping", "Label").await.unwrap();
        assert!(!cluster.columns("pdmarticle_mapping").unwrap().contains_key("Label"));
    }

    #[tokio::test]
    async fn test_cannot_drop_is_success() {
        let cluster = InMemoryCluster::new();
        let ops = ops(&cluster);
        mapping_table(&ops).await;
        ops.add_column("pdmarticle_mapping", "Label", ColumnType::Text).await.unwrap();
        cluster.protect_column("pdmarticle_mapping", "Label");

        ops.drop_column("pdmarticle_mapping", "Label").await.unwrap();
        assert!(cluster.columns("pdmarticle_mapping").unwrap().contains_key("Label"));

        // Key columns cannot be dropped either
        ops.drop_column("pdmarticle_mapping", "ClassID").await.unwrap();
        assert!(ops.check_column("pdmarticle_mapping", "ClassID").await.unwrap());
    }

    #[tokio::test]
    async fn test_attribute_columns() {
        let cluster = InMemoryCluster::new();
        let ops = ops(&cluster);
        mapping_table(&ops).await;

        ops.add_attribute_columns("pdmarticle_mapping", "42").await.unwrap();
        let columns = cluster.columns("pdmarticle_mapping").unwrap();
        assert_eq!(columns.get("42:Value"), Some(&ColumnType::Text));
        assert_eq!(columns.get("42:FormattedValue"), Some(&ColumnType::Text));

        ops.drop_attribute_columns("pdmarticle_mapping", "42").await.unwrap();
        let columns = ops.get_columns("pdmarticle_mapping").await.unwrap();
        assert!(!columns.contains_key("42:Value"));
        assert!(!columns.contains_key("42:FormattedValue"));
    }

    #[tokio::test]
    async fn test_ensure_columns_and_truncate() {
        let cluster = InMemoryCluster::new();
        let ops = ops(&cluster);
        mapping_table(&ops).await;

        let wanted = vec![
            ("ClassID".to_string(), ColumnType::BigInt),
            ("Weight".to_string(), ColumnType::Float),
        ];
        assert_eq!(ops.ensure_columns("pdmarticle_mapping", &wanted).await.unwrap(), 1);
        assert_eq!(ops.ensure_columns("pdmarticle_mapping", &wanted).await.unwrap(), 0);

        ops.truncate("pdmarticle_mapping").await.unwrap();
        assert!(cluster
            .executed()
            .iter()
            .any(|cql| cql == "TRUNCATE pim.pdmarticle_mapping"));
    }
}
