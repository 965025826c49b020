//! Live column metadata per table
//!
//! Populated lazily from the cluster. ALTERs issued by this engine update the
//! cache synchronously and are treated as authoritative; the cluster is never
//! re-read to confirm them.

use parking_lot::Mutex;
use pim_sync_core::{ColumnType, TableSchema};
use std::collections::{BTreeMap, HashMap};

use crate::error::DriverError;
use crate::session::CqlSession;

pub type ColumnMap = BTreeMap<String, ColumnType>;

#[derive(Default)]
pub struct SchemaCache {
    tables: Mutex<HashMap<String, ColumnMap>>,
}

impl SchemaCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Columns of `table`, reading cluster metadata on a miss.
    ///
    /// A table that does not exist yields an empty map. The result is a copy;
    /// changes go through [`add_column`](Self::add_column) and
    /// [`remove_column`](Self::remove_column).
    pub async fn get_columns(
        &self,
        session: &dyn CqlSession,
        keyspace: &str,
        table: &str,
    ) -> Result<ColumnMap, DriverError> {
        if let Some(columns) = self.tables.lock().get(table) {
            return Ok(columns.clone());
        }

        let live = session.table_columns(keyspace, table).await?;
        tracing::debug!(table = %table, columns = live.len(), "Loaded table metadata");

        let mut tables = self.tables.lock();
        let entry = tables.entry(table.to_string()).or_insert(live);
        Ok(entry.clone())
    }

    /// Cached columns without touching the cluster
    pub fn cached(&self, table: &str) -> Option<ColumnMap> {
        self.tables.lock().get(table).cloned()
    }

    pub fn table_schema(&self, table: &str) -> Option<TableSchema> {
        self.cached(table)
            .map(|columns| TableSchema::from_types(table, &columns))
    }

    /// Replace the cached columns of `table` (after CREATE TABLE)
    pub fn store(&self, table: &str, columns: ColumnMap) {
        self.tables.lock().insert(table.to_string(), columns);
    }

    /// Record a column added by a successful ALTER TABLE ADD
    ///
    /// A table that is not cached is left alone; the next read loads all of
    /// its columns, the new one included.
    pub fn add_column(&self, table: &str, column: &str, column_type: ColumnType) {
        if let Some(columns) = self.tables.lock().get_mut(table) {
            columns.insert(column.to_string(), column_type);
        }
    }

    /// Record a column removed by a successful ALTER TABLE DROP
    pub fn remove_column(&self, table: &str, column: &str) {
        if let Some(columns) = self.tables.lock().get_mut(table) {
            columns.remove(column);
        }
    }

    /// Forget `table` so the next read goes to the cluster
    pub fn invalidate(&self, table: &str) {
        self.tables.lock().remove(table);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryCluster;
    use crate::schema::{PrimaryKey, Statement};
    use std::time::Duration;

    #[tokio::test]
    async fn test_lazy_load_and_copy_semantics() {
        let cluster = InMemoryCluster::new();
        let session = cluster.open_session();
        session
            .execute(
                "pim",
                &Statement::CreateTable {
                    table: "language".to_string(),
                    columns: vec![
                        ("ID".to_string(), ColumnType::BigInt),
                        ("ShortName".to_string(), ColumnType::Text),
                    ],
                    primary_key: PrimaryKey::new(&["ID"], &[]),
                },
                Duration::from_secs(1),
            )
            .await
            .unwrap();

        let cache = SchemaCache::new();
        assert!(cache.cached("language").is_none());

        let mut columns = cache
            .get_columns(session.as_ref(), "pim", "language")
            .await
            .unwrap();
        assert_eq!(columns.get("ID"), Some(&ColumnType::BigInt));

        // Mutating the copy leaves the cache alone
        columns.insert("Bogus".to_string(), ColumnType::Text);
        assert!(!cache.cached("language").unwrap().contains_key("Bogus"));
    }

    #[tokio::test]
    async fn test_missing_table_is_empty() {
        let cluster = InMemoryCluster::new();
        let session = cluster.open_session();
        let cache = SchemaCache::new();

        let columns = cache
            .get_columns(session.as_ref(), "pim", "nothing_here")
            .await
            .unwrap();
        assert!(columns.is_empty());
    }

    #[test]
    fn test_add_and_remove_column() {
        let cache = SchemaCache::new();
        cache.store("pdmarticle", ColumnMap::from([("ID".to_string(), ColumnType::BigInt)]));
        cache.add_column("pdmarticle", "Label", ColumnType::Text);
        cache.add_column("pdmarticle", "_IsCreated", ColumnType::Int);
        assert_eq!(cache.cached("pdmarticle").unwrap().len(), 3);

        cache.remove_column("pdmarticle", "Label");
        let schema = cache.table_schema("pdmarticle").unwrap();
        assert!(!schema.contains("Label"));
        assert_eq!(schema.column_type("_IsCreated"), Some(ColumnType::Int));

        cache.invalidate("pdmarticle");
        assert!(cache.cached("pdmarticle").is_none());
    }

    #[test]
    fn test_add_column_to_uncached_table_waits_for_reload() {
        let cache = SchemaCache::new();
        cache.add_column("pdmarticle", "Label", ColumnType::Text);
        assert!(cache.cached("pdmarticle").is_none());
    }
}
