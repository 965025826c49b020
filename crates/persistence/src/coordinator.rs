//! Statement execution against the cluster
//!
//! Every call goes through [`WriteCoordinator::with_cluster`], which parks
//! the caller while no host is reachable and then repeats the call. Batches
//! are chunked to the configured size; a chunk the cluster rejects as too
//! large is written statement by statement instead.

use pim_sync_core::FieldMap;
use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;

use crate::classify::ErrorClass;
use crate::coercer;
use crate::context::StorageContext;
use crate::error::{DriverError, PersistenceError};
use crate::schema::Statement;
use crate::schema_cache::ColumnMap;
use crate::session::CqlSession;
use crate::statement_cache::{BoundStatement, StatementHandle};
use crate::value::Row;

#[derive(Clone)]
pub struct WriteCoordinator {
    ctx: Arc<StorageContext>,
}

impl WriteCoordinator {
    pub fn new(ctx: Arc<StorageContext>) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &Arc<StorageContext> {
        &self.ctx
    }

    /// Run `op` against the current session, waiting out host outages.
    ///
    /// A no-host-available failure blocks on the health tracker and then
    /// repeats `op`; there is no limit on how often. Any other failure is
    /// returned as is.
    pub async fn with_cluster<T, F, Fut>(&self, mut op: F) -> Result<T, PersistenceError>
    where
        F: FnMut(Arc<dyn CqlSession>) -> Fut,
        Fut: Future<Output = Result<T, DriverError>>,
    {
        loop {
            let session = self.ctx.manager.session().await?;
            match op(session).await {
                Ok(value) => return Ok(value),
                Err(e) if e.class() == ErrorClass::NoHostAvailable => {
                    metrics::counter!("pim_sync_host_outage_waits_total").increment(1);
                    tracing::warn!(error = %e, "No cluster host available, waiting");
                    let waits = self
                        .ctx
                        .manager
                        .health()
                        .wait_until_available(self.ctx.cluster().retry_delay())
                        .await;
                    tracing::debug!(waits, "Retrying after host outage");
                },
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Execute an unprepared statement, returning rows for selects
    pub async fn execute_statement(&self, statement: &Statement) -> Result<Vec<Row>, PersistenceError> {
        let keyspace = self.ctx.keyspace();
        let timeout = self.ctx.cluster().read_timeout();
        self.with_cluster(|session| async move { session.execute(keyspace, statement, timeout).await })
            .await
    }

    /// Column types of `table`, from the schema cache
    pub async fn columns(&self, table: &str) -> Result<ColumnMap, PersistenceError> {
        let keyspace = self.ctx.keyspace();
        let schema = &self.ctx.schema;
        self.with_cluster(|session| async move {
            schema.get_columns(session.as_ref(), keyspace, table).await
        })
        .await
    }

    /// Prepared insert for `table`, from the statement cache
    pub async fn prepare_insert(
        &self,
        table: &str,
        columns: &[String],
    ) -> Result<Arc<StatementHandle>, PersistenceError> {
        let keyspace = self.ctx.keyspace();
        let statements = &self.ctx.statements;
        self.with_cluster(|session| async move {
            statements
                .get_or_prepare(session.as_ref(), keyspace, table, columns)
                .await
        })
        .await
    }

    /// Bind rows for insertion into `table` against one prepared statement.
    ///
    /// A cached statement that does not cover every column of the rows is
    /// evicted and prepared again for the union of their columns.
    pub async fn bind_rows(
        &self,
        table: &str,
        rows: &[FieldMap],
    ) -> Result<Vec<BoundStatement>, PersistenceError> {
        let types = self.columns(table).await?;
        let columns: Vec<String> = rows
            .iter()
            .flat_map(|row| row.keys())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .cloned()
            .collect();

        let handle = self.prepare_insert(table, &columns).await?;
        let bound: Result<Vec<_>, _> = rows
            .iter()
            .map(|row| coercer::bind(&handle, row, &types))
            .collect();

        match bound {
            Err(e) if e.class() == ErrorClass::StaleStatement => {
                tracing::debug!(table = %table, error = %e, "Prepared statement is stale");
                self.ctx.statements.evict(table);
                let handle = self.prepare_insert(table, &columns).await?;
                rows.iter()
                    .map(|row| coercer::bind(&handle, row, &types))
                    .collect()
            },
            result => result,
        }
    }

    pub async fn bind_row(&self, table: &str, row: &FieldMap) -> Result<BoundStatement, PersistenceError> {
        let mut bound = self.bind_rows(table, std::slice::from_ref(row)).await?;
        bound
            .pop()
            .ok_or_else(|| PersistenceError::InvalidData(format!("nothing bound for {}", table)))
    }

    pub async fn insert_row(&self, table: &str, row: &FieldMap) -> Result<(), PersistenceError> {
        let bound = self.bind_row(table, row).await?;
        self.execute_bound(&bound).await
    }

    /// Execute one bound statement with the long read timeout
    pub async fn execute_bound(&self, statement: &BoundStatement) -> Result<(), PersistenceError> {
        let timeout = self.ctx.cluster().read_timeout();
        let result = self
            .with_cluster(|session| async move { session.execute_bound(statement, timeout).await })
            .await;

        match &result {
            Ok(()) => metrics::counter!("pim_sync_writes_total").increment(1),
            Err(e) => {
                metrics::counter!("pim_sync_write_failures_total").increment(1);
                tracing::debug!(table = %statement.table(), error = %e, "Write failed");
            },
        }
        result
    }

    /// Execute statements as logged batches of at most `batch_size`.
    ///
    /// Each chunk that is rejected as too large falls back to serial writes,
    /// so the unit is no longer atomic but every statement is applied once.
    pub async fn execute_batch(&self, statements: Vec<BoundStatement>) -> Result<(), PersistenceError> {
        let batch_size = self.ctx.cluster().batch_size.max(1);
        let timeout = self.ctx.cluster().read_timeout();

        for chunk in statements.chunks(batch_size) {
            let result = self
                .with_cluster(|session| async move { session.execute_batch(chunk, timeout).await })
                .await;

            match result {
                Ok(()) => {
                    metrics::counter!("pim_sync_writes_total").increment(chunk.len() as u64);
                },
                Err(e) if e.class() == ErrorClass::BatchTooLarge => {
                    metrics::counter!("pim_sync_batch_fallbacks_total").increment(1);
                    tracing::warn!(
                        statements = chunk.len(),
                        error = %e,
                        "Batch rejected as too large, writing statements one by one"
                    );
                    for statement in chunk {
                        self.execute_bound(statement).await?;
                    }
                },
                Err(e) => {
                    metrics::counter!("pim_sync_write_failures_total").increment(chunk.len() as u64);
                    tracing::debug!(statements = chunk.len(), error = %e, "Batch failed");
                    return Err(e);
                },
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ClusterConnectionManager;
    use crate::memory::{InMemoryCluster, DEFAULT_HOST};
    use crate::schema::PrimaryKey;
    use crate::value::BoundValue;
    use pim_sync_config::{ClusterSettings, SyncSettings};
    use pim_sync_core::ColumnType;
    use serde_json::json;
    use std::time::Duration;

    fn coordinator(cluster: &InMemoryCluster, batch_size: usize) -> WriteCoordinator {
        let settings = ClusterSettings {
            keyspace: "pim".to_string(),
            retry_count: 0,
            retry_delay_ms: 5,
            batch_size,
            ..ClusterSettings::default()
        };
        let manager = ClusterConnectionManager::new(settings, Arc::new(cluster.clone()));
        WriteCoordinator::new(Arc::new(StorageContext::new(manager, SyncSettings::default())))
    }

    async fn create_language(coordinator: &WriteCoordinator) {
        coordinator
            .execute_statement(&Statement::CreateTable {
                table: "language".to_string(),
                columns: vec![
                    ("ID".to_string(), ColumnType::BigInt),
                    ("ShortName".to_string(), ColumnType::Text),
                    ("Name".to_string(), ColumnType::Text),
                ],
                primary_key: PrimaryKey::new(&["ID"], &[]),
            })
            .await
            .unwrap();
    }

    fn language_row(id: i64, short: &str) -> FieldMap {
        let mut row = FieldMap::new();
        row.insert("ID".to_string(), json!(id));
        row.insert("ShortName".to_string(), json!(short));
        row
    }

    #[tokio::test]
    async fn test_stale_statement_is_rebuilt() {
        let cluster = InMemoryCluster::new();
        let coordinator = coordinator(&cluster, 10);
        create_language(&coordinator).await;

        coordinator.insert_row("language", &language_row(1, "de")).await.unwrap();

        let mut wider = language_row(2, "en");
        wider.insert("Name".to_string(), json!("English"));
        coordinator.insert_row("language", &wider).await.unwrap();

        let handle = coordinator.context().statements.get("language").unwrap();
        assert!(handle.binds("Name"));
        let row = cluster.find_row("language", &[("ID", BoundValue::BigInt(2))]).unwrap();
        assert_eq!(row.get("Name"), Some(&BoundValue::from("English")));
    }

    #[tokio::test]
    async fn test_batch_chunks() {
        let cluster = InMemoryCluster::new();
        let coordinator = coordinator(&cluster, 2);
        create_language(&coordinator).await;

        let mut statements = Vec::new();
        for id in 1..=5 {
            statements.push(coordinator.bind_row("language", &language_row(id, "xx")).await.unwrap());
        }
        coordinator.execute_batch(statements).await.unwrap();

        assert_eq!(cluster.batch_calls(), 3);
        assert_eq!(cluster.rows("language").len(), 5);
    }

    #[tokio::test]
    async fn test_batch_too_large_falls_back_to_serial() {
        let cluster = InMemoryCluster::new();
        cluster.set_max_batch_statements(Some(1));
        let coordinator = coordinator(&cluster, 10);
        create_language(&coordinator).await;

        let mut statements = Vec::new();
        for id in 1..=4 {
            statements.push(coordinator.bind_row("language", &language_row(id, "xx")).await.unwrap());
        }
        assert!(coordinator.execute_batch(statements).await.is_ok());
        assert_eq!(cluster.applied_writes(), 4);
        assert_eq!(cluster.rows("language").len(), 4);
    }

    #[tokio::test]
    async fn test_other_batch_errors_propagate() {
        let cluster = InMemoryCluster::new();
        let coordinator = coordinator(&cluster, 10);
        create_language(&coordinator).await;

        let bad = coordinator.bind_row("language", &language_row(1, "de")).await.unwrap();
        let keyless = BoundStatement {
            handle: Arc::clone(&bad.handle),
            values: vec![BoundValue::Unset; bad.values.len()],
        };
        let err = coordinator.execute_batch(vec![bad, keyless]).await.unwrap_err();
        assert!(!err.is_fatal());
        assert!(cluster.rows("language").is_empty());
    }

    #[tokio::test]
    async fn test_outage_blocks_until_host_returns() {
        let cluster = InMemoryCluster::new();
        let coordinator = coordinator(&cluster, 10);
        create_language(&coordinator).await;
        let statement = coordinator.bind_row("language", &language_row(1, "de")).await.unwrap();

        cluster.set_host_up(DEFAULT_HOST, false);
        let revive = {
            let cluster = cluster.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(40)).await;
                cluster.set_host_up(DEFAULT_HOST, true);
            })
        };

        coordinator.execute_bound(&statement).await.unwrap();
        revive.await.unwrap();
        assert_eq!(cluster.rows("language").len(), 1);
    }
}
