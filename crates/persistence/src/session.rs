//! Driver seam
//!
//! The engine talks to the cluster only through these traits:
//! - `ScyllaConnector` / `ScyllaDriver` - production, over the `scylla` driver
//! - `InMemoryCluster` - in-process cluster used by tests and dry runs

use async_trait::async_trait;
use pim_sync_config::ClusterSettings;
use pim_sync_core::ColumnType;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use crate::error::DriverError;
use crate::schema::Statement;
use crate::statement_cache::{BoundStatement, StatementHandle};
use crate::value::Row;

/// Receives cluster topology events
pub trait TopologyListener: Send + Sync {
    fn on_add(&self, host: &str);
    fn on_up(&self, host: &str);
    fn on_down(&self, host: &str);
    fn on_remove(&self, host: &str);
}

/// An open session against the cluster
#[async_trait]
pub trait CqlSession: Send + Sync {
    /// Execute an unprepared statement; rows are returned for selects only
    async fn execute(
        &self,
        keyspace: &str,
        statement: &Statement,
        timeout: Duration,
    ) -> Result<Vec<Row>, DriverError>;

    /// Compile `INSERT INTO keyspace.table (columns...) VALUES (?...)`
    async fn prepare(
        &self,
        keyspace: &str,
        table: &str,
        columns: &[String],
    ) -> Result<StatementHandle, DriverError>;

    async fn execute_bound(
        &self,
        statement: &BoundStatement,
        timeout: Duration,
    ) -> Result<(), DriverError>;

    /// Execute statements as one logged batch
    async fn execute_batch(
        &self,
        statements: &[BoundStatement],
        timeout: Duration,
    ) -> Result<(), DriverError>;

    /// Live column metadata of a table; empty if the table does not exist
    async fn table_columns(
        &self,
        keyspace: &str,
        table: &str,
    ) -> Result<BTreeMap<String, ColumnType>, DriverError>;

    /// Register for topology events for the lifetime of the session
    fn subscribe(&self, listener: Arc<dyn TopologyListener>);

    fn is_closed(&self) -> bool;

    async fn close(&self);
}

/// Opens sessions
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, settings: &ClusterSettings) -> Result<Arc<dyn CqlSession>, DriverError>;
}
