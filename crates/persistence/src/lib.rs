//! Schema-evolving storage engine over ScyllaDB / Cassandra
//!
//! Writes entity records exported by the PIM into wide tables whose columns
//! appear over time:
//! - Connection lifecycle and host health tracking
//! - Schema and prepared-statement caches
//! - Batched writes with a serial fallback for oversized batches
//! - Per-entity-kind table shapes with self-healing column repair

pub mod classify;
pub mod client;
pub mod coercer;
pub mod context;
pub mod coordinator;
pub mod error;
pub mod evolver;
pub mod health;
pub mod memory;
pub mod schema;
pub mod schema_cache;
pub mod schema_ops;
pub mod scylla_driver;
pub mod session;
pub mod statement_cache;
pub mod value;

pub use classify::{classify, ErrorClass};
pub use client::{ClusterConnectionManager, EngineKind};
pub use coercer::{coerce, sentinel_timestamp};
pub use context::StorageContext;
pub use coordinator::WriteCoordinator;
pub use error::{DriverError, PersistenceError};
pub use evolver::{base_entity_name, header_key, parse_header_key, table_name, SchemaEvolver, TableLayout};
pub use health::{HostHealthTracker, HostState};
pub use memory::InMemoryCluster;
pub use schema::{PrimaryKey, Statement};
pub use schema_cache::{ColumnMap, SchemaCache};
pub use schema_ops::SchemaOps;
pub use scylla_driver::ScyllaConnector;
pub use session::{Connector, CqlSession, TopologyListener};
pub use statement_cache::{BoundStatement, StatementCache, StatementHandle};
pub use value::{BoundValue, Row};

use pim_sync_config::{ClusterSettings, SyncSettings};
use std::sync::Arc;

/// Initialize the engine against a real cluster
///
/// # Arguments
/// * `cluster` - Contact points, keyspace, retry and batch settings
/// * `sync` - Entity names and index field lists
pub async fn init(cluster: ClusterSettings, sync: SyncSettings) -> Result<PersistenceLayer, PersistenceError> {
    init_with_connector(cluster, sync, Arc::new(ScyllaConnector)).await
}

/// Initialize the engine over any [`Connector`]
///
/// Connects (failing fatally once retries are exhausted), creates the
/// keyspace if needed and probes the backing engine.
pub async fn init_with_connector(
    cluster: ClusterSettings,
    sync: SyncSettings,
    connector: Arc<dyn Connector>,
) -> Result<PersistenceLayer, PersistenceError> {
    let replication_factor = cluster.replication_factor;
    let manager = ClusterConnectionManager::new(cluster, connector);
    manager.session().await?;

    let context = Arc::new(StorageContext::new(manager, sync));
    let coordinator = WriteCoordinator::new(Arc::clone(&context));
    coordinator
        .execute_statement(&Statement::CreateKeyspace { replication_factor })
        .await?;
    let engine = context.manager.engine().await?;

    tracing::info!(
        keyspace = %context.keyspace(),
        engine = ?engine,
        "Storage engine initialized"
    );

    Ok(PersistenceLayer {
        schema_ops: SchemaOps::new(coordinator.clone()),
        evolver: SchemaEvolver::new(coordinator.clone()),
        coordinator,
        context,
    })
}

/// Engine components sharing one [`StorageContext`]
pub struct PersistenceLayer {
    pub context: Arc<StorageContext>,
    pub coordinator: WriteCoordinator,
    /// Column add/drop and DDL helpers
    pub schema_ops: SchemaOps,
    pub evolver: SchemaEvolver,
}

impl PersistenceLayer {
    pub async fn shutdown(&self) {
        self.context.manager.close_connection().await;
    }
}
