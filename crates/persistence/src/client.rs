//! Cluster connection lifecycle

use pim_sync_config::ClusterSettings;
use std::sync::Arc;
use tokio::sync::{Mutex, OnceCell};

use crate::error::PersistenceError;
use crate::health::HostHealthTracker;
use crate::scylla_driver::ScyllaConnector;
use crate::session::{Connector, CqlSession, TopologyListener};

/// Vendor table only present on ScyllaDB
pub const VENDOR_MARKER_KEYSPACE: &str = "system";
pub const VENDOR_MARKER_TABLE: &str = "scylla_local";

/// Which engine backs the cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineKind {
    /// Apache Cassandra, the primary vendor
    Cassandra,
    /// ScyllaDB, the API-compatible fork
    Scylla,
}

impl EngineKind {
    /// SASI text-search indexes are a Cassandra feature
    pub fn supports_text_search_index(&self) -> bool {
        matches!(self, Self::Cassandra)
    }
}

/// Owns the shared session and reconnects transparently
pub struct ClusterConnectionManager {
    settings: ClusterSettings,
    keyspace: String,
    connector: Arc<dyn Connector>,
    session: Mutex<Option<Arc<dyn CqlSession>>>,
    health: Arc<HostHealthTracker>,
    engine: OnceCell<EngineKind>,
}

impl ClusterConnectionManager {
    pub fn new(settings: ClusterSettings, connector: Arc<dyn Connector>) -> Self {
        let keyspace = settings.keyspace_name();
        Self {
            settings,
            keyspace,
            connector,
            session: Mutex::new(None),
            health: Arc::new(HostHealthTracker::new()),
            engine: OnceCell::new(),
        }
    }

    /// Manager over the `scylla` driver
    pub fn scylla(settings: ClusterSettings) -> Self {
        Self::new(settings, Arc::new(ScyllaConnector))
    }

    /// The shared session, (re)connecting first if it is absent or closed.
    ///
    /// Only fails once the configured connection retries are exhausted.
    pub async fn session(&self) -> Result<Arc<dyn CqlSession>, PersistenceError> {
        let mut guard = self.session.lock().await;
        if let Some(session) = guard.as_ref() {
            if !session.is_closed() {
                return Ok(Arc::clone(session));
            }
            tracing::warn!("Cluster session closed, reconnecting");
            metrics::counter!("pim_sync_reconnects_total").increment(1);
        }

        let session = self.connect_with_retry().await?;
        *guard = Some(Arc::clone(&session));
        Ok(session)
    }

    /// Keyspace name, lower-cased
    pub fn keyspace(&self) -> &str {
        &self.keyspace
    }

    pub fn settings(&self) -> &ClusterSettings {
        &self.settings
    }

    pub fn health(&self) -> &Arc<HostHealthTracker> {
        &self.health
    }

    /// Backing engine, probed once and cached
    pub async fn engine(&self) -> Result<EngineKind, PersistenceError> {
        self.engine
            .get_or_try_init(|| async {
                let session = self.session().await?;
                let marker = session
                    .table_columns(VENDOR_MARKER_KEYSPACE, VENDOR_MARKER_TABLE)
                    .await?;
                let engine = if marker.is_empty() {
                    EngineKind::Cassandra
                } else {
                    EngineKind::Scylla
                };
                tracing::info!(engine = ?engine, "Detected cluster engine");
                Ok(engine)
            })
            .await
            .copied()
    }

    pub async fn is_connected(&self) -> bool {
        self.session
            .lock()
            .await
            .as_ref()
            .map(|s| !s.is_closed())
            .unwrap_or(false)
    }

    pub async fn close_connection(&self) {
        if let Some(session) = self.session.lock().await.take() {
            session.close().await;
            tracing::info!(keyspace = %self.keyspace, "Cluster connection closed");
        }
    }

    async fn connect_with_retry(&self) -> Result<Arc<dyn CqlSession>, PersistenceError> {
        let hosts = self.settings.hosts();
        let attempts = self.settings.retry_count.saturating_add(1);
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            if attempt > 1 {
                tokio::time::sleep(self.settings.retry_delay()).await;
            }

            tracing::info!(hosts = ?hosts, keyspace = %self.keyspace, attempt, "Connecting to cluster");
            match self.connector.connect(&self.settings).await {
                Ok(session) => {
                    let listener: Arc<dyn TopologyListener> = self.health.clone();
                    session.subscribe(listener);
                    tracing::info!(keyspace = %self.keyspace, attempt, "Connected to cluster");
                    return Ok(session);
                },
                Err(e) => {
                    tracing::warn!(attempt, attempts, error = %e, "Cluster connection attempt failed");
                    last_error = e.to_string();
                },
            }
        }

        tracing::error!(attempts, "Giving up on cluster connection");
        Err(PersistenceError::Connection(format!(
            "no connection to {:?} after {} attempts: {}",
            hosts, attempts, last_error
        )))
    }
}
