//! Shared state handed to every engine component

use pim_sync_config::{ClusterSettings, SyncSettings};

use crate::client::ClusterConnectionManager;
use crate::schema_cache::SchemaCache;
use crate::statement_cache::StatementCache;

/// Connection, caches and sync settings for one keyspace.
///
/// Built once at startup and shared behind an `Arc`; the caches are the only
/// mutable state and carry their own locks.
pub struct StorageContext {
    pub manager: ClusterConnectionManager,
    pub schema: SchemaCache,
    pub statements: StatementCache,
    pub sync: SyncSettings,
}

impl StorageContext {
    pub fn new(manager: ClusterConnectionManager, sync: SyncSettings) -> Self {
        Self {
            manager,
            schema: SchemaCache::new(),
            statements: StatementCache::new(),
            sync,
        }
    }

    pub fn keyspace(&self) -> &str {
        self.manager.keyspace()
    }

    pub fn cluster(&self) -> &ClusterSettings {
        self.manager.settings()
    }
}
