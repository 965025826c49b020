//! Centralized default values
//!
//! Single source of truth for defaults used by the settings structs and by
//! the storage engine.

/// Cluster connection defaults
pub mod cluster {
    /// Native protocol port appended to contact points without one
    pub const DEFAULT_PORT: u16 = 9042;

    pub const DEFAULT_CONTACT_POINTS: &str = "127.0.0.1:9042";

    pub const DEFAULT_KEYSPACE: &str = "pim_sync";

    /// Connection attempts after the first one
    pub const DEFAULT_RETRY_COUNT: u32 = 5;

    pub const DEFAULT_RETRY_DELAY_MS: u64 = 5_000;

    /// Maximum statements per logged batch
    pub const DEFAULT_BATCH_SIZE: usize = 50;

    /// Writes can be very large; keep the request timeout generous
    pub const DEFAULT_READ_TIMEOUT_MS: u64 = 120_000;

    pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 10_000;

    /// Upper bound on ALTER-and-retry rounds for one logical write
    pub const DEFAULT_MAX_COLUMN_REPAIRS: u32 = 64;

    pub const DEFAULT_TOPOLOGY_POLL_MS: u64 = 2_000;
}

/// Synchronization defaults
pub mod sync {
    /// Item entities touched by language and workflow cascades
    pub const DEFAULT_ITEM_ENTITIES: &[&str] = &["Pdmarticle", "Mamfile", "User"];

    /// Item fields that get a materialized view `(LanguageID, <field>, ID)`
    pub const DEFAULT_INDEXED_FIELDS: &[&str] = &["ParentID", "StateID", "WorkflowID", "ExternalKey"];

    /// Multi-value item fields that get a text-search index on the primary vendor
    pub const DEFAULT_TEXT_SEARCH_FIELDS: &[&str] = &["_Path", "_Tags", "_LinkedIDs"];
}

/// Observability defaults
pub mod observability {
    pub const DEFAULT_LOG_LEVEL: &str = "info";
}
