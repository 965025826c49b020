//! Main settings module

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::constants::{cluster, observability, sync};
use crate::ConfigError;

/// Runtime environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeEnvironment {
    #[default]
    Development,
    Staging,
    Production,
}

impl RuntimeEnvironment {
    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }
}

/// Main application settings
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    #[serde(default)]
    pub environment: RuntimeEnvironment,

    /// Wide-column cluster connection
    #[serde(default)]
    pub cluster: ClusterSettings,

    /// What gets synchronized and how tables are shaped
    #[serde(default)]
    pub sync: SyncSettings,

    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// Connection settings for the Cassandra/ScyllaDB cluster
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterSettings {
    /// Comma-separated `host[:port]` list
    #[serde(default = "default_contact_points")]
    pub contact_points: String,

    #[serde(default = "default_keyspace")]
    pub keyspace: String,

    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub password: Option<String>,

    #[serde(default = "default_replication_factor")]
    pub replication_factor: u8,

    /// Connection attempts after the first, immediate one
    #[serde(default = "default_retry_count")]
    pub retry_count: u32,

    /// Sleep between connection attempts and between host-outage polls
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,

    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    #[serde(default = "default_max_column_repairs")]
    pub max_column_repairs: u32,

    #[serde(default = "default_topology_poll_ms")]
    pub topology_poll_ms: u64,
}

fn default_contact_points() -> String {
    std::env::var("SCYLLA_HOSTS").unwrap_or_else(|_| cluster::DEFAULT_CONTACT_POINTS.to_string())
}

fn default_keyspace() -> String {
    std::env::var("SCYLLA_KEYSPACE").unwrap_or_else(|_| cluster::DEFAULT_KEYSPACE.to_string())
}

fn default_replication_factor() -> u8 {
    1
}

fn default_retry_count() -> u32 {
    cluster::DEFAULT_RETRY_COUNT
}

fn default_retry_delay_ms() -> u64 {
    cluster::DEFAULT_RETRY_DELAY_MS
}

fn default_batch_size() -> usize {
    cluster::DEFAULT_BATCH_SIZE
}

fn default_read_timeout_ms() -> u64 {
    cluster::DEFAULT_READ_TIMEOUT_MS
}

fn default_connect_timeout_ms() -> u64 {
    cluster::DEFAULT_CONNECT_TIMEOUT_MS
}

fn default_max_column_repairs() -> u32 {
    cluster::DEFAULT_MAX_COLUMN_REPAIRS
}

fn default_topology_poll_ms() -> u64 {
    cluster::DEFAULT_TOPOLOGY_POLL_MS
}

impl Default for ClusterSettings {
    fn default() -> Self {
        Self {
            contact_points: default_contact_points(),
            keyspace: default_keyspace(),
            username: None,
            password: None,
            replication_factor: default_replication_factor(),
            retry_count: default_retry_count(),
            retry_delay_ms: default_retry_delay_ms(),
            batch_size: default_batch_size(),
            read_timeout_ms: default_read_timeout_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            max_column_repairs: default_max_column_repairs(),
            topology_poll_ms: default_topology_poll_ms(),
        }
    }
}

impl ClusterSettings {
    /// Contact points as `host:port`, appending the default port where missing
    pub fn hosts(&self) -> Vec<String> {
        self.contact_points
            .split(',')
            .map(str::trim)
            .filter(|h| !h.is_empty())
            .map(|h| {
                if has_port(h) {
                    h.to_string()
                } else {
                    format!("{}:{}", h, cluster::DEFAULT_PORT)
                }
            })
            .collect()
    }

    /// Keyspace name as the cluster stores it
    pub fn keyspace_name(&self) -> String {
        self.keyspace.trim().to_lowercase()
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn topology_poll_interval(&self) -> Duration {
        Duration::from_millis(self.topology_poll_ms)
    }

    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (&self.username, &self.password) {
            (Some(user), Some(pass)) if !user.is_empty() => Some((user.as_str(), pass.as_str())),
            _ => None,
        }
    }
}

/// `host:port`, `[v6]:port` and bare hosts (including bare IPv6)
fn has_port(host: &str) -> bool {
    if let Some(rest) = host.strip_prefix('[') {
        return rest.contains("]:");
    }
    match host.rsplit_once(':') {
        Some((head, port)) => !head.contains(':') && port.parse::<u16>().is_ok(),
        None => false,
    }
}

/// Synchronization settings shared by all entity kinds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSettings {
    /// Item entities whose tables take part in language and workflow cascades
    #[serde(default = "default_item_entities")]
    pub item_entities: Vec<String>,

    /// Item fields that get one materialized view each
    #[serde(default = "default_indexed_fields")]
    pub indexed_fields: Vec<String>,

    /// Item fields that get a text-search index (primary vendor only)
    #[serde(default = "default_text_search_fields")]
    pub text_search_fields: Vec<String>,

    /// Optional JSON schema header document applied at startup
    #[serde(default)]
    pub schema_headers_path: Option<String>,
}

fn to_strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

fn default_item_entities() -> Vec<String> {
    to_strings(sync::DEFAULT_ITEM_ENTITIES)
}

fn default_indexed_fields() -> Vec<String> {
    to_strings(sync::DEFAULT_INDEXED_FIELDS)
}

fn default_text_search_fields() -> Vec<String> {
    to_strings(sync::DEFAULT_TEXT_SEARCH_FIELDS)
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            item_entities: default_item_entities(),
            indexed_fields: default_indexed_fields(),
            text_search_fields: default_text_search_fields(),
            schema_headers_path: None,
        }
    }
}

/// Logging and metrics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub log_json: bool,

    /// Prometheus exporter port; disabled when unset
    #[serde(default)]
    pub metrics_port: Option<u16>,
}

fn default_log_level() -> String {
    observability::DEFAULT_LOG_LEVEL.to_string()
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_json: false,
            metrics_port: None,
        }
    }
}

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate settings
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.validate_cluster()?;
        self.validate_sync()?;
        Ok(())
    }

    fn validate_cluster(&self) -> Result<(), ConfigError> {
        let cluster = &self.cluster;

        if cluster.hosts().is_empty() {
            return Err(ConfigError::MissingField("cluster.contact_points".to_string()));
        }

        let keyspace = cluster.keyspace_name();
        if keyspace.is_empty() {
            return Err(ConfigError::MissingField("cluster.keyspace".to_string()));
        }
        let valid_identifier = keyspace
            .chars()
            .next()
            .map(|c| c.is_ascii_alphabetic())
            .unwrap_or(false)
            && keyspace.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
            && keyspace.len() <= 48;
        if !valid_identifier {
            return Err(ConfigError::InvalidValue {
                field: "cluster.keyspace".to_string(),
                message: format!("'{}' is not a valid keyspace identifier", keyspace),
            });
        }

        if cluster.batch_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "cluster.batch_size".to_string(),
                message: "Must be at least 1".to_string(),
            });
        }

        if cluster.retry_delay_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "cluster.retry_delay_ms".to_string(),
                message: "Must be at least 1".to_string(),
            });
        }

        if cluster.max_column_repairs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "cluster.max_column_repairs".to_string(),
                message: "Must be at least 1".to_string(),
            });
        }

        if cluster.username.is_some() != cluster.password.is_some() {
            tracing::warn!("cluster.username and cluster.password must be set together, ignoring credentials");
        }

        Ok(())
    }

    fn validate_sync(&self) -> Result<(), ConfigError> {
        if let Some(field) = self
            .sync
            .indexed_fields
            .iter()
            .find(|f| f.as_str() == "ID" || f.as_str() == "LanguageID")
        {
            return Err(ConfigError::InvalidValue {
                field: "sync.indexed_fields".to_string(),
                message: format!("'{}' is already part of the primary key", field),
            });
        }
        Ok(())
    }
}

/// Load settings from `config/` relative to the working directory
pub fn load_settings(env: Option<&str>) -> Result<Settings, ConfigError> {
    load_settings_from(Path::new("config"), env)
}

/// Load settings from a config directory
///
/// Priority: env vars > `{dir}/{env}` > `{dir}/default` > defaults
pub fn load_settings_from(dir: &Path, env: Option<&str>) -> Result<Settings, ConfigError> {
    let mut builder = Config::builder();

    builder = builder.add_source(File::with_name(&dir.join("default").to_string_lossy()).required(false));

    if let Some(env_name) = env {
        builder = builder
            .add_source(File::with_name(&dir.join(env_name).to_string_lossy()).required(false));
    }

    builder = builder.add_source(
        Environment::with_prefix("PIM_SYNC")
            .separator("__")
            .try_parsing(true),
    );

    let config = builder.build()?;
    let settings: Settings = config.try_deserialize()?;

    settings.validate()?;

    Ok(settings)
}
