//! Configuration management for the PIM synchronizer
//!
//! Supports loading configuration from:
//! - TOML files (`config/default`, `config/{env}`)
//! - Environment variables (`PIM_SYNC__` prefix, `__` as section separator)
//!
//! The storage engine only consumes [`ClusterSettings`] and [`SyncSettings`];
//! how they are sourced is the concern of this crate.

pub mod constants;
pub mod settings;

pub use settings::{
    load_settings, load_settings_from, ClusterSettings, ObservabilityConfig, RuntimeEnvironment,
    Settings, SyncSettings,
};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}

impl From<config::ConfigError> for ConfigError {
    fn from(err: config::ConfigError) -> Self {
        ConfigError::ParseError(err.to_string())
    }
}
