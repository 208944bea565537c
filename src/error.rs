//! Error types for gridstore
//!
//! Three families, one per phase of a store's life:
//! - [`ConfigError`]: detected while validating configuration
//! - [`RealizeError`]: detected while constructing a manager or store
//! - [`StoreError`]: detected while a store is serving operations

use thiserror::Error;

/// Result type alias for configuration validation
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Result type alias for manager/store construction
pub type RealizeResult<T> = std::result::Result<T, RealizeError>;

/// Result type alias for store operations
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Boxed error returned by custom manager factories
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Configuration problems found by `ManagerBuilder::validate`
///
/// Out-of-range sizes are not errors: they are clamped with a warning.
#[derive(Debug, Error)]
pub enum ConfigError {
    // -------------------------------------------------------------------------
    // Missing Collaborators
    // -------------------------------------------------------------------------
    #[error("{builder}: inner builder must not be null")]
    MissingInnerBuilder { builder: &'static str },

    #[error("no custom factory registered under '{0}'")]
    UnknownFactory(String),

    // -------------------------------------------------------------------------
    // Malformed Values
    // -------------------------------------------------------------------------
    #[error("invalid memory size for {field}: '{value}'")]
    InvalidMemorySize { field: &'static str, value: String },

    #[error("invalid init-param '{name}' = '{value}': {reason}")]
    InvalidInitParam {
        name: String,
        value: String,
        reason: String,
    },

    #[error("unresolved parameter '{0}' and no default given")]
    UnresolvedParameter(String),

    // -------------------------------------------------------------------------
    // Loading
    // -------------------------------------------------------------------------
    #[error("configuration parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("IO error reading configuration: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures while bringing up a storage tier
#[derive(Debug, Error)]
pub enum RealizeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("missing native dependency: {hint}")]
    MissingNativeDependency { hint: String },

    #[error("{backend} does not support {mode} mode")]
    UnsupportedMode {
        backend: &'static str,
        mode: &'static str,
    },

    #[error("custom factory '{factory}' failed: {source}")]
    CustomFactoryFailure {
        factory: String,
        #[source]
        source: crate::error::BoxError,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfig(#[from] ConfigError),

    #[error("storage engine error: {0}")]
    Engine(String),
}

/// Failures of individual store operations
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("capacity exceeded: {required} bytes required, {available} bytes available")]
    CapacityExceeded { required: u64, available: u64 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage engine error: {0}")]
    Engine(String),

    #[error("store is closed")]
    Closed,

    #[error("write-behind drain failed: {0}")]
    DrainFailed(String),
}
