//! Application layer errors

use thiserror::Error;

/// General bot errors
#[derive(Error, Debug)]
pub enum BotError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Rate limited, retry after {0}s")]
    RateLimited(u64),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Module error: {0}")]
    Module(#[from] ModuleError),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Failures raised across the module contract
#[derive(Error, Debug)]
pub enum ModuleError {
    #[error("Module '{0}' not found in catalog")]
    NotFound(String),

    #[error("Import of '{name}' failed: {reason}")]
    Import { name: String, reason: String },

    #[error("Setup failed: {0}")]
    Setup(String),

    #[error("Cleanup failed: {0}")]
    Cleanup(String),

    #[error("Required resource '{0}' is not bound")]
    MissingResource(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Storage errors
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Lock poisoned")]
    Poisoned,
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value: {0}")]
    InvalidValue(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
