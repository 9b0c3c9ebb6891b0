//! Error types for the core domain.

use thiserror::Error;

/// Errors raised while loading or validating the configuration.
///
/// All of these are fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file '{path}': {reason}")]
    Io { path: String, reason: String },

    #[error("could not parse config file: {0}")]
    Parse(String),

    #[error("no RPC endpoints configured")]
    NoEndpoints,

    #[error("invalid missed-blocks groups: {0}")]
    InvalidGroups(String),

    #[error("store-blocks ({store_blocks}) must be >= blocks-window ({blocks_window})")]
    WindowExceedsRetention {
        blocks_window: i64,
        store_blocks: i64,
    },
}

/// Errors raised by a [`crate::store::Store`] implementation.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage error: {0}")]
    Backend(String),

    #[error("corrupt row: {0}")]
    Corrupt(String),
}
