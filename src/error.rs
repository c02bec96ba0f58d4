//! Error types for the cache
//!
//! Lookups report absence through `Option`/`bool`; only constructing a cache
//! can fail.

use thiserror::Error;

// == Cache Error Enum ==
#[derive(Error, Debug)]
pub enum CacheError {
    /// Configuration rejected by validation
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The sweep worker or its runtime could not be started
    #[error("Failed to start sweep worker: {0}")]
    Worker(#[from] std::io::Error),
}

// == Result Type Alias ==
pub type Result<T> = std::result::Result<T, CacheError>;
