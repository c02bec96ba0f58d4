//! TTL Cache - An in-process key/value cache with expiring entries
//!
//! Entries expire after their own TTL or a cache-wide one. A single
//! background worker wakes exactly when the next entry is due instead of
//! polling on a fixed interval.

pub mod cache;
pub mod config;
pub mod error;
pub mod tasks;

pub use cache::{
    CacheStats, Ttl, TtlCache, ITEM_EXPIRE_WITH_GLOBAL_TTL, ITEM_NOT_EXPIRE,
};
pub use config::CacheConfig;
pub use error::{CacheError, Result};
