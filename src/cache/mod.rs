//! Cache Module
//!
//! Provides the TTL cache, its entries and the expiration queue.

mod entry;
mod queue;
mod stats;
mod store;


// Re-export public types
pub use entry::{Entry, EntryId, EntrySlots, Ttl};
pub use queue::{expires_before, ExpirationQueue};
pub use stats::CacheStats;
pub use store::{CheckExpirationCallback, ExpirationCallback, NewItemCallback, TtlCache};

pub(crate) use store::Shared;

// == Public Constants ==
/// Entries stored with this TTL are never swept. Only `remove`, `purge` or
/// `close` drop them.
pub const ITEM_NOT_EXPIRE: Ttl = Ttl::Never;

/// Entries stored with this TTL follow the cache's global TTL.
pub const ITEM_EXPIRE_WITH_GLOBAL_TTL: Ttl = Ttl::Global;
