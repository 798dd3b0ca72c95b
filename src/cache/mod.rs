//! Caching layer for remote query results.
//!
//! This module provides:
//! - A two-tier TTL cache (in-memory, mirrored to a durable key/value store)
//! - Pattern invalidation for dropping every cached query of an entity type
//! - A janitor task purging expired durable entries in the background
//! - Deterministic cache keys derived from a prefix and sorted parameters

mod entry;
mod janitor;
mod keys;
mod storage;
mod tiered;
mod traits;

pub use entry::CacheEntry;
pub use janitor::Janitor;
pub use keys::cache_key;
pub use storage::{MemoryStore, SqliteStore};
pub use tiered::{TieredCache, DEFAULT_PREFIX};
pub use traits::{CacheResult, CacheSource, DurableStore};
