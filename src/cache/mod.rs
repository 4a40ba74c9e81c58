//! Content caching for offline reading.
//!
//! This module provides:
//! - A per-collection content cache with recency ordering and a local flag
//! - Age-based eviction, invoked by callers rather than on writes
//! - A cache-first layer that serves stale content when the remote is unreachable

mod layer;
mod storage;
mod traits;

pub use layer::{CacheLayer, FetchError};
pub use storage::ContentCache;
pub use traits::{CacheResult, CacheSource, CachedItem, Cacheable, FlagUpdate};
