//! Core traits and types for the caching system.

use serde::{de::DeserializeOwned, Serialize};

use crate::db::Collection;

/// Trait for content records that can be cached.
///
/// Implementors provide the remote-assigned id and the collection they live in.
pub trait Cacheable: Clone + Send + Sync + Serialize + DeserializeOwned {
  /// Unique identifier within the collection, assigned by the remote source
  fn cache_key(&self) -> &str;

  /// Collection storing this record type
  fn collection() -> Collection;
}

/// A cached record together with its local metadata.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CachedItem<T> {
  pub item: T,
  /// When the record was last written to the cache (epoch millis)
  pub cached_at: i64,
  /// Locally mutable flag: read for news, attending for events
  pub flag: bool,
}

/// Outcome of a flag update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlagUpdate {
  Applied,
  /// No record with that id; nothing was written
  NotFound,
}

/// Result from a cache operation, including data and metadata about the source.
#[derive(Debug, Clone)]
pub struct CacheResult<T> {
  /// The actual data
  pub data: T,
  /// Where the data came from
  pub source: CacheSource,
  /// Newest cache stamp among the returned records (if from cache)
  pub cached_at: Option<i64>,
}

impl<T> CacheResult<T> {
  /// Create a new cache result from fresh network data.
  pub fn from_network(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Network,
      cached_at: None,
    }
  }

  /// Create a new cache result from cached data that is still fresh.
  pub fn from_cache(data: T, cached_at: i64) -> Self {
    Self {
      data,
      source: CacheSource::CacheFresh,
      cached_at: Some(cached_at),
    }
  }

  /// Create a new cache result for offline mode.
  pub fn offline(data: T, cached_at: Option<i64>) -> Self {
    Self {
      data,
      source: CacheSource::Offline,
      cached_at,
    }
  }
}

/// Indicates where cached data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Fresh data from network
  Network,
  /// Data from cache, still considered fresh
  CacheFresh,
  /// Remote unreachable, serving whatever the cache holds
  Offline,
}
