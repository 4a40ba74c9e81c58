//! Cache layer that orchestrates caching logic with network fetching.

use std::sync::Arc;
use std::time::Duration;

use crate::clock::{system_clock, SharedClock};
use crate::content::{partition, ContentKind, EventItem, NewsItem};
use crate::db::Store;
use crate::error::{Error, RemoteError};
use crate::remote::{ContentSource, FetchParams};

use super::storage::ContentCache;
use super::traits::{CacheResult, CachedItem, Cacheable};

/// Failure of a cache-first read.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
  /// Nothing cached and the remote could not be reached
  #[error(transparent)]
  Remote(#[from] RemoteError),
  /// Fresh content arrived but could not be cached
  #[error(transparent)]
  Storage(#[from] Error),
}

/// Cache layer that manages caching logic and network fetching.
///
/// This layer sits between callers and the content source, providing
/// transparent caching with offline support.
pub struct CacheLayer<S: ContentSource> {
  source: Arc<S>,
  news: ContentCache<NewsItem>,
  events: ContentCache<EventItem>,
  clock: SharedClock,
  /// How long before cached data is considered stale
  stale_time: Duration,
}

impl<S: ContentSource> CacheLayer<S> {
  pub fn new(store: Store, source: S) -> Self {
    Self::with_clock(store, source, system_clock())
  }

  pub fn with_clock(store: Store, source: S, clock: SharedClock) -> Self {
    Self {
      source: Arc::new(source),
      news: ContentCache::with_clock(store.clone(), clock.clone()),
      events: ContentCache::with_clock(store, clock.clone()),
      clock,
      stale_time: Duration::from_secs(5 * 60),
    }
  }

  /// Set the stale time for cached data.
  pub fn with_stale_time(mut self, stale_time: Duration) -> Self {
    self.stale_time = stale_time;
    self
  }

  pub fn news_cache(&self) -> &ContentCache<NewsItem> {
    &self.news
  }

  pub fn events_cache(&self) -> &ContentCache<EventItem> {
    &self.events
  }

  fn is_stale(&self, cached_at: i64) -> bool {
    let stale_millis = i64::try_from(self.stale_time.as_millis()).unwrap_or(i64::MAX);
    self.clock.now_millis().saturating_sub(cached_at) > stale_millis
  }

  /// Cache-first news listing.
  pub async fn news(
    &self,
    params: &FetchParams,
    limit: usize,
  ) -> Result<CacheResult<Vec<CachedItem<NewsItem>>>, FetchError> {
    self
      .fetch_list(ContentKind::News, params, limit, &self.news)
      .await
  }

  /// Cache-first events listing.
  pub async fn events(
    &self,
    params: &FetchParams,
    limit: usize,
  ) -> Result<CacheResult<Vec<CachedItem<EventItem>>>, FetchError> {
    self
      .fetch_list(ContentKind::Events, params, limit, &self.events)
      .await
  }

  /// Fetch a list with cache-first strategy.
  ///
  /// 1. Check cache - if fresh, return immediately
  /// 2. If stale/missing, fetch from the content source
  /// 3. On remote failure, return stale cache (offline mode)
  /// 4. Update cache with new data, keeping local flags
  async fn fetch_list<T: Cacheable>(
    &self,
    kind: ContentKind,
    params: &FetchParams,
    limit: usize,
    cache: &ContentCache<T>,
  ) -> Result<CacheResult<Vec<CachedItem<T>>>, FetchError> {
    let cached = cache.list(limit);
    let newest = cached.first().map(|c| c.cached_at);

    if let Some(cached_at) = newest {
      if !self.is_stale(cached_at) {
        return Ok(CacheResult::from_cache(cached, cached_at));
      }
    }

    match self.source.fetch_content(kind, params).await {
      Ok(items) => {
        let (news, events) = partition(items);
        self.news.refresh_all(&news)?;
        self.events.refresh_all(&events)?;
        Ok(CacheResult::from_network(cache.try_list(limit)?))
      }
      Err(e) if newest.is_some() => {
        tracing::warn!(%kind, error = %e, "content fetch failed, serving cached data");
        Ok(CacheResult::offline(cached, newest))
      }
      Err(e) => Err(e.into()),
    }
  }
}

impl<S: ContentSource> Clone for CacheLayer<S> {
  fn clone(&self) -> Self {
    Self {
      source: Arc::clone(&self.source),
      news: self.news.clone(),
      events: self.events.clone(),
      clock: self.clock.clone(),
      stale_time: self.stale_time,
    }
  }
}
