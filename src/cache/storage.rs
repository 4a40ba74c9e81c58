//! Content cache over the local store.

use rusqlite::{params, OptionalExtension, Transaction};
use std::marker::PhantomData;
use std::time::Duration;

use crate::clock::{system_clock, SharedClock};
use crate::db::Store;
use crate::error::{Error, Result};

use super::traits::{CachedItem, Cacheable, FlagUpdate};

/// Cached content of one record type (news or events).
///
/// Records are keyed by their remote id and ordered by when they were cached.
pub struct ContentCache<T: Cacheable> {
  store: Store,
  clock: SharedClock,
  _marker: PhantomData<fn() -> T>,
}

impl<T: Cacheable> ContentCache<T> {
  pub fn new(store: Store) -> Self {
    Self::with_clock(store, system_clock())
  }

  pub fn with_clock(store: Store, clock: SharedClock) -> Self {
    Self {
      store,
      clock,
      _marker: PhantomData,
    }
  }

  fn table() -> &'static str {
    T::collection().table_name()
  }

  /// Cache `item`, stamping it with the current time and a cleared flag.
  ///
  /// Re-caching an existing id overwrites it. Callers that want to keep the
  /// local flag must read it first and use [`ContentCache::put_with_flag`].
  pub fn put(&self, item: &T) -> Result<()> {
    self.put_with_flag(item, false)
  }

  /// Cache `item` with an explicit flag value.
  pub fn put_with_flag(&self, item: &T, flag: bool) -> Result<()> {
    validate_key(item)?;
    let now = self.clock.now_millis();

    self
      .store
      .write(T::collection(), |tx| upsert(tx, item, now, flag))?;

    tracing::debug!(
      collection = %T::collection(),
      id = item.cache_key(),
      cached_at = now,
      "cached content item"
    );
    Ok(())
  }

  /// Cache a batch of items in one transaction. Either all are written or none.
  pub fn put_all(&self, items: &[T]) -> Result<usize> {
    for item in items {
      validate_key(item)?;
    }
    let now = self.clock.now_millis();

    self.store.write(T::collection(), |tx| {
      for item in items {
        upsert(tx, item, now, false)?;
      }
      Ok(())
    })?;

    tracing::debug!(collection = %T::collection(), count = items.len(), "cached content batch");
    Ok(items.len())
  }

  /// Cache fresh copies of `items` in one transaction, keeping the flag of
  /// any record already cached. New records start unflagged.
  pub fn refresh_all(&self, items: &[T]) -> Result<usize> {
    for item in items {
      validate_key(item)?;
    }
    let now = self.clock.now_millis();
    let sql = format!(
      "INSERT INTO {} (id, data, cached_at, flag) VALUES (?1, ?2, ?3, 0)
       ON CONFLICT(id) DO UPDATE SET data = excluded.data, cached_at = excluded.cached_at",
      Self::table()
    );

    self.store.write(T::collection(), |tx| {
      let mut stmt = tx.prepare(&sql)?;
      for item in items {
        let data = serde_json::to_string(item)?;
        stmt.execute(params![item.cache_key(), data, now])?;
      }
      Ok(())
    })?;

    tracing::debug!(collection = %T::collection(), count = items.len(), "refreshed content batch");
    Ok(items.len())
  }

  /// Up to `limit` items, most recently cached first.
  ///
  /// A failed read is logged and yields an empty list.
  pub fn list(&self, limit: usize) -> Vec<CachedItem<T>> {
    self.try_list(limit).unwrap_or_else(|e| {
      tracing::warn!(collection = %T::collection(), error = %e, "cache read failed, serving empty list");
      Vec::new()
    })
  }

  /// Like [`ContentCache::list`] but surfaces storage errors.
  pub fn try_list(&self, limit: usize) -> Result<Vec<CachedItem<T>>> {
    let limit = i64::try_from(limit).unwrap_or(i64::MAX);
    let sql = format!(
      "SELECT id, data, cached_at, flag FROM {}
       ORDER BY cached_at DESC, id DESC
       LIMIT ?1",
      Self::table()
    );

    self.store.read(T::collection(), |tx| {
      let mut stmt = tx.prepare(&sql)?;
      let rows = stmt
        .query_map(params![limit], |row| {
          Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, i64>(2)?,
            row.get::<_, bool>(3)?,
          ))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

      Ok(
        rows
          .into_iter()
          .filter_map(|(id, data, cached_at, flag)| decode(&id, &data, cached_at, flag))
          .collect(),
      )
    })
  }

  /// A single cached item. A failed read is logged and treated as a miss.
  pub fn get(&self, id: &str) -> Option<CachedItem<T>> {
    self.try_get(id).unwrap_or_else(|e| {
      tracing::warn!(collection = %T::collection(), id, error = %e, "cache read failed");
      None
    })
  }

  pub fn try_get(&self, id: &str) -> Result<Option<CachedItem<T>>> {
    let sql = format!(
      "SELECT data, cached_at, flag FROM {} WHERE id = ?1",
      Self::table()
    );

    let row = self.store.read(T::collection(), |tx| {
      Ok(
        tx.query_row(&sql, params![id], |row| {
          Ok((
            row.get::<_, String>(0)?,
            row.get::<_, i64>(1)?,
            row.get::<_, bool>(2)?,
          ))
        })
        .optional()?,
      )
    })?;

    Ok(row.and_then(|(data, cached_at, flag)| decode(id, &data, cached_at, flag)))
  }

  /// Set the read/attending flag. An unknown id is not an error.
  pub fn mark_flag(&self, id: &str, value: bool) -> Result<FlagUpdate> {
    let sql = format!("UPDATE {} SET flag = ?2 WHERE id = ?1", Self::table());
    let changed = self
      .store
      .write(T::collection(), |tx| Ok(tx.execute(&sql, params![id, value])?))?;

    if changed == 0 {
      tracing::debug!(collection = %T::collection(), id, "flag update for unknown id ignored");
      Ok(FlagUpdate::NotFound)
    } else {
      Ok(FlagUpdate::Applied)
    }
  }

  /// Delete every item cached more than `max_age` ago. Returns how many went.
  pub fn evict_older_than(&self, max_age: Duration) -> Result<usize> {
    let max_age = i64::try_from(max_age.as_millis()).unwrap_or(i64::MAX);
    let cutoff = self.clock.now_millis().saturating_sub(max_age);
    let sql = format!("DELETE FROM {} WHERE cached_at < ?1", Self::table());

    let removed = self
      .store
      .write(T::collection(), |tx| Ok(tx.execute(&sql, params![cutoff])?))?;

    tracing::info!(collection = %T::collection(), removed, cutoff, "evicted expired content");
    Ok(removed)
  }

  /// Remove every cached item of this type.
  pub fn clear(&self) -> Result<usize> {
    let sql = format!("DELETE FROM {}", Self::table());
    let removed = self
      .store
      .write(T::collection(), |tx| Ok(tx.execute(&sql, [])?))?;

    tracing::info!(collection = %T::collection(), removed, "cleared content cache");
    Ok(removed)
  }

  pub fn count(&self) -> Result<usize> {
    let sql = format!("SELECT COUNT(*) FROM {}", Self::table());
    let count: i64 = self
      .store
      .read(T::collection(), |tx| Ok(tx.query_row(&sql, [], |row| row.get(0))?))?;
    Ok(usize::try_from(count).unwrap_or(0))
  }
}

impl<T: Cacheable> Clone for ContentCache<T> {
  fn clone(&self) -> Self {
    Self {
      store: self.store.clone(),
      clock: self.clock.clone(),
      _marker: PhantomData,
    }
  }
}

fn validate_key<T: Cacheable>(item: &T) -> Result<()> {
  if item.cache_key().trim().is_empty() {
    return Err(Error::InvalidInput(format!(
      "{} item has an empty id",
      T::collection()
    )));
  }
  Ok(())
}

fn upsert<T: Cacheable>(tx: &Transaction<'_>, item: &T, now: i64, flag: bool) -> Result<()> {
  let data = serde_json::to_string(item)?;
  tx.execute(
    &format!(
      "INSERT OR REPLACE INTO {} (id, data, cached_at, flag) VALUES (?1, ?2, ?3, ?4)",
      T::collection().table_name()
    ),
    params![item.cache_key(), data, now, flag],
  )?;
  Ok(())
}

fn decode<T: Cacheable>(id: &str, data: &str, cached_at: i64, flag: bool) -> Option<CachedItem<T>> {
  match serde_json::from_str(data) {
    Ok(item) => Some(CachedItem {
      item,
      cached_at,
      flag,
    }),
    Err(e) => {
      tracing::warn!(collection = %T::collection(), id, error = %e, "skipping undecodable cache row");
      None
    }
  }
}
