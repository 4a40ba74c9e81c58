//! Key/value settings persisted alongside the cache.

use rusqlite::{params, OptionalExtension};
use serde::{de::DeserializeOwned, Serialize};

use crate::clock::{system_clock, SharedClock};
use crate::db::{Collection, Store};
use crate::error::Result;

/// Epoch millis of the last drain that applied at least one action.
pub const LAST_SYNC_AT: &str = "last_sync_at";

#[derive(Clone)]
pub struct Settings {
  store: Store,
  clock: SharedClock,
}

impl Settings {
  pub fn new(store: Store) -> Self {
    Self::with_clock(store, system_clock())
  }

  pub fn with_clock(store: Store, clock: SharedClock) -> Self {
    Self { store, clock }
  }

  pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
    let raw: Option<String> = self.store.read(Collection::Settings, |tx| {
      Ok(
        tx.query_row(
          "SELECT value FROM settings WHERE key = ?1",
          params![key],
          |row| row.get(0),
        )
        .optional()?,
      )
    })?;

    match raw {
      Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
      None => Ok(None),
    }
  }

  pub fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
    let raw = serde_json::to_string(value)?;
    let now = self.clock.now_millis();

    self.store.write(Collection::Settings, |tx| {
      tx.execute(
        "INSERT INTO settings (key, value, updated_at) VALUES (?1, ?2, ?3)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
        params![key, raw, now],
      )?;
      Ok(())
    })?;

    tracing::debug!(key, "setting written");
    Ok(())
  }

  /// Returns whether the key existed.
  pub fn remove(&self, key: &str) -> Result<bool> {
    let removed = self.store.write(Collection::Settings, |tx| {
      Ok(tx.execute("DELETE FROM settings WHERE key = ?1", params![key])?)
    })?;
    Ok(removed > 0)
  }

  pub fn last_sync_at(&self) -> Result<Option<i64>> {
    self.get(LAST_SYNC_AT)
  }
}
