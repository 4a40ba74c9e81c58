pub mod schema;

use rusqlite::{Connection, Transaction, TransactionBehavior};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::{Error, Result};

pub use schema::{Collection, SCHEMA_VERSION};

/// Whether the store survives a restart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreMode {
  Persistent,
  /// Fallback when persistent storage was denied. Nothing outlives the process.
  MemoryOnly,
}

struct StoreInner {
  conn: Mutex<Connection>,
  path: Option<PathBuf>,
  mode: StoreMode,
  version: u32,
}

/// Handle to the local database.
///
/// Cloning shares the same connection. Every read and write goes through a
/// scoped transaction obtained from [`Store::read`] or [`Store::write`].
#[derive(Clone)]
pub struct Store {
  inner: Arc<StoreInner>,
}

impl Store {
  /// Open or create the store at `path`, upgrading the schema if needed.
  pub fn open(path: impl AsRef<Path>) -> Result<Self> {
    let path = path.as_ref();

    // Ensure parent directory exists
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
      std::fs::create_dir_all(parent).map_err(|e| {
        Error::StorageUnavailable(format!(
          "Failed to create store directory {}: {}",
          parent.display(),
          e
        ))
      })?;
    }

    let conn = Connection::open(path).map_err(|e| {
      Error::StorageUnavailable(format!(
        "Failed to open store at {}: {}",
        path.display(),
        e
      ))
    })?;

    Self::init(conn, Some(path.to_path_buf()), StoreMode::Persistent)
  }

  /// Open a store that lives only as long as the process.
  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| Error::StorageUnavailable(format!("Failed to open memory store: {}", e)))?;

    Self::init(conn, None, StoreMode::MemoryOnly)
  }

  /// Open the store at `path`, degrading to a memory-only store when
  /// persistent storage is unavailable.
  pub fn open_or_memory(path: impl AsRef<Path>) -> Result<(Self, StoreMode)> {
    match Self::open(path.as_ref()) {
      Ok(store) => Ok((store, StoreMode::Persistent)),
      Err(Error::StorageUnavailable(reason)) => {
        tracing::warn!(%reason, "persistent store unavailable, continuing memory-only");
        Ok((Self::open_in_memory()?, StoreMode::MemoryOnly))
      }
      Err(e) => Err(e),
    }
  }

  /// Default store location under the platform data directory.
  pub fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| Error::StorageUnavailable("Could not determine data directory".into()))?;

    Ok(data_dir.join("offsync").join("store.db"))
  }

  fn init(mut conn: Connection, path: Option<PathBuf>, mode: StoreMode) -> Result<Self> {
    let unavailable = |e: rusqlite::Error| Error::StorageUnavailable(e.to_string());

    conn
      .busy_timeout(std::time::Duration::from_secs(5))
      .map_err(unavailable)?;
    if mode == StoreMode::Persistent {
      conn
        .pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))
        .map_err(unavailable)?;
      conn
        .pragma_update(None, "synchronous", "FULL")
        .map_err(unavailable)?;
    }

    let version =
      schema::migrate(&mut conn, schema::MIGRATIONS, SCHEMA_VERSION).map_err(unavailable)?;

    tracing::debug!(
      path = ?path,
      ?mode,
      version,
      "store opened"
    );

    Ok(Self {
      inner: Arc::new(StoreInner {
        conn: Mutex::new(conn),
        path,
        mode,
        version,
      }),
    })
  }

  pub fn mode(&self) -> StoreMode {
    self.inner.mode
  }

  pub fn path(&self) -> Option<&Path> {
    self.inner.path.as_deref()
  }

  pub fn schema_version(&self) -> u32 {
    self.inner.version
  }

  fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
    self
      .inner
      .conn
      .lock()
      .map_err(|e| Error::TransactionFailed(format!("Lock poisoned: {}", e)))
  }

  /// Run a read-only closure inside a deferred transaction.
  ///
  /// The transaction covers the whole store; `collection` names the table
  /// the closure works on and is prefixed to any `TransactionFailed` it
  /// returns.
  pub fn read<T, F>(&self, collection: Collection, f: F) -> Result<T>
  where
    F: FnOnce(&Transaction<'_>) -> Result<T>,
  {
    let mut conn = self.lock()?;
    let tx = conn
      .transaction_with_behavior(TransactionBehavior::Deferred)
      .map_err(|e| in_collection(collection, e.into()))?;
    let result = f(&tx).map_err(|e| in_collection(collection, e));
    if let Err(e) = &result {
      tracing::debug!(%collection, error = %e, "read transaction failed");
    }
    // Dropping the transaction rolls it back, which is a no-op for reads.
    result
  }

  /// Run a closure inside an immediate write transaction.
  ///
  /// The transaction is committed before this returns. If the closure fails,
  /// nothing it wrote becomes visible. `collection` labels failures the same
  /// way as [`Store::read`].
  pub fn write<T, F>(&self, collection: Collection, f: F) -> Result<T>
  where
    F: FnOnce(&Transaction<'_>) -> Result<T>,
  {
    let mut conn = self.lock()?;
    let tx = conn
      .transaction_with_behavior(TransactionBehavior::Immediate)
      .map_err(|e| in_collection(collection, e.into()))?;
    let value = f(&tx).map_err(|e| in_collection(collection, e))?;
    tx.commit().map_err(|e| {
      Error::TransactionFailed(format!("{}: failed to commit write: {}", collection, e))
    })?;
    Ok(value)
  }

  /// Bytes occupied by live pages.
  pub fn used_bytes(&self) -> Result<u64> {
    let conn = self.lock()?;
    let page_count: u64 = conn.query_row("PRAGMA page_count", [], |row| row.get(0))?;
    let free_pages: u64 = conn.query_row("PRAGMA freelist_count", [], |row| row.get(0))?;
    let page_size: u64 = conn.query_row("PRAGMA page_size", [], |row| row.get(0))?;
    Ok(page_count.saturating_sub(free_pages) * page_size)
  }

  /// Close the store. If other clones of this handle are still alive the
  /// connection stays open until the last one is dropped.
  pub fn close(self) -> Result<()> {
    match Arc::try_unwrap(self.inner) {
      Ok(inner) => {
        let conn = inner
          .conn
          .into_inner()
          .map_err(|e| Error::TransactionFailed(format!("Lock poisoned: {}", e)))?;
        conn
          .close()
          .map_err(|(_, e)| Error::TransactionFailed(format!("Failed to close store: {}", e)))?;
        tracing::debug!(path = ?inner.path, "store closed");
        Ok(())
      }
      Err(_) => {
        tracing::debug!("store handle released, other handles still open");
        Ok(())
      }
    }
  }
}

fn in_collection(collection: Collection, e: Error) -> Error {
  match e {
    Error::TransactionFailed(message) => {
      Error::TransactionFailed(format!("{}: {}", collection, message))
    }
    other => other,
  }
}

impl std::fmt::Debug for Store {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Store")
      .field("path", &self.inner.path)
      .field("mode", &self.inner.mode)
      .field("version", &self.inner.version)
      .finish_non_exhaustive()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use rusqlite::params;

  #[test]
  fn test_open_creates_file_and_schema() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("store.db");

    let store = Store::open(&path).unwrap();
    assert!(path.exists());
    assert_eq!(store.mode(), StoreMode::Persistent);
    assert_eq!(store.schema_version(), SCHEMA_VERSION);
    store.close().unwrap();
  }

  #[test]
  fn test_writes_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store.db");

    let store = Store::open(&path).unwrap();
    store
      .write(Collection::Settings, |tx| {
        tx.execute(
          "INSERT INTO settings (key, value, updated_at) VALUES (?1, ?2, ?3)",
          params!["k", "\"v\"", 1],
        )?;
        Ok(())
      })
      .unwrap();
    store.close().unwrap();

    let store = Store::open(&path).unwrap();
    let value: String = store
      .read(Collection::Settings, |tx| {
        Ok(tx.query_row("SELECT value FROM settings WHERE key = 'k'", [], |row| {
          row.get(0)
        })?)
      })
      .unwrap();
    assert_eq!(value, "\"v\"");
  }

  #[test]
  fn test_failed_write_leaves_no_partial_state() {
    let store = Store::open_in_memory().unwrap();
    let result: Result<()> = store.write(Collection::Settings, |tx| {
      tx.execute(
        "INSERT INTO settings (key, value, updated_at) VALUES ('a', '1', 1)",
        [],
      )?;
      Err(Error::InvalidInput("abort".into()))
    });
    assert!(result.is_err());

    let count: i64 = store
      .read(Collection::Settings, |tx| {
        Ok(tx.query_row("SELECT COUNT(*) FROM settings", [], |row| row.get(0))?)
      })
      .unwrap();
    assert_eq!(count, 0);
  }

  #[test]
  fn test_failures_name_their_collection() {
    let store = Store::open_in_memory().unwrap();

    let err = store
      .write(Collection::Settings, |tx| {
        Ok(tx.execute("INSERT INTO missing_table VALUES (1)", [])?)
      })
      .unwrap_err();
    assert!(matches!(&err, Error::TransactionFailed(m) if m.starts_with("settings: ")));

    let err = store
      .read(Collection::PendingActions, |tx| {
        Ok(tx.query_row("SELECT nope FROM pending_actions", [], |row| row.get::<_, i64>(0))?)
      })
      .unwrap_err();
    assert!(matches!(&err, Error::TransactionFailed(m) if m.starts_with("pending_actions: ")));

    // Other kinds pass through untouched.
    let err = store
      .write(Collection::News, |_| -> Result<()> {
        Err(Error::InvalidInput("bad".into()))
      })
      .unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));
  }

  #[test]
  fn test_open_on_directory_is_storage_unavailable() {
    let dir = tempfile::tempdir().unwrap();
    let err = Store::open(dir.path()).unwrap_err();
    assert!(matches!(err, Error::StorageUnavailable(_)));
  }

  #[test]
  fn test_open_or_memory_falls_back() {
    let dir = tempfile::tempdir().unwrap();
    let (store, mode) = Store::open_or_memory(dir.path()).unwrap();
    assert_eq!(mode, StoreMode::MemoryOnly);
    assert_eq!(store.mode(), StoreMode::MemoryOnly);
    assert_eq!(store.schema_version(), SCHEMA_VERSION);
  }

  #[test]
  fn test_close_with_live_clone_keeps_connection() {
    let store = Store::open_in_memory().unwrap();
    let other = store.clone();
    store.close().unwrap();
    assert!(other.used_bytes().is_ok());
  }
}
