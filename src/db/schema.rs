//! Named collections and the ordered migration list.

use rusqlite::{Connection, TransactionBehavior};

/// Schema version a fresh or upgraded store ends up at.
pub const SCHEMA_VERSION: u32 = 2;

/// Record collections owned by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
  News,
  Events,
  PendingActions,
  Settings,
}

impl Collection {
  pub const ALL: [Collection; 4] = [
    Collection::News,
    Collection::Events,
    Collection::PendingActions,
    Collection::Settings,
  ];

  pub fn table_name(self) -> &'static str {
    match self {
      Self::News => "content_news",
      Self::Events => "content_events",
      Self::PendingActions => "pending_actions",
      Self::Settings => "settings",
    }
  }
}

impl std::fmt::Display for Collection {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.table_name())
  }
}

/// One step of a migration.
#[derive(Debug, Clone, Copy)]
pub enum Step {
  CreateCollection {
    collection: &'static str,
    columns: &'static str,
  },
  CreateIndex {
    name: &'static str,
    collection: &'static str,
    columns: &'static str,
  },
}

impl Step {
  fn sql(&self) -> String {
    match self {
      Self::CreateCollection {
        collection,
        columns,
      } => format!("CREATE TABLE IF NOT EXISTS {} ({})", collection, columns),
      Self::CreateIndex {
        name,
        collection,
        columns,
      } => format!(
        "CREATE INDEX IF NOT EXISTS {} ON {}({})",
        name, collection, columns
      ),
    }
  }
}

/// Steps that bring the store from `version - 1` to `version`.
#[derive(Debug, Clone, Copy)]
pub struct Migration {
  pub version: u32,
  pub steps: &'static [Step],
}

const CONTENT_COLUMNS: &str = "id TEXT PRIMARY KEY NOT NULL,
    data TEXT NOT NULL,
    cached_at INTEGER NOT NULL,
    flag INTEGER NOT NULL DEFAULT 0";

const PENDING_ACTION_COLUMNS: &str = "id TEXT PRIMARY KEY NOT NULL,
    seq INTEGER NOT NULL,
    action_type TEXT NOT NULL,
    target_id TEXT NOT NULL,
    target_type TEXT NOT NULL,
    payload TEXT NOT NULL,
    timestamp INTEGER NOT NULL,
    synced INTEGER NOT NULL DEFAULT 0,
    synced_at INTEGER";

const SETTINGS_COLUMNS: &str = "key TEXT PRIMARY KEY NOT NULL,
    value TEXT NOT NULL,
    updated_at INTEGER NOT NULL";

pub const MIGRATIONS: &[Migration] = &[
  Migration {
    version: 1,
    steps: &[
      Step::CreateCollection {
        collection: "content_news",
        columns: CONTENT_COLUMNS,
      },
      Step::CreateIndex {
        name: "idx_content_news_cached_at",
        collection: "content_news",
        columns: "cached_at",
      },
      Step::CreateCollection {
        collection: "content_events",
        columns: CONTENT_COLUMNS,
      },
      Step::CreateIndex {
        name: "idx_content_events_cached_at",
        collection: "content_events",
        columns: "cached_at",
      },
      Step::CreateCollection {
        collection: "pending_actions",
        columns: PENDING_ACTION_COLUMNS,
      },
      Step::CreateIndex {
        name: "idx_pending_actions_order",
        collection: "pending_actions",
        columns: "synced, timestamp, seq",
      },
      Step::CreateIndex {
        name: "idx_pending_actions_target",
        collection: "pending_actions",
        columns: "target_id",
      },
    ],
  },
  Migration {
    version: 2,
    steps: &[
      Step::CreateCollection {
        collection: "settings",
        columns: SETTINGS_COLUMNS,
      },
      Step::CreateIndex {
        name: "idx_content_news_flag",
        collection: "content_news",
        columns: "flag",
      },
      Step::CreateIndex {
        name: "idx_content_events_flag",
        collection: "content_events",
        columns: "flag",
      },
    ],
  },
];

/// Read the stored schema version.
pub fn stored_version(conn: &Connection) -> rusqlite::Result<u32> {
  conn.query_row("PRAGMA user_version", [], |row| row.get(0))
}

/// Run every migration above the stored version, up to `target`, inside a
/// single transaction. Returns the version the store is at afterwards.
///
/// If any step fails the transaction rolls back and the stored version is
/// left untouched.
pub fn migrate(
  conn: &mut Connection,
  migrations: &[Migration],
  target: u32,
) -> rusqlite::Result<u32> {
  let current = stored_version(conn)?;
  if current >= target {
    return Ok(current);
  }

  let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
  for migration in migrations
    .iter()
    .filter(|m| m.version > current && m.version <= target)
  {
    tracing::debug!(version = migration.version, "applying schema migration");
    for step in migration.steps {
      tx.execute_batch(&step.sql())?;
    }
  }
  tx.pragma_update(None, "user_version", target)?;
  tx.commit()?;

  tracing::info!(from = current, to = target, "store schema upgraded");
  Ok(target)
}

#[cfg(test)]
mod tests {
  use super::*;

  fn table_exists(conn: &Connection, name: &str) -> bool {
    conn
      .query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
        [name],
        |row| row.get::<_, i64>(0),
      )
      .map(|n| n == 1)
      .unwrap_or(false)
  }

  #[test]
  fn test_migrate_fresh_creates_all_collections() {
    let mut conn = Connection::open_in_memory().unwrap();
    let version = migrate(&mut conn, MIGRATIONS, SCHEMA_VERSION).unwrap();
    assert_eq!(version, SCHEMA_VERSION);
    for collection in Collection::ALL {
      assert!(table_exists(&conn, collection.table_name()), "{}", collection);
    }
  }

  #[test]
  fn test_migrate_is_idempotent() {
    let mut conn = Connection::open_in_memory().unwrap();
    migrate(&mut conn, MIGRATIONS, SCHEMA_VERSION).unwrap();
    let version = migrate(&mut conn, MIGRATIONS, SCHEMA_VERSION).unwrap();
    assert_eq!(version, SCHEMA_VERSION);
  }

  #[test]
  fn test_partial_upgrade_only_runs_missing_versions() {
    let mut conn = Connection::open_in_memory().unwrap();
    migrate(&mut conn, MIGRATIONS, 1).unwrap();
    assert!(!table_exists(&conn, "settings"));

    let version = migrate(&mut conn, MIGRATIONS, 2).unwrap();
    assert_eq!(version, 2);
    assert!(table_exists(&conn, "settings"));
  }

  #[test]
  fn test_failed_step_rolls_back_whole_upgrade() {
    const BROKEN: &[Migration] = &[Migration {
      version: 1,
      steps: &[
        Step::CreateCollection {
          collection: "content_news",
          columns: CONTENT_COLUMNS,
        },
        Step::CreateIndex {
          name: "idx_missing",
          collection: "no_such_collection",
          columns: "id",
        },
      ],
    }];

    let mut conn = Connection::open_in_memory().unwrap();
    assert!(migrate(&mut conn, BROKEN, 1).is_err());
    assert_eq!(stored_version(&conn).unwrap(), 0);
    assert!(!table_exists(&conn, "content_news"));
  }
}
