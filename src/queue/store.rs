//! Durable queue of pending actions.

use rusqlite::{params, OptionalExtension, Row};
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::clock::{system_clock, SharedClock};
use crate::db::{Collection, Store};
use crate::error::{Error, Result};

use super::types::{ActionType, PendingAction, SyncMark, TargetType};

/// Process-local counter mixed into action ids so that identical actions
/// within the same millisecond still get distinct ids.
static ID_NONCE: AtomicU64 = AtomicU64::new(0);

const SELECT_COLUMNS: &str =
  "id, seq, action_type, target_id, target_type, payload, timestamp, synced, synced_at";

/// Append-only queue of user mutations awaiting replay.
#[derive(Clone)]
pub struct ActionQueue {
  store: Store,
  clock: SharedClock,
}

impl ActionQueue {
  pub fn new(store: Store) -> Self {
    Self::with_clock(store, system_clock())
  }

  pub fn with_clock(store: Store, clock: SharedClock) -> Self {
    Self { store, clock }
  }

  /// Record a mutation with `synced = false` and return it.
  pub fn enqueue(
    &self,
    action_type: ActionType,
    target_id: &str,
    target_type: TargetType,
    payload: serde_json::Value,
  ) -> Result<PendingAction> {
    if target_id.trim().is_empty() {
      return Err(Error::InvalidInput("action target id is empty".into()));
    }

    let timestamp = self.clock.now_millis();
    self.insert(PendingAction {
      id: action_id(action_type, target_id, timestamp),
      action_type,
      target_id: target_id.to_string(),
      target_type,
      payload,
      timestamp,
      synced: false,
      synced_at: None,
      seq: 0,
    })
  }

  /// Store `action` as the newest unsynced record and return it with its
  /// assigned `seq`.
  fn insert(&self, mut action: PendingAction) -> Result<PendingAction> {
    let payload_json = serde_json::to_string(&action.payload)?;

    let seq = self.store.write(Collection::PendingActions, |tx| {
      let seq: i64 = tx.query_row(
        "SELECT COALESCE(MAX(seq), 0) + 1 FROM pending_actions",
        [],
        |row| row.get(0),
      )?;
      // An id collision only overwrites a record that is still pending.
      let changed = tx.execute(
        "INSERT INTO pending_actions
           (id, seq, action_type, target_id, target_type, payload, timestamp, synced)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0)
         ON CONFLICT(id) DO UPDATE SET
           seq = excluded.seq,
           action_type = excluded.action_type,
           target_id = excluded.target_id,
           target_type = excluded.target_type,
           payload = excluded.payload,
           timestamp = excluded.timestamp
         WHERE pending_actions.synced = 0",
        params![
          action.id,
          seq,
          action.action_type,
          action.target_id,
          action.target_type,
          payload_json,
          action.timestamp
        ],
      )?;
      if changed == 0 {
        return Err(Error::TransactionFailed(format!(
          "action id {} collides with a synced record",
          action.id
        )));
      }
      Ok(seq)
    })?;
    action.seq = seq;

    tracing::debug!(
      id = %action.id,
      action_type = %action.action_type,
      target_id = %action.target_id,
      "queued pending action"
    );
    Ok(action)
  }

  /// Every unsynced action, oldest first.
  pub fn list_unsynced(&self) -> Result<Vec<PendingAction>> {
    let sql = format!(
      "SELECT {} FROM pending_actions
       WHERE synced = 0
       ORDER BY timestamp ASC, seq ASC",
      SELECT_COLUMNS
    );
    self.store.read(Collection::PendingActions, |tx| {
      let mut stmt = tx.prepare(&sql)?;
      let actions = stmt
        .query_map([], row_to_action)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
      Ok(actions)
    })
  }

  /// Most recent actions regardless of sync state, newest first.
  pub fn list_recent(&self, limit: usize) -> Result<Vec<PendingAction>> {
    let limit = i64::try_from(limit).unwrap_or(i64::MAX);
    let sql = format!(
      "SELECT {} FROM pending_actions
       ORDER BY timestamp DESC, seq DESC
       LIMIT ?1",
      SELECT_COLUMNS
    );
    self.store.read(Collection::PendingActions, |tx| {
      let mut stmt = tx.prepare(&sql)?;
      let actions = stmt
        .query_map(params![limit], row_to_action)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
      Ok(actions)
    })
  }

  pub fn get(&self, id: &str) -> Result<Option<PendingAction>> {
    let sql = format!("SELECT {} FROM pending_actions WHERE id = ?1", SELECT_COLUMNS);
    self.store.read(Collection::PendingActions, |tx| {
      Ok(tx.query_row(&sql, params![id], row_to_action).optional()?)
    })
  }

  pub fn pending_count(&self) -> Result<usize> {
    let count: i64 = self.store.read(Collection::PendingActions, |tx| {
      Ok(tx.query_row(
        "SELECT COUNT(*) FROM pending_actions WHERE synced = 0",
        [],
        |row| row.get(0),
      )?)
    })?;
    Ok(usize::try_from(count).unwrap_or(0))
  }

  /// Flip `synced` to true. Already-synced and unknown ids are no-ops.
  pub fn mark_synced(&self, id: &str) -> Result<SyncMark> {
    let now = self.clock.now_millis();

    let mark = self.store.write(Collection::PendingActions, |tx| {
      let synced: Option<bool> = tx
        .query_row(
          "SELECT synced FROM pending_actions WHERE id = ?1",
          params![id],
          |row| row.get(0),
        )
        .optional()?;

      match synced {
        None => Ok(SyncMark::NotFound),
        Some(true) => Ok(SyncMark::AlreadySynced),
        Some(false) => {
          tx.execute(
            "UPDATE pending_actions SET synced = 1, synced_at = ?2
             WHERE id = ?1 AND synced = 0",
            params![id, now],
          )?;
          Ok(SyncMark::Marked)
        }
      }
    })?;

    tracing::debug!(id, ?mark, "mark synced");
    Ok(mark)
  }
}

/// Digest of type, target, creation instant and a process-local nonce.
fn action_id(action_type: ActionType, target_id: &str, timestamp: i64) -> String {
  let nonce = ID_NONCE.fetch_add(1, Ordering::Relaxed);
  let input = format!("{}:{}:{}:{}", action_type, target_id, timestamp, nonce);

  let mut hasher = Sha256::new();
  hasher.update(input.as_bytes());
  let digest = hasher.finalize();
  hex::encode(&digest[..16])
}

fn row_to_action(row: &Row<'_>) -> rusqlite::Result<PendingAction> {
  let payload: String = row.get(5)?;
  let payload = serde_json::from_str(&payload).map_err(|e| {
    rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, Box::new(e))
  })?;

  Ok(PendingAction {
    id: row.get(0)?,
    seq: row.get(1)?,
    action_type: row.get(2)?,
    target_id: row.get(3)?,
    target_type: row.get(4)?,
    payload,
    timestamp: row.get(6)?,
    synced: row.get(7)?,
    synced_at: row.get(8)?,
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::clock::ManualClock;
  use serde_json::json;
  use std::sync::Arc;

  fn queue_with_clock(start: i64) -> (ActionQueue, ManualClock) {
    let clock = ManualClock::new(start);
    let queue = ActionQueue::with_clock(Store::open_in_memory().unwrap(), Arc::new(clock.clone()));
    (queue, clock)
  }

  #[test]
  fn test_enqueue_persists_unsynced_record() {
    let (queue, _) = queue_with_clock(5_000);
    let action = queue
      .enqueue(ActionType::Like, "post-1", TargetType::Post, json!({}))
      .unwrap();

    assert!(!action.synced);
    assert_eq!(action.timestamp, 5_000);
    assert_eq!(queue.get(&action.id).unwrap(), Some(action));
  }

  #[test]
  fn test_id_collision_with_synced_record_fails() {
    let (queue, _) = queue_with_clock(0);
    let original = queue
      .enqueue(ActionType::Like, "post-1", TargetType::Post, json!({}))
      .unwrap();
    queue.mark_synced(&original.id).unwrap();

    let mut replay = original.clone();
    replay.payload = json!({"again": true});
    let err = queue.insert(replay).unwrap_err();

    assert!(matches!(err, Error::TransactionFailed(m) if m.contains("collides")));
    let stored = queue.get(&original.id).unwrap().unwrap();
    assert!(stored.synced);
    assert_eq!(stored.payload, json!({}));
  }

  #[test]
  fn test_enqueue_rejects_empty_target() {
    let (queue, _) = queue_with_clock(0);
    let err = queue
      .enqueue(ActionType::Share, "", TargetType::News, json!(null))
      .unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));
  }

  #[test]
  fn test_same_millisecond_actions_get_distinct_ids() {
    let (queue, _) = queue_with_clock(1_000);
    let a = queue
      .enqueue(ActionType::Like, "post-1", TargetType::Post, json!({}))
      .unwrap();
    let b = queue
      .enqueue(ActionType::Like, "post-1", TargetType::Post, json!({}))
      .unwrap();

    assert_ne!(a.id, b.id);
    assert_eq!(queue.pending_count().unwrap(), 2);
  }

  #[test]
  fn test_list_unsynced_is_oldest_first() {
    let (queue, clock) = queue_with_clock(0);
    clock.set(30);
    let late = queue
      .enqueue(ActionType::Comment, "a", TargetType::Post, json!({"text": "hi"}))
      .unwrap();
    clock.set(10);
    let early = queue
      .enqueue(ActionType::Like, "b", TargetType::Post, json!({}))
      .unwrap();
    let same_ms = queue
      .enqueue(ActionType::Bookmark, "c", TargetType::News, json!({}))
      .unwrap();

    let ids: Vec<String> = queue
      .list_unsynced()
      .unwrap()
      .into_iter()
      .map(|a| a.id)
      .collect();
    assert_eq!(ids, vec![early.id, same_ms.id, late.id]);
  }

  #[test]
  fn test_mark_synced_is_idempotent() {
    let (queue, clock) = queue_with_clock(100);
    let action = queue
      .enqueue(ActionType::Attend, "event-7", TargetType::Event, json!({}))
      .unwrap();

    clock.advance(50);
    assert_eq!(queue.mark_synced(&action.id).unwrap(), SyncMark::Marked);
    let once = queue.get(&action.id).unwrap().unwrap();

    clock.advance(50);
    assert_eq!(queue.mark_synced(&action.id).unwrap(), SyncMark::AlreadySynced);
    let twice = queue.get(&action.id).unwrap().unwrap();

    assert_eq!(once, twice);
    assert!(twice.synced);
    assert_eq!(twice.synced_at, Some(150));
    assert!(queue.list_unsynced().unwrap().is_empty());
  }

  #[test]
  fn test_mark_synced_unknown_id_changes_nothing() {
    let (queue, _) = queue_with_clock(0);
    let action = queue
      .enqueue(ActionType::Like, "x", TargetType::Post, json!({}))
      .unwrap();

    assert_eq!(queue.mark_synced("missing").unwrap(), SyncMark::NotFound);
    assert_eq!(queue.list_unsynced().unwrap(), vec![action]);
  }

  #[test]
  fn test_payload_round_trips_through_store() {
    let (queue, _) = queue_with_clock(0);
    let payload = json!({"text": "nice", "mentions": ["a", "b"]});
    let action = queue
      .enqueue(ActionType::Comment, "post-9", TargetType::Post, payload.clone())
      .unwrap();
    assert_eq!(queue.get(&action.id).unwrap().unwrap().payload, payload);
  }
}
