//! Pending action records.

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};

/// User mutation kinds that can be queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionType {
  Like,
  Comment,
  Share,
  Bookmark,
  Attend,
}

impl ActionType {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::Like => "like",
      Self::Comment => "comment",
      Self::Share => "share",
      Self::Bookmark => "bookmark",
      Self::Attend => "attend",
    }
  }
}

/// What a pending action points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetType {
  News,
  Event,
  Post,
}

impl TargetType {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::News => "news",
      Self::Event => "event",
      Self::Post => "post",
    }
  }
}

macro_rules! text_enum {
  ($ty:ty, $label:literal, [$($variant:ident),+]) => {
    impl std::fmt::Display for $ty {
      fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
      }
    }

    impl std::str::FromStr for $ty {
      type Err = String;

      fn from_str(s: &str) -> Result<Self, Self::Err> {
        $(
          if s.eq_ignore_ascii_case(<$ty>::$variant.as_str()) {
            return Ok(<$ty>::$variant);
          }
        )+
        Err(format!("unknown {}: {}", $label, s))
      }
    }

    impl ToSql for $ty {
      fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
      }
    }

    impl FromSql for $ty {
      fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
          .as_str()?
          .parse()
          .map_err(|e: String| FromSqlError::Other(e.into()))
      }
    }
  };
}

text_enum!(ActionType, "action type", [Like, Comment, Share, Bookmark, Attend]);
text_enum!(TargetType, "target type", [News, Event, Post]);

/// A mutation performed locally and not yet confirmed by the remote.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingAction {
  pub id: String,
  pub action_type: ActionType,
  pub target_id: String,
  pub target_type: TargetType,
  /// Action-specific data, opaque to the engine
  pub payload: serde_json::Value,
  /// Creation instant (epoch millis)
  pub timestamp: i64,
  pub synced: bool,
  /// When `synced` flipped to true (epoch millis)
  #[serde(default)]
  pub synced_at: Option<i64>,
  /// Insertion sequence, breaks ties between equal timestamps
  #[serde(skip)]
  pub seq: i64,
}

/// Outcome of marking an action synced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMark {
  Marked,
  AlreadySynced,
  NotFound,
}
