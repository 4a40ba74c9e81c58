//! Interfaces to the remote system, plus an HTTP implementation.
//!
//! The engine only depends on the traits. [`HttpRemote`] is one way to
//! satisfy them.

mod api_types;
mod client;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::content::{ContentItem, ContentKind};
use crate::error::{ApplyError, RemoteError};
use crate::queue::PendingAction;

pub use client::HttpRemote;

/// Filters forwarded to the content source.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FetchParams {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub limit: Option<usize>,
  /// Only content published after this instant (epoch millis)
  #[serde(skip_serializing_if = "Option::is_none")]
  pub since: Option<i64>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub category: Option<String>,
}

/// Acknowledgement returned by the remote for an applied action.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ack {
  /// Id the remote assigned to the resulting entity, if any
  #[serde(default)]
  pub remote_id: Option<String>,
}

/// Read path: serves fresh content.
#[async_trait]
pub trait ContentSource: Send + Sync {
  async fn fetch_content(
    &self,
    kind: ContentKind,
    params: &FetchParams,
  ) -> Result<Vec<ContentItem>, RemoteError>;
}

/// Write path: accepts replayed actions. Must be idempotent, since replay is
/// at-least-once.
#[async_trait]
pub trait ActionApplier: Send + Sync {
  async fn apply_action(&self, action: &PendingAction) -> Result<Ack, ApplyError>;
}

/// Receives actions the remote permanently rejected.
pub trait ErrorReporter: Send + Sync {
  fn report(&self, action: &PendingAction, error: &ApplyError);
}

/// Reporter that writes permanent failures to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogReporter;

impl ErrorReporter for LogReporter {
  fn report(&self, action: &PendingAction, error: &ApplyError) {
    tracing::error!(
      action_id = %action.id,
      action_type = %action.action_type,
      target_id = %action.target_id,
      %error,
      "remote permanently rejected action"
    );
  }
}
