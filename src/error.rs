//! Error taxonomy for the engine.
//!
//! None of these messages are meant for end users. Callers map the kinds to
//! their own wording.

use thiserror::Error;

/// Errors produced by the local store and the components built on it.
#[derive(Error, Debug)]
pub enum Error {
  /// The store cannot be opened (platform denied persistent storage, disk
  /// full, corrupt file). Fatal for the session.
  #[error("Storage unavailable: {0}")]
  StorageUnavailable(String),

  /// A single operation failed to commit. Retry the call, not the session.
  #[error("Transaction failed: {0}")]
  TransactionFailed(String),

  /// A record could not be encoded or decoded.
  #[error("Serialization error: {0}")]
  Serialization(#[from] serde_json::Error),

  /// The caller passed a value the engine refuses to store.
  #[error("Invalid input: {0}")]
  InvalidInput(String),
}

impl Error {
  /// Whether retrying the same call may succeed.
  pub fn is_retryable(&self) -> bool {
    matches!(self, Self::TransactionFailed(_))
  }
}

impl From<rusqlite::Error> for Error {
  fn from(e: rusqlite::Error) -> Self {
    Self::TransactionFailed(e.to_string())
  }
}

/// Result alias for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Failure reported by the remote action acceptor during replay.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApplyError {
  /// Network or timeout failure; the same request may succeed later.
  #[error("Retryable remote failure: {0}")]
  Retryable(String),

  /// The remote will never accept this exact request.
  #[error("Permanent remote rejection: {0}")]
  Permanent(String),
}

impl ApplyError {
  pub fn is_retryable(&self) -> bool {
    matches!(self, Self::Retryable(_))
  }
}

/// Failure while fetching fresh content from the remote.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Remote content fetch failed: {message}")]
pub struct RemoteError {
  pub message: String,
  pub retryable: bool,
}

impl RemoteError {
  pub fn retryable(message: impl Into<String>) -> Self {
    Self {
      message: message.into(),
      retryable: true,
    }
  }

  pub fn permanent(message: impl Into<String>) -> Self {
    Self {
      message: message.into(),
      retryable: false,
    }
  }
}
