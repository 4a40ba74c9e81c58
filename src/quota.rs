//! Storage usage estimates.

use serde::Serialize;

use crate::db::Store;

/// Used and granted storage in bytes. Zero means unknown.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StorageEstimate {
  pub used: u64,
  pub quota: u64,
}

impl StorageEstimate {
  /// Fraction of the quota in use, `None` when the quota is unknown.
  pub fn usage_ratio(&self) -> Option<f64> {
    (self.quota > 0).then(|| self.used as f64 / self.quota as f64)
  }
}

/// Platform facility that reports storage usage.
pub trait StorageEstimator: Send + Sync {
  /// `None` when the platform cannot tell.
  fn estimate(&self) -> Option<StorageEstimate>;
}

/// Estimates usage from the store's live pages against a configured quota.
pub struct SqliteEstimator {
  store: Store,
  quota: u64,
}

impl SqliteEstimator {
  pub fn new(store: Store, quota: u64) -> Self {
    Self { store, quota }
  }
}

impl StorageEstimator for SqliteEstimator {
  fn estimate(&self) -> Option<StorageEstimate> {
    match self.store.used_bytes() {
      Ok(used) => Some(StorageEstimate {
        used,
        quota: self.quota,
      }),
      Err(e) => {
        tracing::warn!(error = %e, "storage estimate failed");
        None
      }
    }
  }
}

/// Reports storage pressure to callers. Never evicts on its own.
pub struct QuotaReporter {
  estimator: Box<dyn StorageEstimator>,
}

impl QuotaReporter {
  pub fn new(estimator: impl StorageEstimator + 'static) -> Self {
    Self {
      estimator: Box::new(estimator),
    }
  }

  /// Current estimate, zeros when unsupported.
  pub fn estimate(&self) -> StorageEstimate {
    self.estimator.estimate().unwrap_or_default()
  }

  /// Whether usage exceeds `threshold` (0.0..=1.0) of a known quota.
  pub fn is_over(&self, threshold: f64) -> bool {
    self
      .estimate()
      .usage_ratio()
      .is_some_and(|ratio| ratio > threshold)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  struct Unsupported;

  impl StorageEstimator for Unsupported {
    fn estimate(&self) -> Option<StorageEstimate> {
      None
    }
  }

  struct Fixed(u64, u64);

  impl StorageEstimator for Fixed {
    fn estimate(&self) -> Option<StorageEstimate> {
      Some(StorageEstimate {
        used: self.0,
        quota: self.1,
      })
    }
  }

  #[test]
  fn test_unsupported_estimator_reports_zeros() {
    let reporter = QuotaReporter::new(Unsupported);
    assert_eq!(reporter.estimate(), StorageEstimate::default());
    assert!(!reporter.is_over(0.0));
  }

  #[test]
  fn test_threshold_comparison() {
    assert!(QuotaReporter::new(Fixed(90, 100)).is_over(0.8));
    assert!(!QuotaReporter::new(Fixed(50, 100)).is_over(0.8));
    assert!(!QuotaReporter::new(Fixed(50, 0)).is_over(0.8));
  }

  #[test]
  fn test_sqlite_estimator_reports_pages() {
    let store = Store::open_in_memory().unwrap();
    let reporter = QuotaReporter::new(SqliteEstimator::new(store, 1 << 20));
    let estimate = reporter.estimate();
    assert!(estimate.used > 0);
    assert_eq!(estimate.quota, 1 << 20);
  }
}
