use std::time::Duration;

/// Exponential retry delay, doubling from `initial` up to `max`.
#[derive(Debug, Clone)]
pub struct Backoff {
  initial: Duration,
  max: Duration,
  current: Option<Duration>,
}

impl Backoff {
  pub fn new(initial: Duration, max: Duration) -> Self {
    Self {
      initial,
      max: max.max(initial),
      current: None,
    }
  }

  /// Delay before the next attempt.
  pub fn next_delay(&mut self) -> Duration {
    let delay = match self.current {
      None => self.initial,
      Some(current) => current.saturating_mul(2).min(self.max),
    };
    self.current = Some(delay);
    delay
  }

  pub fn reset(&mut self) {
    self.current = None;
  }
}

impl Default for Backoff {
  fn default() -> Self {
    Self::new(Duration::from_secs(5), Duration::from_secs(300))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_doubles_up_to_max_and_resets() {
    let mut backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(5));
    let delays: Vec<u64> = (0..5).map(|_| backoff.next_delay().as_secs()).collect();
    assert_eq!(delays, vec![1, 2, 4, 5, 5]);

    backoff.reset();
    assert_eq!(backoff.next_delay(), Duration::from_secs(1));
  }

  #[test]
  fn test_max_below_initial_is_clamped() {
    let mut backoff = Backoff::new(Duration::from_secs(10), Duration::from_secs(1));
    assert_eq!(backoff.next_delay(), Duration::from_secs(10));
    assert_eq!(backoff.next_delay(), Duration::from_secs(10));
  }
}
