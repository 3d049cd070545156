//! Exponential backoff for retried sends and handshakes.
//!
//! The same state tracks a queued frame the link refused, an attach or
//! SID request awaiting a response, and an RSID request awaiting the
//! leader. The delay after the n-th failure is `base * 2^n`, capped.

/// Retry bookkeeping for one pending operation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RetryState {
    /// Number of retries attempted so far.
    pub retry_count: u32,

    /// Timestamp (ms) before which the next attempt must not run.
    pub retry_after_ms: u64,
}

impl RetryState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Backoff delay for the current retry count.
    ///
    /// Uses exponential backoff: `base_interval_ms * 2^retry_count`,
    /// capped at `max_backoff_ms`.
    pub fn backoff_ms(&self, base_interval_ms: u64, max_backoff_ms: u64) -> u64 {
        let multiplier = 1u64.checked_shl(self.retry_count).unwrap_or(u64::MAX);
        base_interval_ms.saturating_mul(multiplier).min(max_backoff_ms)
    }

    /// Count a failure and push the next attempt out; returns the delay.
    pub fn record_failure(&mut self, now_ms: u64, base_interval_ms: u64, max_backoff_ms: u64) -> u64 {
        let delay = self.backoff_ms(base_interval_ms, max_backoff_ms);
        self.retry_count += 1;
        self.retry_after_ms = now_ms.saturating_add(delay);
        delay
    }

    /// Whether `max_retries` failures have been recorded.
    pub fn exhausted(&self, max_retries: u32) -> bool {
        self.retry_count >= max_retries
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_until_cap() {
        let mut retry = RetryState::new();
        let delays: Vec<u64> = (0..6).map(|_| retry.record_failure(0, 500, 4000)).collect();
        assert_eq!(delays, vec![500, 1000, 2000, 4000, 4000, 4000]);
        assert_eq!(retry.retry_count, 6);
    }

    #[test]
    fn test_retry_after_tracks_now() {
        let mut retry = RetryState::new();
        retry.record_failure(1000, 50, 800);
        assert_eq!(retry.retry_after_ms, 1050);
        retry.record_failure(1050, 50, 800);
        assert_eq!(retry.retry_after_ms, 1150);
        assert!(retry.exhausted(2));
        retry.reset();
        assert!(!retry.exhausted(1));
    }

    #[test]
    fn test_huge_retry_count_saturates() {
        let retry = RetryState {
            retry_count: 200,
            retry_after_ms: 0,
        };
        assert_eq!(retry.backoff_ms(1000, 60_000), 60_000);
    }
}
