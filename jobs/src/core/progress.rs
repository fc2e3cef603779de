//! Step counter for multi-resolution data fetches.

use serde::Serialize;

/// Line fragment the fetch tool prints once per completed pair/resolution.
pub const COMPLETION_TOKEN: &str = "downloaded data for";

/// Snapshot emitted as a `progress` event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Progress {
    pub current: u64,
    pub total: u64,
}

/// Monotonic counter clamped at `total`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressTracker {
    current: u64,
    total: u64,
}

impl ProgressTracker {
    pub fn new(total: u64) -> Self {
        Self { current: 0, total }
    }

    /// `total = pairs × resolutions`.
    pub fn for_fetch(pairs: usize, resolutions: usize) -> Self {
        let total = (pairs as u64).saturating_mul(resolutions as u64);
        Self::new(total)
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn current(&self) -> u64 {
        self.current
    }

    pub fn is_empty(&self) -> bool {
        self.total == 0
    }

    /// Record one completed step. `None` once the counter is full.
    pub fn advance(&mut self) -> Option<Progress> {
        if self.current >= self.total {
            return None;
        }
        self.current += 1;
        Some(self.snapshot())
    }

    /// Advance if the line reports a completed step.
    pub fn observe(&mut self, line: &str) -> Option<Progress> {
        if line.to_lowercase().contains(COMPLETION_TOKEN) {
            self.advance()
        } else {
            None
        }
    }

    pub fn snapshot(&self) -> Progress {
        Progress {
            current: self.current,
            total: self.total,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn total_is_pairs_times_resolutions() {
        assert_eq!(ProgressTracker::for_fetch(3, 2).total(), 6);
        assert!(ProgressTracker::for_fetch(0, 2).is_empty());
        assert!(ProgressTracker::for_fetch(5, 0).is_empty());
    }

    #[test]
    fn observe_counts_completion_lines_only() {
        let mut tracker = ProgressTracker::new(2);
        assert_eq!(tracker.observe("Downloading BTC/USDT"), None);
        assert_eq!(
            tracker.observe("Downloaded data for BTC/USDT with length 500"),
            Some(Progress { current: 1, total: 2 })
        );
    }

    #[test]
    fn counter_is_clamped_at_total() {
        let mut tracker = ProgressTracker::new(2);
        let emitted: Vec<u64> = (0..5)
            .filter_map(|_| tracker.observe("downloaded data for X"))
            .map(|p| p.current)
            .collect();
        assert_eq!(emitted, vec![1, 2]);
        assert_eq!(tracker.current(), 2);
    }
}
