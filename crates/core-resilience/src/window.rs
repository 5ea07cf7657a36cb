//! Rolling window: bounded history of observation times
//!
//! Keeps the times of recent events (successful health checks, deliveries)
//! so callers can ask "how many happened since X" without unbounded growth.
//! Entries older than a caller-supplied cutoff are pruned explicitly, and an
//! optional hard cap bounds memory when pruning is infrequent.
//!
//! # Example
//!
//! ```
//! use sensus_core_resilience::window::RollingWindow;
//!
//! let mut window = RollingWindow::new();
//! window.record(10);
//! window.record(20);
//! window.record(30);
//!
//! window.prune_before(15);
//! assert_eq!(window.len(), 2);
//! assert_eq!(window.count_since(25), 1);
//! ```

use std::collections::VecDeque;

/// Time-ordered history of event timestamps
#[derive(Debug, Clone)]
pub struct RollingWindow<T> {
    entries: VecDeque<T>,
    max_entries: Option<usize>,
}

impl<T: Ord + Copy> RollingWindow<T> {
    /// Create an unbounded window
    pub fn new() -> Self {
        Self {
            entries: VecDeque::new(),
            max_entries: None,
        }
    }

    /// Create a window that never holds more than `max_entries` items
    pub fn with_capacity_limit(max_entries: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(max_entries.min(1024)),
            max_entries: Some(max_entries),
        }
    }

    /// Record an event. Out-of-order times are inserted in position.
    pub fn record(&mut self, at: T) {
        match self.entries.back() {
            Some(last) if at < *last => {
                let idx = self.entries.partition_point(|t| *t <= at);
                self.entries.insert(idx, at);
            }
            _ => self.entries.push_back(at),
        }

        if let Some(max) = self.max_entries {
            while self.entries.len() > max {
                self.entries.pop_front();
            }
        }
    }

    /// Drop every entry strictly older than `cutoff`; returns how many were removed
    pub fn prune_before(&mut self, cutoff: T) -> usize {
        let stale = self.entries.partition_point(|t| *t < cutoff);
        self.entries.drain(..stale);
        stale
    }

    /// Number of entries at or after `since`
    pub fn count_since(&self, since: T) -> usize {
        self.entries.len() - self.entries.partition_point(|t| *t < since)
    }

    /// Most recent entry
    pub fn latest(&self) -> Option<T> {
        self.entries.back().copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Iterate entries oldest first
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.entries.iter()
    }
}

impl<T: Ord + Copy> Default for RollingWindow<T> {
    fn default() -> Self {
        Self::new()
    }
}
