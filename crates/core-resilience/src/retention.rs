//! Retention: capacity-bounded admission control for local buffers
//!
//! A buffer that must never block its producers needs a policy for what
//! happens once it is full. The [`RetentionGuard`] makes that decision for
//! each incoming item and keeps counters of everything it refused or evicted,
//! so data loss is always observable:
//!
//! - **EvictOldest**: admit the new item and tell the caller how many of the
//!   oldest items to drop
//! - **DropNewest**: refuse the new item
//!
//! The guard also signals *pressure* once the buffer crosses a configurable
//! fraction of its capacity, which producers use to request an early drain.
//!
//! # Example
//!
//! ```
//! use sensus_core_resilience::retention::{Admission, OverflowAction, RetentionGuard, RetentionPolicy};
//!
//! let guard = RetentionGuard::new(
//!     "local-buffer",
//!     RetentionPolicy {
//!         max_records: 2,
//!         overflow: OverflowAction::EvictOldest,
//!         pressure_ratio: 0.5,
//!     },
//! );
//!
//! assert_eq!(guard.admit(0), Admission::Accept);
//! assert_eq!(guard.admit(2), Admission::AcceptAfterEvicting(1));
//! assert_eq!(guard.take_unreported_losses(), 1);
//! ```

use std::sync::atomic::{AtomicU64, Ordering};

/// What to do with a new item when the buffer is at capacity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverflowAction {
    /// Drop the oldest buffered items to make room
    #[default]
    EvictOldest,
    /// Refuse the incoming item
    DropNewest,
}

/// Configuration for a retention-guarded buffer
#[derive(Debug, Clone, PartialEq)]
pub struct RetentionPolicy {
    /// Maximum number of items the buffer may hold
    pub max_records: usize,

    /// Overflow behavior once `max_records` is reached
    pub overflow: OverflowAction,

    /// Fraction of `max_records` (0.0 - 1.0) at which the buffer reports pressure
    pub pressure_ratio: f64,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            max_records: 10_000,
            overflow: OverflowAction::EvictOldest,
            pressure_ratio: 0.8,
        }
    }
}

/// Decision for a single incoming item
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Room available, append the item
    Accept,
    /// Append the item after dropping this many of the oldest items
    AcceptAfterEvicting(usize),
    /// Do not append the item
    Reject,
}

/// Snapshot of a guarded buffer
#[derive(Debug, Clone, PartialEq)]
pub struct RetentionState {
    /// Items currently buffered (as last reported by the owner)
    pub buffered: u64,

    /// Items evicted since the guard was created
    pub evicted_total: u64,

    /// Items rejected since the guard was created
    pub rejected_total: u64,

    /// Fraction of capacity in use (0.0 - 1.0)
    pub utilization: f64,

    /// Whether the buffer is at or above its pressure threshold
    pub under_pressure: bool,
}

/// Admission control and loss accounting for one buffer.
///
/// Thread-safe via atomic counters. The owner is expected to call
/// [`admit`](Self::admit) while holding its own buffer lock so the reported
/// length is accurate.
#[derive(Debug)]
pub struct RetentionGuard {
    name: String,
    policy: RetentionPolicy,
    buffered: AtomicU64,
    evicted_total: AtomicU64,
    rejected_total: AtomicU64,
    unreported_losses: AtomicU64,
}

impl RetentionGuard {
    /// Create a new guard for a named buffer
    pub fn new(name: impl Into<String>, policy: RetentionPolicy) -> Self {
        Self {
            name: name.into(),
            policy,
            buffered: AtomicU64::new(0),
            evicted_total: AtomicU64::new(0),
            rejected_total: AtomicU64::new(0),
            unreported_losses: AtomicU64::new(0),
        }
    }

    /// Decide what to do with one new item given the current buffer length.
    ///
    /// Evictions and rejections are counted here, so the caller must act on
    /// the returned decision.
    pub fn admit(&self, current_len: usize) -> Admission {
        let max = self.policy.max_records.max(1);

        if current_len < max {
            return Admission::Accept;
        }

        match self.policy.overflow {
            OverflowAction::EvictOldest => {
                let evict = current_len + 1 - max;
                self.evicted_total.fetch_add(evict as u64, Ordering::Relaxed);
                self.unreported_losses
                    .fetch_add(evict as u64, Ordering::Relaxed);
                Admission::AcceptAfterEvicting(evict)
            }
            OverflowAction::DropNewest => {
                self.rejected_total.fetch_add(1, Ordering::Relaxed);
                self.unreported_losses.fetch_add(1, Ordering::Relaxed);
                Admission::Reject
            }
        }
    }

    /// Record items dropped by the owner outside of admission (e.g., expiry)
    pub fn record_evicted(&self, count: usize) {
        self.evicted_total.fetch_add(count as u64, Ordering::Relaxed);
        self.unreported_losses
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    /// Update the buffered count after the owner changed its buffer
    pub fn set_buffered(&self, len: usize) {
        self.buffered.store(len as u64, Ordering::Relaxed);
    }

    /// Whether a buffer of `len` items is at or above the pressure threshold
    pub fn is_under_pressure(&self, len: usize) -> bool {
        let max = self.policy.max_records.max(1) as f64;
        len as f64 >= max * self.policy.pressure_ratio
    }

    /// Losses (evicted + rejected) since the previous call, resetting the count
    pub fn take_unreported_losses(&self) -> u64 {
        self.unreported_losses.swap(0, Ordering::Relaxed)
    }

    /// Get the current state of this buffer
    pub fn state(&self) -> RetentionState {
        let buffered = self.buffered.load(Ordering::Relaxed);
        let max = self.policy.max_records.max(1);

        RetentionState {
            buffered,
            evicted_total: self.evicted_total.load(Ordering::Relaxed),
            rejected_total: self.rejected_total.load(Ordering::Relaxed),
            utilization: buffered as f64 / max as f64,
            under_pressure: self.is_under_pressure(buffered as usize),
        }
    }

    /// Get the name of this buffer
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the policy
    pub fn policy(&self) -> &RetentionPolicy {
        &self.policy
    }
}
