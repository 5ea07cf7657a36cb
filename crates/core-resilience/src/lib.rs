//! Sensus Core Resilience: Pure-logic fault tolerance primitives
//!
//! # Overview
//!
//! This crate provides the building blocks the collection agent uses to keep
//! data flowing through independently failing components:
//!
//! - **Retry Policy**: Exponential backoff for transient failures, with cooperative cancellation
//! - **Retention Guard**: Capacity-bounded admission for local buffers, with loss accounting
//! - **Rolling Window**: Bounded history of event times for uptime/participation scoring
//!
//! # Key Principles
//!
//! This crate is **pure logic** with zero knowledge of:
//! - Probes, sensors or the records they produce
//! - Storage or network sinks
//! - Application-specific reporting
//!
//! # Architecture
//!
//! ```text
//!   Producers (probes)
//!         │
//!         ▼
//! ┌─────────────────────────────────────────┐
//! │       Retention Guard                   │  ← Never block producers
//! │  (Capacity, evict/reject, pressure)     │
//! └─────────────┬───────────────────────────┘
//!               │ drain (periodic or under pressure)
//!               ▼
//! ┌─────────────────────────────────────────┐
//! │       Retry Policy                      │  ← Ride out transient outages
//! │  (Exponential backoff, cancellable)     │
//! └─────────────┬───────────────────────────┘
//!               │
//!               ▼
//!          Remote Sink
//!
//!  Continuously running:
//!   Rolling Window → successful health checks within a horizon
//! ```
//!
//! # Usage Example
//!
//! ```no_run
//! use sensus_core_resilience::{ResilienceError, RetryPolicy};
//! use tokio_util::sync::CancellationToken;
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), ResilienceError> {
//! let policy = RetryPolicy {
//!     max_retries: 5,
//!     initial_backoff: Duration::from_millis(250),
//!     ..Default::default()
//! };
//!
//! let cancel = CancellationToken::new();
//! let receipt = policy
//!     .execute(&cancel, |attempt| async move {
//!         // Your potentially failing upload
//!         Ok::<_, ResilienceError>(attempt)
//!     })
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod retention;
pub mod retry;
pub mod window;

// Re-export main types for convenience
pub use error::ResilienceError;
pub use retention::{Admission, OverflowAction, RetentionGuard, RetentionPolicy, RetentionState};
pub use retry::RetryPolicy;
pub use window::RollingWindow;

/// Prelude module for convenient imports
///
/// # Example
/// ```
/// use sensus_core_resilience::prelude::*;
/// ```
pub mod prelude {
    pub use super::error::ResilienceError;
    pub use super::retention::{Admission, OverflowAction, RetentionGuard, RetentionPolicy};
    pub use super::retry::RetryPolicy;
    pub use super::window::RollingWindow;
}
