//! Health monitoring: the self-healing loop
//!
//! The monitor runs on its own timer, independent of start/stop, and asks
//! the protocol to test itself. Each test runs under the protocol's
//! lifecycle lock:
//!
//! ```text
//!   tick ─► protocol running? ──no──► one start attempt
//!                 │ yes
//!                 ▼
//!           local store ─► remote store ─► one flush ─► each enabled probe
//!                 │ unhealthy components are restarted, outcomes recorded
//!                 ▼
//!           ProtocolReport ─► local store (and remote when forced)
//! ```
//!
//! A failed restart is only recorded; the next scheduled test tries again.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::datum::Datum;
use crate::protocol::Protocol;

/// Who asked for a health test
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthTrigger {
    /// The periodic monitor; counts toward participation
    Scheduled,
    /// A user-initiated test; does not count toward participation
    User,
}

/// Accumulated error, warning and informational text of one health test
#[derive(Debug, Default, Clone, PartialEq)]
pub struct HealthReport {
    error: String,
    warning: String,
    misc: String,
}

impl HealthReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_error(&mut self, line: impl AsRef<str>) {
        push_line(&mut self.error, line.as_ref());
    }

    pub fn add_warning(&mut self, line: impl AsRef<str>) {
        push_line(&mut self.warning, line.as_ref());
    }

    pub fn add_misc(&mut self, line: impl AsRef<str>) {
        push_line(&mut self.misc, line.as_ref());
    }

    pub fn errors(&self) -> &str {
        &self.error
    }

    pub fn warnings(&self) -> &str {
        &self.warning
    }

    pub fn misc(&self) -> &str {
        &self.misc
    }

    pub fn has_errors(&self) -> bool {
        !self.error.is_empty()
    }

    /// Persistable protocol report
    pub fn into_datum(self, timestamp: DateTime<Utc>) -> Datum {
        Datum::protocol_report(timestamp, self.error, self.warning, self.misc)
    }
}

fn push_line(buf: &mut String, line: &str) {
    buf.push_str(line);
    buf.push('\n');
}

/// Periodic driver of [`Protocol::test_health`]
pub struct HealthMonitor {
    protocol: Arc<Protocol>,
    interval: Duration,
}

impl HealthMonitor {
    /// Monitor `protocol` every `interval` (at least one millisecond)
    pub fn new(protocol: Arc<Protocol>, interval: Duration) -> Self {
        Self {
            protocol,
            interval: interval.max(Duration::from_millis(1)),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// One scheduled health test; returns the persisted report
    pub async fn run_once(&self) -> Datum {
        self.protocol
            .test_health(HealthTrigger::Scheduled)
            .await
    }

    /// Test on every tick until `cancel` fires. The first test runs one
    /// interval after the call.
    pub async fn run(self, cancel: CancellationToken) {
        info!(
            protocol = %self.protocol.name(),
            interval_secs = self.interval.as_secs_f64(),
            "🩺 Health monitor active"
        );

        let mut ticker = tokio::time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let report = self.run_once().await;
            debug!(protocol = %self.protocol.name(), report = %report, "Health test complete");
        }

        info!(protocol = %self.protocol.name(), "Health monitor stopped");
    }

    /// Run on a background task
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(cancel))
    }
}
