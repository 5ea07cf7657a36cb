//! Probes: independently supervised producers of [`Datum`] records
//!
//! A probe wraps a platform capability behind one of three modes:
//!
//! ```text
//!   Listening      source ──push──► DatumSink ──► ingestion queue
//!   Polling        timer ──► poll (bounded, serialized) ──► DatumSink
//!   ActivePassive  both of the above, no duplicate suppression
//! ```
//!
//! The probe itself owns no data store. It serializes its own start/stop
//! under a probe-local lock, serializes polls under a second lock, and keeps
//! an append-only start/stop history plus a window of successful health
//! tests for participation scoring.

pub mod catalog;
pub mod simulated;
mod sink;

pub use catalog::{ProbeCatalog, ProbeDescriptor};
pub use sink::DatumSink;

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sensus_core_resilience::RollingWindow;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::datum::{Datum, DatumKind};
use crate::error::{Result, SensusError};
use crate::health::HealthReport;

/// Upper bound on remembered health-test successes per probe
const MAX_SUCCESS_HISTORY: usize = 10_000;

/// Push-based capability: registers for externally driven readings
#[async_trait]
pub trait ListeningSource: Send + Sync {
    /// One-time preparation before the first start
    async fn initialize(&self) -> Result<()> {
        Ok(())
    }

    /// Begin delivering readings into `sink`
    async fn start_listening(&self, sink: DatumSink) -> Result<()>;

    async fn stop_listening(&self) -> Result<()>;

    /// Whether the registration needs a restart, e.g. the platform dropped it
    async fn test_health(&self) -> Result<bool> {
        Ok(false)
    }
}

/// Pull-based capability: produces one reading on request
#[async_trait]
pub trait PollingSource: Send + Sync {
    async fn initialize(&self) -> Result<()> {
        Ok(())
    }

    async fn poll(&self) -> Result<Datum>;

    async fn test_health(&self) -> Result<bool> {
        Ok(false)
    }
}

/// Polling cadence and per-poll bound
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSchedule {
    pub interval: Duration,
    pub timeout: Duration,
}

impl Default for PollSchedule {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            timeout: Duration::from_secs(30),
        }
    }
}

/// How a probe obtains readings
#[derive(Clone)]
pub enum ProbeMode {
    Listening(Arc<dyn ListeningSource>),
    Polling {
        source: Arc<dyn PollingSource>,
        schedule: PollSchedule,
    },
    ActivePassive {
        listening: Arc<dyn ListeningSource>,
        polling: Arc<dyn PollingSource>,
        schedule: PollSchedule,
    },
}

impl ProbeMode {
    pub fn name(&self) -> &'static str {
        match self {
            ProbeMode::Listening(_) => "listening",
            ProbeMode::Polling { .. } => "polling",
            ProbeMode::ActivePassive { .. } => "active-passive",
        }
    }

    pub fn schedule(&self) -> Option<PollSchedule> {
        match self {
            ProbeMode::Listening(_) => None,
            ProbeMode::Polling { schedule, .. } | ProbeMode::ActivePassive { schedule, .. } => {
                Some(*schedule)
            }
        }
    }

    /// Replace the polling schedule (no-op for listening probes)
    pub fn with_schedule(mut self, new_schedule: PollSchedule) -> Self {
        match &mut self {
            ProbeMode::Listening(_) => {}
            ProbeMode::Polling { schedule, .. } | ProbeMode::ActivePassive { schedule, .. } => {
                *schedule = new_schedule
            }
        }
        self
    }

    fn listening(&self) -> Option<&Arc<dyn ListeningSource>> {
        match self {
            ProbeMode::Listening(source) => Some(source),
            ProbeMode::ActivePassive { listening, .. } => Some(listening),
            ProbeMode::Polling { .. } => None,
        }
    }

    fn polling(&self) -> Option<(&Arc<dyn PollingSource>, PollSchedule)> {
        match self {
            ProbeMode::Polling { source, schedule } => Some((source, *schedule)),
            ProbeMode::ActivePassive {
                polling, schedule, ..
            } => Some((polling, *schedule)),
            ProbeMode::Listening(_) => None,
        }
    }
}

impl fmt::Debug for ProbeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.schedule() {
            Some(schedule) => write!(f, "{}({:?})", self.name(), schedule),
            None => f.write_str(self.name()),
        }
    }
}

/// Everything needed to build a [`Probe`]
#[derive(Debug, Clone)]
pub struct ProbeSpec {
    pub probe_type: String,
    pub display_name: String,
    pub datum_kind: DatumKind,
    pub enabled: bool,
    pub mode: ProbeMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeState {
    Uninitialized,
    Initialized,
    Running,
    Stopped,
}

/// One entry of the start/stop history
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StartStopRecord {
    pub is_start: bool,
    pub at: DateTime<Utc>,
}

struct Poller {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

#[derive(Default)]
struct Runtime {
    initialized: bool,
    poller: Option<Poller>,
}

/// A supervised probe
pub struct Probe {
    probe_type: String,
    display_name: String,
    datum_kind: DatumKind,
    mode: ProbeMode,
    enabled: AtomicBool,
    originally_enabled: bool,
    sink: DatumSink,
    runtime: tokio::sync::Mutex<Runtime>,
    state: Mutex<ProbeState>,
    poll_lock: Arc<tokio::sync::Mutex<()>>,
    poll_failures: Arc<AtomicU64>,
    start_stop_times: Mutex<Vec<StartStopRecord>>,
    successful_health_tests: Mutex<RollingWindow<DateTime<Utc>>>,
}

impl fmt::Debug for Probe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Probe")
            .field("probe_type", &self.probe_type)
            .field("mode", &self.mode)
            .field("enabled", &self.is_enabled())
            .field("state", &self.state())
            .finish()
    }
}

impl Probe {
    /// Build a probe that emits into the given ingestion queue
    pub fn new(spec: ProbeSpec, ingest: mpsc::Sender<Datum>) -> Self {
        let sink = DatumSink::new(spec.probe_type.as_str(), ingest);
        Self {
            probe_type: spec.probe_type,
            display_name: spec.display_name,
            datum_kind: spec.datum_kind,
            mode: spec.mode,
            enabled: AtomicBool::new(spec.enabled),
            originally_enabled: spec.enabled,
            sink,
            runtime: tokio::sync::Mutex::new(Runtime::default()),
            state: Mutex::new(ProbeState::Uninitialized),
            poll_lock: Arc::new(tokio::sync::Mutex::new(())),
            poll_failures: Arc::new(AtomicU64::new(0)),
            start_stop_times: Mutex::new(Vec::new()),
            successful_health_tests: Mutex::new(RollingWindow::with_capacity_limit(
                MAX_SUCCESS_HISTORY,
            )),
        }
    }

    pub fn probe_type(&self) -> &str {
        &self.probe_type
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn datum_kind(&self) -> DatumKind {
        self.datum_kind
    }

    pub fn mode(&self) -> &ProbeMode {
        &self.mode
    }

    pub fn state(&self) -> ProbeState {
        *lock(&self.state)
    }

    pub fn is_running(&self) -> bool {
        self.state() == ProbeState::Running
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn originally_enabled(&self) -> bool {
        self.originally_enabled
    }

    /// Records handed to the ingestion queue so far
    pub fn stored_count(&self) -> u64 {
        self.sink.stored_count()
    }

    fn set_state(&self, state: ProbeState) {
        *lock(&self.state) = state;
    }

    fn append_start_stop(&self, is_start: bool) {
        lock(&self.start_stop_times).push(StartStopRecord {
            is_start,
            at: Utc::now(),
        });
    }

    /// Start listening and/or polling. No-op when already running.
    pub async fn start(&self) -> Result<()> {
        let mut runtime = self.runtime.lock().await;

        if self.state() == ProbeState::Running {
            debug!(probe = %self.probe_type, "Probe already running");
            return Ok(());
        }

        if !runtime.initialized {
            if let Some(source) = self.mode.listening() {
                source.initialize().await?;
            }
            if let Some((source, _)) = self.mode.polling() {
                source.initialize().await?;
            }
            runtime.initialized = true;
            self.set_state(ProbeState::Initialized);
        }

        if let Some(source) = self.mode.listening() {
            source.start_listening(self.sink.clone()).await?;
        }

        if let Some((source, schedule)) = self.mode.polling() {
            runtime.poller = Some(self.spawn_poller(Arc::clone(source), schedule));
        }

        self.set_state(ProbeState::Running);
        self.append_start_stop(true);
        info!(probe = %self.probe_type, mode = self.mode.name(), "Probe started");
        Ok(())
    }

    /// Stop listening and polling. Safe after a partial start.
    ///
    /// A stop record is appended only when the probe was running.
    pub async fn stop(&self) -> Result<()> {
        let mut runtime = self.runtime.lock().await;
        let was_running = self.state() == ProbeState::Running;

        if let Some(poller) = runtime.poller.take() {
            poller.cancel.cancel();
            if let Err(e) = poller.task.await {
                warn!(probe = %self.probe_type, error = %e, "Polling task ended abnormally");
            }
        }

        let mut outcome = Ok(());
        if let Some(source) = self.mode.listening() {
            if runtime.initialized {
                outcome = source.stop_listening().await;
            }
        }

        self.set_state(ProbeState::Stopped);
        if was_running {
            self.append_start_stop(false);
            info!(probe = %self.probe_type, "Probe stopped");
        }

        outcome
    }

    pub async fn restart(&self) -> Result<()> {
        if let Err(e) = self.stop().await {
            warn!(probe = %self.probe_type, error = %e, "Error while stopping probe for restart");
        }
        self.start().await
    }

    /// Take one reading right now, serialized with any in-flight poll
    pub async fn poll(&self) -> Result<Datum> {
        let (source, schedule) = self.mode.polling().ok_or_else(|| {
            SensusError::Poll {
                probe: self.probe_type.clone(),
                reason: "probe does not support polling".to_string(),
            }
        })?;

        poll_source(&self.probe_type, source.as_ref(), &self.poll_lock, schedule.timeout).await
    }

    fn spawn_poller(&self, source: Arc<dyn PollingSource>, schedule: PollSchedule) -> Poller {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let lock = Arc::clone(&self.poll_lock);
        let failures = Arc::clone(&self.poll_failures);
        let sink = self.sink.clone();
        let probe_type = self.probe_type.clone();

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(schedule.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                let outcome = tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    outcome = poll_source(&probe_type, source.as_ref(), &lock, schedule.timeout) => outcome,
                };

                match outcome {
                    Ok(datum) => {
                        // Full-queue drops are counted by the sink
                        let _ = sink.store(datum);
                    }
                    Err(e) => {
                        failures.fetch_add(1, Ordering::Relaxed);
                        warn!(probe = %probe_type, error = %e, "Poll failed");
                    }
                }
            }

            debug!(probe = %probe_type, "Polling loop exited");
        });

        Poller { cancel, task }
    }

    /// Inspect this probe; returns true when it needs a restart
    pub async fn test_health(&self, report: &mut HealthReport) -> bool {
        let mut needs_restart = false;

        if self.state() != ProbeState::Running {
            report.add_error(format!("Probe \"{}\" is not running.", self.display_name));
            needs_restart = true;
        } else {
            let runtime = self.runtime.lock().await;
            if let Some(poller) = runtime.poller.as_ref() {
                if poller.task.is_finished() {
                    report.add_error(format!(
                        "Polling loop of probe \"{}\" stopped unexpectedly.",
                        self.display_name
                    ));
                    needs_restart = true;
                }
            }
        }

        if !needs_restart {
            if let Some(reason) = self.source_fault().await {
                report.add_error(format!(
                    "Probe \"{}\" needs a restart: {}.",
                    self.display_name, reason
                ));
                needs_restart = true;
            }
        }

        let drops = self.sink.take_unreported_drops();
        if drops > 0 {
            report.add_warning(format!(
                "Probe \"{}\" dropped {} record(s) because the ingestion queue was full.",
                self.display_name, drops
            ));
        }

        let failures = self.poll_failures.swap(0, Ordering::Relaxed);
        if failures > 0 {
            report.add_warning(format!(
                "Probe \"{}\" failed {} poll(s) since the last health test.",
                self.display_name, failures
            ));
        }

        report.add_misc(format!(
            "Probe \"{}\": {} record(s) stored, running for {}s.",
            self.display_name,
            self.stored_count(),
            self.running_duration(Utc::now()).num_seconds()
        ));

        needs_restart
    }

    /// Ask the underlying sources whether they still work
    async fn source_fault(&self) -> Option<String> {
        if let Some(source) = self.mode.listening() {
            match source.test_health().await {
                Ok(true) => return Some("listening registration was lost".to_string()),
                Ok(false) => {}
                Err(e) => return Some(e.to_string()),
            }
        }

        if let Some((source, _)) = self.mode.polling() {
            match source.test_health().await {
                Ok(true) => return Some("polling source reported a fault".to_string()),
                Ok(false) => {}
                Err(e) => return Some(e.to_string()),
            }
        }

        None
    }

    /// Record a successful scheduled health test and forget those older than the horizon
    pub fn record_health_success(&self, at: DateTime<Utc>, horizon: chrono::Duration) {
        let mut window = lock(&self.successful_health_tests);
        window.record(at);
        window.prune_before(at - horizon);
    }

    pub fn successful_health_tests(&self) -> Vec<DateTime<Utc>> {
        lock(&self.successful_health_tests).iter().copied().collect()
    }

    /// Fraction of expected health tests that succeeded within the horizon.
    ///
    /// `None` for disabled probes.
    pub fn participation(
        &self,
        horizon: chrono::Duration,
        test_interval: Duration,
        now: DateTime<Utc>,
    ) -> Option<f32> {
        if !self.is_enabled() {
            return None;
        }

        let interval_secs = test_interval.as_secs_f64();
        let expected = if interval_secs > 0.0 {
            (horizon.num_seconds() as f64 / interval_secs).max(1.0)
        } else {
            1.0
        };

        let successes = lock(&self.successful_health_tests).count_since(now - horizon);
        Some((successes as f64 / expected).min(1.0) as f32)
    }

    pub fn start_stop_times(&self) -> Vec<StartStopRecord> {
        lock(&self.start_stop_times).clone()
    }

    /// Total time spent running, counting an open start up to `now`
    pub fn running_duration(&self, now: DateTime<Utc>) -> chrono::Duration {
        let history = lock(&self.start_stop_times);
        let mut total = chrono::Duration::zero();
        let mut started: Option<DateTime<Utc>> = None;

        for record in history.iter() {
            match (record.is_start, started) {
                (true, None) => started = Some(record.at),
                (false, Some(since)) => {
                    total += record.at - since;
                    started = None;
                }
                _ => {}
            }
        }

        if let Some(since) = started {
            total += now - since;
        }
        total
    }

    /// Restore the configured enabled flag and forget history
    pub fn reset_for_sharing(&self) {
        self.set_enabled(self.originally_enabled);
        lock(&self.start_stop_times).clear();
        lock(&self.successful_health_tests).clear();
        self.poll_failures.store(0, Ordering::Relaxed);
    }
}

async fn poll_source(
    probe_type: &str,
    source: &dyn PollingSource,
    lock: &tokio::sync::Mutex<()>,
    timeout: Duration,
) -> Result<Datum> {
    let _guard = lock.lock().await;

    match tokio::time::timeout(timeout, source.poll()).await {
        Ok(outcome) => outcome,
        Err(_) => Err(SensusError::PollTimeout {
            probe: probe_type.to_string(),
            timeout,
        }),
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ScriptedListeningSource, ScriptedPollingSource};

    fn listening_probe(source: Arc<ScriptedListeningSource>) -> (Probe, mpsc::Receiver<Datum>) {
        let (tx, rx) = mpsc::channel(16);
        let probe = Probe::new(
            ProbeSpec {
                probe_type: "test.listening".to_string(),
                display_name: "Listening".to_string(),
                datum_kind: DatumKind::Light,
                enabled: true,
                mode: ProbeMode::Listening(source),
            },
            tx,
        );
        (probe, rx)
    }

    fn polling_probe(source: Arc<ScriptedPollingSource>, schedule: PollSchedule) -> Probe {
        let (tx, _rx) = mpsc::channel(16);
        Probe::new(
            ProbeSpec {
                probe_type: "test.polling".to_string(),
                display_name: "Polling".to_string(),
                datum_kind: DatumKind::Light,
                enabled: true,
                mode: ProbeMode::Polling { source, schedule },
            },
            tx,
        )
    }

    #[tokio::test]
    async fn test_start_stop_transitions() {
        let source = Arc::new(ScriptedListeningSource::new());
        let (probe, _rx) = listening_probe(source.clone());
        assert_eq!(probe.state(), ProbeState::Uninitialized);

        probe.start().await.unwrap();
        assert_eq!(probe.state(), ProbeState::Running);
        assert!(source.is_listening());

        probe.stop().await.unwrap();
        assert_eq!(probe.state(), ProbeState::Stopped);
        assert!(!source.is_listening());
    }

    #[tokio::test]
    async fn test_double_start_records_one_start() {
        let source = Arc::new(ScriptedListeningSource::new());
        let (probe, _rx) = listening_probe(source.clone());

        probe.start().await.unwrap();
        probe.start().await.unwrap();
        probe.stop().await.unwrap();
        probe.stop().await.unwrap();

        let history = probe.start_stop_times();
        assert_eq!(history.len(), 2);
        assert!(history[0].is_start);
        assert!(!history[1].is_start);
        assert_eq!(source.start_calls(), 1);
    }

    #[tokio::test]
    async fn test_failed_start_then_stop_leaves_no_history() {
        let source = Arc::new(ScriptedListeningSource::failing("sensor busy"));
        let (probe, _rx) = listening_probe(source);

        assert!(probe.start().await.is_err());
        probe.stop().await.unwrap();

        assert_eq!(probe.state(), ProbeState::Stopped);
        assert!(probe.start_stop_times().is_empty());
    }

    #[tokio::test]
    async fn test_listening_readings_reach_queue() {
        let source = Arc::new(ScriptedListeningSource::new());
        let (probe, mut rx) = listening_probe(source.clone());

        probe.start().await.unwrap();
        source.emit_light(4.0).unwrap();

        let datum = rx.recv().await.unwrap();
        assert_eq!(datum.probe_type(), "test.listening");
        assert_eq!(probe.stored_count(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_polls_are_serialized() {
        let source = Arc::new(ScriptedPollingSource::new().with_delay(Duration::from_millis(20)));
        let probe = Arc::new(polling_probe(source.clone(), PollSchedule::default()));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let probe = probe.clone();
            handles.push(tokio::spawn(async move { probe.poll().await }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(source.poll_calls(), 4);
        assert_eq!(source.max_concurrent_polls(), 1);
    }

    #[tokio::test]
    async fn test_poll_timeout() {
        let source = Arc::new(ScriptedPollingSource::new().with_delay(Duration::from_millis(200)));
        let probe = polling_probe(
            source,
            PollSchedule {
                interval: Duration::from_secs(60),
                timeout: Duration::from_millis(10),
            },
        );

        let err = probe.poll().await.unwrap_err();
        assert!(matches!(err, SensusError::PollTimeout { .. }));
    }

    #[tokio::test]
    async fn test_polling_loop_emits_until_stopped() {
        let source = Arc::new(ScriptedPollingSource::new());
        let probe = polling_probe(
            source.clone(),
            PollSchedule {
                interval: Duration::from_millis(5),
                timeout: Duration::from_secs(1),
            },
        );

        probe.start().await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), async {
            while source.poll_calls() < 3 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        probe.stop().await.unwrap();

        let calls = source.poll_calls();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(source.poll_calls(), calls);
    }

    #[tokio::test]
    async fn test_health_flags_stopped_probe() {
        let source = Arc::new(ScriptedListeningSource::new());
        let (probe, _rx) = listening_probe(source);
        let mut report = HealthReport::new();

        assert!(probe.test_health(&mut report).await);
        assert!(report.errors().contains("is not running"));

        probe.start().await.unwrap();
        let mut report = HealthReport::new();
        assert!(!probe.test_health(&mut report).await);
        assert!(report.errors().is_empty());
        assert!(report.misc().contains("running for"));
    }

    #[tokio::test]
    async fn test_health_flags_lost_registration() {
        let source = Arc::new(ScriptedListeningSource::new());
        let (probe, mut rx) = listening_probe(source.clone());
        probe.start().await.unwrap();

        source.drop_registration();
        let mut report = HealthReport::new();
        assert!(probe.test_health(&mut report).await);
        assert!(report.errors().contains("listening registration was lost"));

        probe.restart().await.unwrap();
        source.emit_light(2.0).unwrap();
        assert_eq!(rx.recv().await.unwrap().probe_type(), "test.listening");

        let mut report = HealthReport::new();
        assert!(!probe.test_health(&mut report).await);
    }

    #[test]
    fn test_participation_accounting() {
        let (tx, _rx) = mpsc::channel(1);
        let probe = Probe::new(
            ProbeSpec {
                probe_type: "test.listening".to_string(),
                display_name: "Listening".to_string(),
                datum_kind: DatumKind::Light,
                enabled: true,
                mode: ProbeMode::Listening(Arc::new(ScriptedListeningSource::new())),
            },
            tx,
        );

        let now = Utc::now();
        let horizon = chrono::Duration::days(1);
        let interval = Duration::from_secs(6 * 60 * 60);

        assert_eq!(probe.participation(horizon, interval, now), Some(0.0));

        probe.record_health_success(now - chrono::Duration::hours(12), horizon);
        probe.record_health_success(now, horizon);
        assert_eq!(probe.participation(horizon, interval, now), Some(0.5));

        for h in 1..10 {
            probe.record_health_success(now - chrono::Duration::minutes(h), horizon);
        }
        assert_eq!(probe.participation(horizon, interval, now), Some(1.0));

        probe.set_enabled(false);
        assert_eq!(probe.participation(horizon, interval, now), None);
    }

    #[test]
    fn test_success_window_prunes_past_horizon() {
        let (tx, _rx) = mpsc::channel(1);
        let probe = Probe::new(
            ProbeSpec {
                probe_type: "test.listening".to_string(),
                display_name: "Listening".to_string(),
                datum_kind: DatumKind::Light,
                enabled: true,
                mode: ProbeMode::Listening(Arc::new(ScriptedListeningSource::new())),
            },
            tx,
        );

        let now = Utc::now();
        let horizon = chrono::Duration::days(1);
        probe.record_health_success(now - chrono::Duration::days(3), horizon);
        probe.record_health_success(now, horizon);

        assert_eq!(probe.successful_health_tests(), vec![now]);
    }

    #[tokio::test]
    async fn test_running_duration_counts_open_interval() {
        let source = Arc::new(ScriptedListeningSource::new());
        let (probe, _rx) = listening_probe(source);

        probe.start().await.unwrap();
        let later = Utc::now() + chrono::Duration::seconds(30);
        assert!(probe.running_duration(later) >= chrono::Duration::seconds(29));
    }

    #[tokio::test]
    async fn test_reset_for_sharing_restores_enabled() {
        let source = Arc::new(ScriptedListeningSource::new());
        let (probe, _rx) = listening_probe(source);

        probe.start().await.unwrap();
        probe.stop().await.unwrap();
        probe.set_enabled(false);
        probe.reset_for_sharing();

        assert!(probe.is_enabled());
        assert!(probe.start_stop_times().is_empty());
    }
}
