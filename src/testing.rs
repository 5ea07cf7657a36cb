//! Scripted test doubles for probes, sinks and notifications
//!
//! Used by the unit and integration tests, and handy for anyone wiring a
//! protocol against fake capabilities.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use crate::config::LogLevel;
use crate::context::Notifier;
use crate::datum::{Datum, DatumPayload};
use crate::error::{Result, SensusError};
use crate::probe::{DatumSink, ListeningSource, PollingSource};
use crate::store::{BatchReceipt, RemoteSink};

/// Failure count meaning "every time"
const ALWAYS: usize = usize::MAX;

#[derive(Debug, Clone)]
enum StartFailure {
    Error(String),
    Unsupported(String),
}

/// Listening source driven by the test: readings are pushed with [`emit`](Self::emit)
#[derive(Debug)]
pub struct ScriptedListeningSource {
    failure: Option<StartFailure>,
    remaining_failures: AtomicUsize,
    sink: Mutex<Option<DatumSink>>,
    registered: AtomicBool,
    start_calls: AtomicUsize,
    stop_calls: AtomicUsize,
}

impl Default for ScriptedListeningSource {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedListeningSource {
    pub fn new() -> Self {
        Self {
            failure: None,
            remaining_failures: AtomicUsize::new(0),
            sink: Mutex::new(None),
            registered: AtomicBool::new(false),
            start_calls: AtomicUsize::new(0),
            stop_calls: AtomicUsize::new(0),
        }
    }

    /// Every start fails with `reason`
    pub fn failing(reason: impl Into<String>) -> Self {
        Self::failing_times(ALWAYS, reason)
    }

    /// The first `times` starts fail with `reason`
    pub fn failing_times(times: usize, reason: impl Into<String>) -> Self {
        Self {
            failure: Some(StartFailure::Error(reason.into())),
            remaining_failures: AtomicUsize::new(times),
            ..Self::new()
        }
    }

    /// Every start reports the capability as unsupported
    pub fn unsupported(reason: impl Into<String>) -> Self {
        Self {
            failure: Some(StartFailure::Unsupported(reason.into())),
            remaining_failures: AtomicUsize::new(ALWAYS),
            ..Self::new()
        }
    }

    pub fn is_listening(&self) -> bool {
        self.current_sink().is_some()
    }

    pub fn start_calls(&self) -> usize {
        self.start_calls.load(Ordering::SeqCst)
    }

    pub fn stop_calls(&self) -> usize {
        self.stop_calls.load(Ordering::SeqCst)
    }

    /// Deliver one reading as if the platform pushed it
    pub fn emit(&self, payload: DatumPayload) -> Result<()> {
        match self.current_sink() {
            Some(sink) => sink.emit(payload),
            None => Err(SensusError::NotRunning("Scripted listening source".to_string())),
        }
    }

    pub fn emit_light(&self, brightness: f64) -> Result<()> {
        self.emit(DatumPayload::Light { brightness })
    }

    /// Simulate the platform silently dropping the registration
    pub fn drop_registration(&self) {
        self.sink_slot().take();
    }

    fn current_sink(&self) -> Option<DatumSink> {
        self.sink_slot().clone()
    }

    fn sink_slot(&self) -> std::sync::MutexGuard<'_, Option<DatumSink>> {
        self.sink.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn take_failure(&self) -> Option<StartFailure> {
        let failure = self.failure.as_ref()?;
        let consumed = self
            .remaining_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| match n {
                0 => None,
                ALWAYS => Some(ALWAYS),
                n => Some(n - 1),
            })
            .is_ok();
        consumed.then(|| failure.clone())
    }
}

#[async_trait]
impl ListeningSource for ScriptedListeningSource {
    async fn start_listening(&self, sink: DatumSink) -> Result<()> {
        self.start_calls.fetch_add(1, Ordering::SeqCst);

        match self.take_failure() {
            Some(StartFailure::Error(reason)) => Err(SensusError::ProbeStart {
                probe: sink.probe_type().to_string(),
                reason,
            }),
            Some(StartFailure::Unsupported(reason)) => Err(SensusError::ProbeUnsupported(reason)),
            None => {
                *self.sink_slot() = Some(sink);
                self.registered.store(true, Ordering::SeqCst);
                Ok(())
            }
        }
    }

    async fn stop_listening(&self) -> Result<()> {
        self.stop_calls.fetch_add(1, Ordering::SeqCst);
        self.registered.store(false, Ordering::SeqCst);
        self.sink_slot().take();
        Ok(())
    }

    async fn test_health(&self) -> Result<bool> {
        Ok(self.registered.load(Ordering::SeqCst) && !self.is_listening())
    }
}

/// Polling source that counts calls and tracks overlap
#[derive(Debug)]
pub struct ScriptedPollingSource {
    probe_type: String,
    delay: Duration,
    fail: bool,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl Default for ScriptedPollingSource {
    fn default() -> Self {
        Self::new()
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ScriptedPollingSource {
    pub fn new() -> Self {
        Self {
            probe_type: "test.polling".to_string(),
            delay: Duration::ZERO,
            fail: false,
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    /// Each poll takes `delay`
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Every poll fails
    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    pub fn poll_calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Highest number of polls observed running at once
    pub fn max_concurrent_polls(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PollingSource for ScriptedPollingSource {
    async fn poll(&self) -> Result<Datum> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        let _in_flight = InFlight(&self.in_flight);
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        if self.fail {
            return Err(SensusError::Poll {
                probe: self.probe_type.clone(),
                reason: "scripted failure".to_string(),
            });
        }

        Ok(Datum::new(
            self.probe_type.as_str(),
            DatumPayload::Light {
                brightness: call as f64,
            },
        ))
    }
}

/// In-memory remote sink with scriptable failures
#[derive(Debug, Default)]
pub struct MemorySink {
    received: Mutex<Vec<Datum>>,
    fail_next: AtomicUsize,
    open_failure: Mutex<Option<String>>,
    rejected: Mutex<HashSet<Uuid>>,
    delay: Mutex<Duration>,
    send_calls: AtomicUsize,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next `count` sends fail transiently
    pub fn fail_next_sends(&self, count: usize) {
        self.fail_next.store(count, Ordering::SeqCst);
    }

    /// Every open fails with `reason`
    pub fn fail_open(&self, reason: impl Into<String>) {
        *lock(&self.open_failure) = Some(reason.into());
    }

    /// Never acknowledge these ids
    pub fn reject_ids(&self, ids: impl IntoIterator<Item = Uuid>) {
        lock(&self.rejected).extend(ids);
    }

    /// Every send takes `delay`
    pub fn set_delay(&self, delay: Duration) {
        *lock(&self.delay) = delay;
    }

    /// Records accepted so far, in arrival order
    pub fn received(&self) -> Vec<Datum> {
        lock(&self.received).clone()
    }

    pub fn send_calls(&self) -> usize {
        self.send_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteSink for MemorySink {
    fn name(&self) -> &str {
        "memory"
    }

    async fn open(&self) -> Result<()> {
        match lock(&self.open_failure).clone() {
            Some(reason) => Err(SensusError::Other(reason)),
            None => Ok(()),
        }
    }

    async fn send(&self, batch: &[Datum]) -> Result<BatchReceipt> {
        self.send_calls.fetch_add(1, Ordering::SeqCst);

        let delay = *lock(&self.delay);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(SensusError::CommitFailed("scripted send failure".to_string()));
        }

        let accepted: Vec<Datum> = {
            let rejected = lock(&self.rejected);
            batch
                .iter()
                .filter(|d| !rejected.contains(&d.id()))
                .cloned()
                .collect()
        };

        let receipt = BatchReceipt::from_ids(accepted.iter().map(Datum::id));
        lock(&self.received).extend(accepted);
        Ok(receipt)
    }
}

/// Notifier that remembers everything it was told
#[derive(Debug, Default)]
pub struct MemoryNotifier {
    logs: Mutex<Vec<(LogLevel, String)>>,
    flashes: Mutex<Vec<String>>,
    issues: Mutex<Vec<(String, String)>>,
}

impl MemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn logs(&self) -> Vec<(LogLevel, String)> {
        lock(&self.logs).clone()
    }

    pub fn flashes(&self) -> Vec<String> {
        lock(&self.flashes).clone()
    }

    pub fn issues(&self) -> Vec<(String, String)> {
        lock(&self.issues).clone()
    }
}

impl Notifier for MemoryNotifier {
    fn log(&self, message: &str, level: LogLevel, _source: &str) {
        lock(&self.logs).push((level, message.to_string()));
    }

    fn flash(&self, message: &str) {
        lock(&self.flashes).push(message.to_string());
    }

    fn issue(&self, message: &str, id: &str) {
        lock(&self.issues).push((id.to_string(), message.to_string()));
    }
}

/// Poll `condition` until it holds or `timeout` passes
pub async fn wait_until<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
