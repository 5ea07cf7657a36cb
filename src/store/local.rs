//! Local data store: the bounded buffer between probes and the remote store
//!
//! ```text
//!   probes ──try_send──► ingestion queue ──► ingest task ──► buffer (RetentionGuard)
//!                                                              │
//!                     commit task (interval or pressure) ◄─────┘
//!                                │  anonymized copies, oldest first
//!                                ▼
//!                         RemoteDataStore::commit
//!                                │  acknowledged ids
//!                                ▼
//!                     removed from buffer / staging
//! ```
//!
//! Probes never block on the store: a full ingestion queue drops at the
//! probe, a full buffer evicts or rejects under the configured policy, and
//! every loss surfaces as a warning in the next health report.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use sensus_core_resilience::{Admission, RetentionGuard, RetentionState};
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::anonymization::AnonymizationRegistry;
use crate::config::LocalStoreConfig;
use crate::datum::Datum;
use crate::error::{Result, SensusError};
use crate::health::HealthReport;

use super::remote::RemoteDataStore;

/// Outcome of one commit to the remote store
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommitSummary {
    /// Records acknowledged and removed locally
    pub committed: usize,
    /// Probe records still buffered afterwards
    pub remaining: usize,
}

#[derive(Debug, Default)]
struct CommitStatus {
    started_at: Option<DateTime<Utc>>,
    last_commit: Option<DateTime<Utc>>,
}

struct Workers {
    cancel: CancellationToken,
    ingest: JoinHandle<()>,
    commit: JoinHandle<()>,
}

pub struct LocalDataStore {
    name: String,
    config: LocalStoreConfig,
    storage_dir: PathBuf,
    remote: Arc<RemoteDataStore>,
    anonymization: Arc<AnonymizationRegistry>,
    buffer: Mutex<VecDeque<Datum>>,
    non_probe: Mutex<Vec<Datum>>,
    guard: RetentionGuard,
    ingest_tx: mpsc::Sender<Datum>,
    ingest_rx: Arc<tokio::sync::Mutex<mpsc::Receiver<Datum>>>,
    running: AtomicBool,
    workers: tokio::sync::Mutex<Option<Workers>>,
    commit_lock: tokio::sync::Mutex<()>,
    pressure: Notify,
    status: Mutex<CommitStatus>,
    committed_total: AtomicU64,
}

impl std::fmt::Debug for LocalDataStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalDataStore")
            .field("name", &self.name)
            .field("storage_dir", &self.storage_dir)
            .field("running", &self.is_running())
            .field("buffered", &self.buffered_len())
            .finish()
    }
}

impl LocalDataStore {
    pub fn new(
        name: impl Into<String>,
        config: LocalStoreConfig,
        storage_dir: impl Into<PathBuf>,
        remote: Arc<RemoteDataStore>,
        anonymization: Arc<AnonymizationRegistry>,
    ) -> Self {
        let name = name.into();
        let (ingest_tx, ingest_rx) = mpsc::channel(config.ingest_queue_capacity.max(1));
        Self {
            guard: RetentionGuard::new(format!("{} local buffer", name), config.retention_policy()),
            name,
            config,
            storage_dir: storage_dir.into(),
            remote,
            anonymization,
            buffer: Mutex::new(VecDeque::new()),
            non_probe: Mutex::new(Vec::new()),
            ingest_tx,
            ingest_rx: Arc::new(tokio::sync::Mutex::new(ingest_rx)),
            running: AtomicBool::new(false),
            workers: tokio::sync::Mutex::new(None),
            commit_lock: tokio::sync::Mutex::new(()),
            pressure: Notify::new(),
            status: Mutex::new(CommitStatus::default()),
            committed_total: AtomicU64::new(0),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn storage_dir(&self) -> &Path {
        &self.storage_dir
    }

    pub fn uploads_to_remote(&self) -> bool {
        self.config.upload_to_remote
    }

    /// Sender probes emit into; valid across restarts
    pub fn ingest_sender(&self) -> mpsc::Sender<Datum> {
        self.ingest_tx.clone()
    }

    pub async fn start(self: &Arc<Self>) -> Result<()> {
        let mut workers = self.workers.lock().await;
        if workers.is_some() {
            return Ok(());
        }

        std::fs::create_dir_all(&self.storage_dir)?;

        let cancel = CancellationToken::new();
        let ingest = tokio::spawn(Self::ingest_loop(Arc::clone(self), cancel.clone()));
        let commit = tokio::spawn(Self::commit_loop(Arc::clone(self), cancel.clone()));
        *workers = Some(Workers {
            cancel,
            ingest,
            commit,
        });

        lock(&self.status).started_at = Some(Utc::now());
        self.running.store(true, Ordering::SeqCst);
        info!(
            store = %self.name,
            dir = %self.storage_dir.display(),
            capacity = self.config.capacity,
            "💾 Local data store started"
        );
        Ok(())
    }

    /// Stop background work. Buffered records are kept; an in-flight
    /// commit is cancelled and its records stay buffered.
    pub async fn stop(&self) -> Result<()> {
        let taken = self.workers.lock().await.take();
        self.running.store(false, Ordering::SeqCst);

        if let Some(workers) = taken {
            workers.cancel.cancel();
            for (task, handle) in [("ingest", workers.ingest), ("commit", workers.commit)] {
                if let Err(e) = handle.await {
                    warn!(store = %self.name, task, error = %e, "Local store task ended abnormally");
                }
            }
            info!(store = %self.name, buffered = self.buffered_len(), "Local data store stopped");
        }
        Ok(())
    }

    pub async fn restart(self: &Arc<Self>) -> Result<()> {
        if let Err(e) = self.stop().await {
            warn!(store = %self.name, error = %e, "Error while stopping local data store for restart");
        }
        self.start().await
    }

    async fn ingest_loop(store: Arc<Self>, cancel: CancellationToken) {
        let receiver = Arc::clone(&store.ingest_rx);
        let mut rx = receiver.lock().await;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                next = rx.recv() => match next {
                    Some(datum) => {
                        store.add_datum(datum);
                    }
                    None => break,
                },
            }
        }

        debug!(store = %store.name, "Ingestion loop exited");
    }

    async fn commit_loop(store: Arc<Self>, cancel: CancellationToken) {
        let period = store.config.commit_interval().max(std::time::Duration::from_millis(1));
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
                _ = store.pressure.notified() => {
                    debug!(store = %store.name, "Buffer under pressure, committing early");
                }
            }

            if store.config.upload_to_remote {
                match store.commit_to_remote(&cancel).await {
                    Ok(summary) if summary.committed > 0 => {
                        debug!(store = %store.name, committed = summary.committed, remaining = summary.remaining, "Periodic commit");
                    }
                    Ok(_) => {}
                    Err(SensusError::Cancelled) => break,
                    Err(e) => warn!(store = %store.name, error = %e, "Periodic commit failed"),
                }
            } else {
                store.prune_expired(Utc::now());
            }
        }

        debug!(store = %store.name, "Commit loop exited");
    }

    /// Buffer one record under the retention policy.
    ///
    /// Non-probe records are routed to [`add_non_probe_datum`](Self::add_non_probe_datum).
    /// Returns false when the record was not kept.
    pub fn add_datum(&self, datum: Datum) -> bool {
        if !datum.kind().is_probe_data() {
            self.add_non_probe_datum(datum);
            return true;
        }

        let Some(datum) = self.prepare(datum) else {
            self.guard.record_evicted(1);
            return false;
        };

        let len = {
            let mut buffer = lock(&self.buffer);
            match self.guard.admit(buffer.len()) {
                Admission::Accept => buffer.push_back(datum),
                Admission::AcceptAfterEvicting(count) => {
                    for _ in 0..count {
                        buffer.pop_front();
                    }
                    buffer.push_back(datum);
                    warn!(store = %self.name, evicted = count, "Local buffer full, evicted oldest records");
                }
                Admission::Reject => {
                    warn!(store = %self.name, "Local buffer full, rejected incoming record");
                    return false;
                }
            }
            buffer.len()
        };

        self.guard.set_buffered(len);
        if self.config.upload_to_remote && self.guard.is_under_pressure(len) {
            self.pressure.notify_one();
        }
        true
    }

    /// Keep a report or reward for the next commit.
    ///
    /// Staged records are capped at `non_probe_capacity`; the oldest are
    /// evicted and counted as losses.
    pub fn add_non_probe_datum(&self, datum: Datum) {
        let Some(datum) = self.prepare(datum) else {
            return;
        };

        let evicted = {
            let mut staged = lock(&self.non_probe);
            staged.push(datum);
            let excess = staged.len().saturating_sub(self.config.non_probe_capacity.max(1));
            staged.drain(..excess);
            excess
        };

        if evicted > 0 {
            self.guard.record_evicted(evicted);
            warn!(store = %self.name, evicted, "Staged reports full, evicted oldest");
        }
    }

    /// Anonymize at intake when configured; `None` when that fails
    fn prepare(&self, datum: Datum) -> Option<Datum> {
        if !self.config.anonymize_locally {
            return Some(datum);
        }

        match self.anonymization.anonymize(&datum) {
            Ok(anonymized) => Some(anonymized),
            Err(e) => {
                error!(store = %self.name, datum = %datum, error = %e, "Dropping record that could not be anonymized");
                None
            }
        }
    }

    /// Hand the oldest batch plus staged records to the remote store.
    ///
    /// Only acknowledged records are removed. Failure or cancellation
    /// leaves the buffer as it was.
    pub async fn commit_to_remote(&self, cancel: &CancellationToken) -> Result<CommitSummary> {
        let _guard = self.commit_lock.lock().await;

        let (probe_batch, staged): (Vec<Datum>, Vec<Datum>) = {
            let buffer = lock(&self.buffer);
            let batch = buffer
                .iter()
                .take(self.config.commit_batch_size.max(1))
                .cloned()
                .collect();
            (batch, lock(&self.non_probe).clone())
        };

        if probe_batch.is_empty() && staged.is_empty() && !self.remote.has_non_probe_data() {
            lock(&self.status).last_commit = Some(Utc::now());
            return Ok(CommitSummary::default());
        }

        let mut outgoing = Vec::with_capacity(probe_batch.len() + staged.len());
        for datum in probe_batch.iter().chain(staged.iter()) {
            if datum.is_anonymized() {
                outgoing.push(datum.clone());
            } else {
                outgoing.push(self.anonymization.anonymize(datum)?);
            }
        }

        let receipt = self.remote.commit(outgoing, cancel).await?;

        let (removed, remaining) = {
            let mut buffer = lock(&self.buffer);
            let before = buffer.len();
            buffer.retain(|d| !receipt.contains(&d.id()));
            let mut non_probe = lock(&self.non_probe);
            let staged_before = non_probe.len();
            non_probe.retain(|d| !receipt.contains(&d.id()));
            (
                before - buffer.len() + staged_before - non_probe.len(),
                buffer.len(),
            )
        };

        self.guard.set_buffered(remaining);
        self.committed_total
            .fetch_add(removed as u64, Ordering::Relaxed);
        lock(&self.status).last_commit = Some(Utc::now());

        Ok(CommitSummary {
            committed: removed,
            remaining,
        })
    }

    /// Drop records older than the local retention window. Returns the
    /// number removed.
    pub fn prune_expired(&self, now: DateTime<Utc>) -> usize {
        let Some(hours) = self.config.local_retention_hours else {
            return 0;
        };
        let Some(window) = i64::try_from(hours).ok().and_then(chrono::Duration::try_hours) else {
            return 0;
        };
        let cutoff = now - window;

        let (removed, remaining) = {
            let mut buffer = lock(&self.buffer);
            let before = buffer.len();
            buffer.retain(|d| d.timestamp() >= cutoff);
            let mut non_probe = lock(&self.non_probe);
            let staged_before = non_probe.len();
            non_probe.retain(|d| d.timestamp() >= cutoff);
            (
                before - buffer.len() + staged_before - non_probe.len(),
                buffer.len(),
            )
        };

        self.guard.set_buffered(remaining);
        if removed > 0 {
            info!(store = %self.name, removed, "Pruned expired local records");
        }
        removed
    }

    /// Returns true when the store needs a restart
    pub async fn test_health(&self, report: &mut HealthReport) -> bool {
        if !self.is_running() {
            report.add_error("Local data store is not running.");
            return true;
        }

        {
            let workers = self.workers.lock().await;
            if let Some(workers) = workers.as_ref() {
                if workers.ingest.is_finished() || workers.commit.is_finished() {
                    report.add_error("Local data store background task stopped unexpectedly.");
                    return true;
                }
            }
        }

        let losses = self.guard.take_unreported_losses();
        if losses > 0 {
            report.add_warning(format!(
                "Local data store lost {} record(s) because it was full.",
                losses
            ));
        }

        let buffered = self.buffered_len();
        if self.config.upload_to_remote && buffered > 0 {
            let status = lock(&self.status);
            if let Some(since) = status.last_commit.or(status.started_at) {
                let idle = Utc::now() - since;
                if idle > self.config.stuck_after() {
                    report.add_error(format!(
                        "Local data store has {} buffered record(s) and no commit for {} s.",
                        buffered,
                        idle.num_seconds()
                    ));
                    return true;
                }
            }
        }

        report.add_misc(format!(
            "Local data store: {} buffered, {} staged, {} committed.",
            buffered,
            self.non_probe_len(),
            self.committed_total()
        ));
        false
    }

    pub fn buffered_len(&self) -> usize {
        lock(&self.buffer).len()
    }

    pub fn non_probe_len(&self) -> usize {
        lock(&self.non_probe).len()
    }

    /// Buffered probe records as stored locally, oldest first
    pub fn snapshot(&self) -> Vec<Datum> {
        lock(&self.buffer).iter().cloned().collect()
    }

    pub fn non_probe_snapshot(&self) -> Vec<Datum> {
        lock(&self.non_probe).clone()
    }

    pub fn committed_total(&self) -> u64 {
        self.committed_total.load(Ordering::Relaxed)
    }

    pub fn retention_state(&self) -> RetentionState {
        self.guard.state()
    }

    /// Forget every buffered and staged record
    pub fn clear_for_sharing(&self) {
        lock(&self.buffer).clear();
        lock(&self.non_probe).clear();
        self.guard.set_buffered(0);
        *lock(&self.status) = CommitStatus::default();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
