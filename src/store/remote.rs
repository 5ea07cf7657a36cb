//! Remote data store: commits batches to a [`RemoteSink`] with retry
//!
//! Besides the batches the local store hands over, the remote store keeps
//! its own short-lived staging list of non-probe records (reports, rewards).
//! Every commit carries the staged records along; only acknowledged ones are
//! removed, so a cancelled or failed commit leaves staging untouched.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use sensus_core_resilience::{ResilienceError, RetryPolicy};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::anonymization::AnonymizationRegistry;
use crate::config::RemoteStoreConfig;
use crate::datum::Datum;
use crate::error::{Result, SensusError};
use crate::health::HealthReport;

use super::sink::{BatchReceipt, RemoteSink};

#[derive(Debug, Default)]
struct CommitStatus {
    started_at: Option<DateTime<Utc>>,
    last_success: Option<DateTime<Utc>>,
    last_error: Option<String>,
}

pub struct RemoteDataStore {
    config: RemoteStoreConfig,
    retry: RetryPolicy,
    sink: Arc<dyn RemoteSink>,
    anonymization: Arc<AnonymizationRegistry>,
    staged: Mutex<Vec<Datum>>,
    running: AtomicBool,
    commit_lock: tokio::sync::Mutex<()>,
    status: Mutex<CommitStatus>,
    committed_total: AtomicU64,
}

impl std::fmt::Debug for RemoteDataStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteDataStore")
            .field("sink", &self.sink.name())
            .field("running", &self.is_running())
            .field("staged", &self.staged_count())
            .finish()
    }
}

impl RemoteDataStore {
    pub fn new(
        config: RemoteStoreConfig,
        sink: Arc<dyn RemoteSink>,
        anonymization: Arc<AnonymizationRegistry>,
    ) -> Self {
        Self {
            retry: config.retry_policy(),
            config,
            sink,
            anonymization,
            staged: Mutex::new(Vec::new()),
            running: AtomicBool::new(false),
            commit_lock: tokio::sync::Mutex::new(()),
            status: Mutex::new(CommitStatus::default()),
            committed_total: AtomicU64::new(0),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn sink_name(&self) -> &str {
        self.sink.name()
    }

    pub async fn start(&self) -> Result<()> {
        if self.is_running() {
            return Ok(());
        }

        self.sink.open().await?;
        lock(&self.status).started_at = Some(Utc::now());
        self.running.store(true, Ordering::SeqCst);
        info!(sink = self.sink.name(), "Remote data store started");
        Ok(())
    }

    pub async fn stop(&self) -> Result<()> {
        if !self.running.swap(false, Ordering::SeqCst) {
            return Ok(());
        }

        self.sink.close().await?;
        info!(sink = self.sink.name(), "Remote data store stopped");
        Ok(())
    }

    /// Stop then start. Staged records are kept.
    pub async fn restart(&self) -> Result<()> {
        if let Err(e) = self.stop().await {
            warn!(error = %e, "Error while stopping remote data store for restart");
        }
        self.start().await
    }

    /// Stage a report or reward for the next commit
    pub fn add_non_probe_datum(&self, datum: Datum) {
        debug!(datum = %datum, "Staged non-probe datum on remote store");
        lock(&self.staged).push(datum);
    }

    /// Whether any staged record has not been acknowledged yet
    pub fn has_non_probe_data(&self) -> bool {
        !lock(&self.staged).is_empty()
    }

    pub fn staged_count(&self) -> usize {
        lock(&self.staged).len()
    }

    pub fn committed_total(&self) -> u64 {
        self.committed_total.load(Ordering::Relaxed)
    }

    pub fn last_error(&self) -> Option<String> {
        lock(&self.status).last_error.clone()
    }

    /// Upper bound for one commit, retries included
    pub fn commit_timeout(&self) -> std::time::Duration {
        self.config.commit_timeout()
    }

    /// Send `batch` plus every staged record to the sink.
    ///
    /// `batch` must already be anonymized; staged records are anonymized
    /// here unless they already are. Cancellation, failure or running past
    /// the commit timeout leaves staged records in place.
    pub async fn commit(&self, batch: Vec<Datum>, cancel: &CancellationToken) -> Result<BatchReceipt> {
        if !self.is_running() {
            return Err(SensusError::NotRunning("Remote data store".to_string()));
        }

        let _guard = self.commit_lock.lock().await;

        let staged: Vec<Datum> = lock(&self.staged).clone();
        let mut outgoing = batch;
        outgoing.reserve(staged.len());
        for datum in &staged {
            if datum.is_anonymized() {
                outgoing.push(datum.clone());
            } else {
                outgoing.push(self.anonymization.anonymize(datum)?);
            }
        }

        if outgoing.is_empty() {
            return Ok(BatchReceipt::default());
        }

        let sink = &self.sink;
        let records = outgoing.as_slice();
        let timeout = self.config.commit_timeout();
        let attempt_cancel = cancel.child_token();
        let result = match tokio::time::timeout(
            timeout,
            self.retry.execute(&attempt_cancel, |attempt| async move {
                debug!(attempt, records = records.len(), sink = sink.name(), "Sending batch");
                sink.send(records).await.map_err(to_resilience)
            }),
        )
        .await
        {
            Ok(result) => result.map_err(SensusError::from),
            Err(_) => {
                attempt_cancel.cancel();
                Err(SensusError::CommitFailed(format!(
                    "timed out after {} s",
                    timeout.as_secs()
                )))
            }
        };

        match result {
            Ok(receipt) => {
                lock(&self.staged).retain(|d| !receipt.contains(&d.id()));
                self.committed_total
                    .fetch_add(receipt.len() as u64, Ordering::Relaxed);
                {
                    let mut status = lock(&self.status);
                    status.last_success = Some(Utc::now());
                    status.last_error = None;
                }

                if receipt.len() < outgoing.len() {
                    warn!(
                        sent = outgoing.len(),
                        accepted = receipt.len(),
                        "Remote sink accepted part of the batch; the rest stays staged"
                    );
                } else {
                    info!(records = receipt.len(), "Committed batch to remote data store");
                }
                Ok(receipt)
            }
            Err(err) => {
                lock(&self.status).last_error = Some(err.to_string());
                warn!(error = %err, staged = staged.len(), "Remote commit failed");
                Err(err)
            }
        }
    }

    /// Returns true when the store needs a restart
    pub async fn test_health(&self, report: &mut HealthReport) -> bool {
        if !self.is_running() {
            report.add_error("Remote data store is not running.");
            return true;
        }

        let staged = self.staged_count();
        if staged > 0 {
            let status = lock(&self.status);
            let reference = status.last_success.or(status.started_at);
            if let Some(since) = reference {
                let idle = Utc::now() - since;
                if idle > self.config.stuck_after() {
                    report.add_error(format!(
                        "Remote data store has {} staged record(s) and no successful commit for {} s.",
                        staged,
                        idle.num_seconds()
                    ));
                    return true;
                }
            }
        }

        report.add_misc(format!(
            "Remote data store ({}): {} staged, {} committed.",
            self.sink.name(),
            staged,
            self.committed_total()
        ));
        false
    }

    /// Forget staged records
    pub fn clear_for_sharing(&self) {
        lock(&self.staged).clear();
        *lock(&self.status) = CommitStatus::default();
    }
}

fn to_resilience(err: SensusError) -> ResilienceError {
    match err {
        SensusError::Cancelled => ResilienceError::Cancelled,
        e if e.is_transient() => ResilienceError::Transient(e.to_string()),
        e => ResilienceError::Permanent(e.to_string()),
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
