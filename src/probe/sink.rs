//! Probe-side handle onto the local store's ingestion queue
//!
//! Producers never block: a full queue drops the record, counts it and logs
//! a warning so the loss shows up in the next health report.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};

use crate::datum::{Datum, DatumPayload};
use crate::error::{Result, SensusError};

#[derive(Debug, Default)]
struct EmissionStats {
    stored: AtomicU64,
    dropped: AtomicU64,
    unreported_drops: AtomicU64,
}

/// Cloneable sender handed to listening sources and polling loops
#[derive(Clone)]
pub struct DatumSink {
    probe_type: Arc<str>,
    tx: mpsc::Sender<Datum>,
    stats: Arc<EmissionStats>,
}

impl fmt::Debug for DatumSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatumSink")
            .field("probe_type", &self.probe_type)
            .field("stored", &self.stored_count())
            .field("dropped", &self.dropped_count())
            .finish()
    }
}

impl DatumSink {
    pub fn new(probe_type: impl Into<Arc<str>>, tx: mpsc::Sender<Datum>) -> Self {
        Self {
            probe_type: probe_type.into(),
            tx,
            stats: Arc::new(EmissionStats::default()),
        }
    }

    pub fn probe_type(&self) -> &str {
        &self.probe_type
    }

    /// Wrap `payload` in a new datum stamped with this probe's type and store it
    pub fn emit(&self, payload: DatumPayload) -> Result<()> {
        self.store(Datum::new(self.probe_type.as_ref(), payload))
    }

    /// Hand a datum to the ingestion queue without waiting
    pub fn store(&self, datum: Datum) -> Result<()> {
        match self.tx.try_send(datum) {
            Ok(()) => {
                self.stats.stored.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(TrySendError::Full(_)) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                self.stats.unreported_drops.fetch_add(1, Ordering::Relaxed);
                warn!(probe = %self.probe_type, "Ingestion queue full, dropping record");
                Err(SensusError::IngestFull(self.probe_type.to_string()))
            }
            Err(TrySendError::Closed(_)) => {
                debug!(probe = %self.probe_type, "Ingestion queue closed");
                Err(SensusError::NotRunning("Local data store".to_string()))
            }
        }
    }

    pub fn stored_count(&self) -> u64 {
        self.stats.stored.load(Ordering::Relaxed)
    }

    pub fn dropped_count(&self) -> u64 {
        self.stats.dropped.load(Ordering::Relaxed)
    }

    /// Drops since the previous call
    pub fn take_unreported_drops(&self) -> u64 {
        self.stats.unreported_drops.swap(0, Ordering::Relaxed)
    }
}
