//! Remote sink seam: anything that accepts a batch and acknowledges records

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tracing::info;
use uuid::Uuid;

use crate::datum::Datum;
use crate::error::Result;

/// Ids the sink durably accepted from one batch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReceipt {
    accepted: HashSet<Uuid>,
}

impl BatchReceipt {
    /// Every record of `batch` accepted
    pub fn all(batch: &[Datum]) -> Self {
        Self::from_ids(batch.iter().map(Datum::id))
    }

    pub fn from_ids(ids: impl IntoIterator<Item = Uuid>) -> Self {
        Self {
            accepted: ids.into_iter().collect(),
        }
    }

    pub fn contains(&self, id: &Uuid) -> bool {
        self.accepted.contains(id)
    }

    pub fn accepted(&self) -> &HashSet<Uuid> {
        &self.accepted
    }

    pub fn len(&self) -> usize {
        self.accepted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accepted.is_empty()
    }
}

/// Durable destination of committed records.
///
/// `send` either fails as a whole (nothing acknowledged) or returns the ids
/// it accepted; unacknowledged records stay staged for the next commit.
#[async_trait]
pub trait RemoteSink: Send + Sync {
    fn name(&self) -> &str;

    async fn open(&self) -> Result<()> {
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }

    async fn send(&self, batch: &[Datum]) -> Result<BatchReceipt>;
}

/// Writes each record as a JSON line through `tracing`
#[derive(Debug, Default)]
pub struct ConsoleSink {
    sent: AtomicU64,
}

impl ConsoleSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent_count(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl RemoteSink for ConsoleSink {
    fn name(&self) -> &str {
        "console"
    }

    async fn send(&self, batch: &[Datum]) -> Result<BatchReceipt> {
        for datum in batch {
            let line = serde_json::to_string(datum)?;
            info!(target: "sensus::remote", "{}", line);
        }
        self.sent.fetch_add(batch.len() as u64, Ordering::Relaxed);
        Ok(BatchReceipt::all(batch))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datum::DatumPayload;

    #[tokio::test]
    async fn test_console_sink_accepts_everything() {
        let sink = ConsoleSink::new();
        let batch = vec![
            Datum::new("sensus.light", DatumPayload::Light { brightness: 1.0 }),
            Datum::new("sensus.light", DatumPayload::Light { brightness: 2.0 }),
        ];

        let receipt = sink.send(&batch).await.unwrap();
        assert_eq!(receipt.len(), 2);
        assert!(receipt.contains(&batch[0].id()));
        assert_eq!(sink.sent_count(), 2);
    }

    #[test]
    fn test_receipt_from_ids() {
        let id = Uuid::new_v4();
        let receipt = BatchReceipt::from_ids([id]);
        assert!(receipt.contains(&id));
        assert!(!receipt.contains(&Uuid::new_v4()));
        assert!(BatchReceipt::default().is_empty());
    }
}
