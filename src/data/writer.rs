/// Background persistence writer
///
/// Sync runs hand their new records to a queue and move on. A single task
/// drains the queue and upserts each batch; failures are logged, never
/// reported back to the submitter.
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::{Result, SyncError};
use crate::storage::ValueStore;
use crate::types::ValueRecord;

#[derive(Debug, Clone, PartialEq)]
pub struct WriteRequest {
    pub instrument_id: String,
    pub values: Vec<ValueRecord>,
}

/// Totals reported when the writer drains
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriterStats {
    pub batches_written: usize,
    pub batches_failed: usize,
    pub rows_written: u64,
}

/// Submission side of the writer. Cheap to clone; never blocks.
#[derive(Clone)]
pub struct WriteQueue {
    tx: mpsc::UnboundedSender<WriteRequest>,
}

impl WriteQueue {
    pub fn submit(&self, instrument_id: &str, values: Vec<ValueRecord>) {
        let count = values.len();
        let request = WriteRequest {
            instrument_id: instrument_id.to_string(),
            values,
        };
        match self.tx.send(request) {
            Ok(()) => debug!("Queued {} values for {}", count, instrument_id),
            Err(_) => error!(
                "Writer is gone, dropping {} values for {}",
                count, instrument_id
            ),
        }
    }
}

pub struct PersistenceWriter {
    queue: WriteQueue,
    handle: JoinHandle<WriterStats>,
}

impl PersistenceWriter {
    /// Start the writer task on the current runtime
    pub fn spawn(store: Arc<dyn ValueStore>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<WriteRequest>();

        let handle = tokio::spawn(async move {
            let mut stats = WriterStats::default();

            while let Some(request) = rx.recv().await {
                match store.upsert_values(&request.instrument_id, &request.values).await {
                    Ok(rows) => {
                        stats.batches_written += 1;
                        stats.rows_written += rows;
                        info!(
                            "Persisted {} values for {}",
                            request.values.len(),
                            request.instrument_id
                        );
                    }
                    Err(e) => {
                        stats.batches_failed += 1;
                        error!(
                            "Failed to persist {} values for {}: {} ({})",
                            request.values.len(),
                            request.instrument_id,
                            e,
                            e.error_code()
                        );
                    }
                }
            }

            debug!("Writer drained: {:?}", stats);
            stats
        });

        PersistenceWriter {
            queue: WriteQueue { tx },
            handle,
        }
    }

    pub fn queue(&self) -> WriteQueue {
        self.queue.clone()
    }

    /// Close this handle's sender and wait for queued writes to finish.
    /// Outstanding `WriteQueue` clones must be dropped first or this waits on them.
    pub async fn shutdown(self) -> Result<WriterStats> {
        let PersistenceWriter { queue, handle } = self;
        drop(queue);

        let stats = handle
            .await
            .map_err(|e| SyncError::Internal(format!("writer task failed: {}", e)))?;

        if stats.batches_failed > 0 {
            warn!("{} write batches failed", stats.batches_failed);
        }
        Ok(stats)
    }
}
