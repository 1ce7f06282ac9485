/// Bounded-concurrency, fail-fast fetch pool
///
/// A fixed set of workers pulls indices from a shared atomic counter until the
/// work runs out or one operation fails. Results come back in index order no
/// matter which operation finishes first.
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use futures_util::future::join_all;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::{Result, SyncError};

struct PoolState<T> {
    total: usize,
    next_index: AtomicUsize,
    failed: AtomicBool,
    first_error: Mutex<Option<SyncError>>,
    slots: Mutex<Vec<Option<T>>>,
}

impl<T> PoolState<T> {
    /// Claim the next unprocessed index, unless the pool has failed or drained
    fn claim(&self) -> Option<usize> {
        if self.failed.load(Ordering::SeqCst) {
            return None;
        }
        let idx = self.next_index.fetch_add(1, Ordering::SeqCst);
        (idx < self.total).then_some(idx)
    }

    async fn record_failure(&self, idx: usize, error: SyncError) {
        if self
            .failed
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            warn!("Fetch pool aborting at index {}: {}", idx, error);
            *self.first_error.lock().await = Some(error);
        } else {
            debug!("Discarding later failure at index {}: {}", idx, error);
        }
    }
}

/// Run `operation` for every index in `0..total` with at most
/// `max_concurrency` in flight. Returns all results in index order, or the
/// first failure wrapped in `SyncError::PoolAborted`.
pub async fn run_in_pool<T, F, Fut>(total: usize, max_concurrency: usize, operation: F) -> Result<Vec<T>>
where
    T: Send + 'static,
    F: Fn(usize) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T>> + Send + 'static,
{
    if total == 0 {
        return Ok(Vec::new());
    }

    let workers = max_concurrency.max(1).min(total);
    let state = Arc::new(PoolState {
        total,
        next_index: AtomicUsize::new(0),
        failed: AtomicBool::new(false),
        first_error: Mutex::new(None),
        slots: Mutex::new((0..total).map(|_| None).collect()),
    });
    let operation = Arc::new(operation);

    debug!("Fetch pool starting: {} items, {} workers", total, workers);

    let handles: Vec<_> = (0..workers)
        .map(|worker| {
            let state = Arc::clone(&state);
            let operation = Arc::clone(&operation);
            tokio::spawn(async move {
                while let Some(idx) = state.claim() {
                    match (*operation)(idx).await {
                        Ok(value) => {
                            // Late results after a failure are dropped
                            if !state.failed.load(Ordering::SeqCst) {
                                state.slots.lock().await[idx] = Some(value);
                            }
                        }
                        Err(e) => {
                            state.record_failure(idx, e).await;
                            break;
                        }
                    }
                }
                debug!("Fetch pool worker {} finished", worker);
            })
        })
        .collect();

    for joined in join_all(handles).await {
        if let Err(e) = joined {
            state.failed.store(true, Ordering::SeqCst);
            let mut first_error = state.first_error.lock().await;
            if first_error.is_none() {
                *first_error = Some(SyncError::Internal(format!("fetch worker panicked: {}", e)));
            }
        }
    }

    if state.failed.load(Ordering::SeqCst) {
        let error = state
            .first_error
            .lock()
            .await
            .take()
            .unwrap_or_else(|| SyncError::Internal("fetch pool failed without an error".to_string()));
        return Err(SyncError::PoolAborted(Box::new(error)));
    }

    let slots = std::mem::take(&mut *state.slots.lock().await);
    slots
        .into_iter()
        .enumerate()
        .map(|(idx, slot)| {
            slot.ok_or_else(|| SyncError::Internal(format!("fetch pool slot {} was never filled", idx)))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn http_error(code: i32) -> SyncError {
        SyncError::Http {
            status_code: code,
            status_text: "Internal Server Error".to_string(),
            body: String::new(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_results_keep_index_order() {
        // Later indices finish first
        let result = run_in_pool(5, 3, |idx| async move {
            tokio::time::sleep(Duration::from_millis(10 - idx as u64)).await;
            Ok(idx)
        })
        .await
        .unwrap();

        assert_eq!(result, vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_is_bounded() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let (in_flight_op, peak_op) = (Arc::clone(&in_flight), Arc::clone(&peak));
        let result = run_in_pool(7, 3, move |idx| {
            let in_flight = Arc::clone(&in_flight_op);
            let peak = Arc::clone(&peak_op);
            async move {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
                Ok(idx * 2)
            }
        })
        .await
        .unwrap();

        assert_eq!(result, vec![0, 2, 4, 6, 8, 10, 12]);
        assert_eq!(peak.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fewer_items_than_workers() {
        let dispatched = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&dispatched);

        let result = run_in_pool(2, 3, move |idx| {
            counter.fetch_add(1, Ordering::SeqCst);
            async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                Ok(idx)
            }
        })
        .await
        .unwrap();

        assert_eq!(result, vec![0, 1]);
        assert_eq!(dispatched.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_empty_pool() {
        let result: Vec<usize> = run_in_pool(0, 3, |idx| async move { Ok(idx) }).await.unwrap();
        assert!(result.is_empty());
    }

    #[tokio::test]
    async fn test_zero_concurrency_still_runs() {
        let result = run_in_pool(3, 0, |idx| async move { Ok(idx) }).await.unwrap();
        assert_eq!(result, vec![0, 1, 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fail_fast_stops_claiming() {
        let dispatched = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&dispatched);

        let result = run_in_pool(20, 3, move |idx| {
            counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if idx == 2 {
                    return Err(http_error(500));
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
                Ok(idx)
            }
        })
        .await;

        let err = result.unwrap_err();
        match err {
            SyncError::PoolAborted(inner) => assert_eq!(inner.error_code(), "NET_001"),
            other => panic!("unexpected error: {}", other),
        }
        assert!(dispatched.load(Ordering::SeqCst) < 20);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_after_successes_returns_error() {
        let result = run_in_pool(5, 3, |idx| async move {
            tokio::time::sleep(Duration::from_millis(10 - idx as u64)).await;
            if idx == 4 {
                Err(http_error(502))
            } else {
                Ok(idx)
            }
        })
        .await;

        assert!(matches!(result, Err(SyncError::PoolAborted(_))));
    }
}
