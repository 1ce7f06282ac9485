/// Incremental synchronization of one instrument's value history
///
/// A run reads what is already stored, resumes from the last stored trading
/// day, pulls every upstream page from that day on through the bounded pool,
/// and hands only the genuinely new records to the background writer.
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use tracing::{debug, error, info, info_span, Instrument};
use uuid::Uuid;

use crate::data::fetch_pool::run_in_pool;
use crate::data::writer::WriteQueue;
use crate::error::{Result, SyncError};
use crate::source::{fetch_value_page, SourceClient};
use crate::storage::ValueStore;
use crate::types::{SyncConfig, SyncOutcome, SyncWindow, ValueRecord};
use crate::utils::time::{epoch_sentinel, source_today};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Init,
    ResolveWindow,
    FetchFirstPage,
    FetchRemainingPages,
    UpToDate,
    Merge,
    PersistAsync,
    Done,
    Failed,
}

impl SyncState {
    pub fn as_str(&self) -> &str {
        match self {
            SyncState::Init => "INIT",
            SyncState::ResolveWindow => "RESOLVE_WINDOW",
            SyncState::FetchFirstPage => "FETCH_FIRST_PAGE",
            SyncState::FetchRemainingPages => "FETCH_REMAINING_PAGES",
            SyncState::UpToDate => "UP_TO_DATE",
            SyncState::Merge => "MERGE",
            SyncState::PersistAsync => "PERSIST_ASYNC",
            SyncState::Done => "DONE",
            SyncState::Failed => "FAILED",
        }
    }
}

fn transition(state: &mut SyncState, next: SyncState) {
    debug!("{} -> {}", state.as_str(), next.as_str());
    *state = next;
}

/// Work out where a run resumes. An empty history resumes from the epoch.
pub fn resolve_window(instrument_id: &str, persisted: &[ValueRecord]) -> SyncWindow {
    let resume_date = persisted
        .last()
        .map(ValueRecord::trading_day)
        .unwrap_or_else(epoch_sentinel);

    SyncWindow {
        instrument_id: instrument_id.to_string(),
        resume_date,
    }
}

/// Combine persisted and freshly fetched records.
///
/// Upstream includes the resume day itself, so when something was already
/// persisted the earliest fetched record is dropped by position. Pages that
/// shifted while being fetched can repeat a day; repeats are collapsed.
/// Returns `(merged, new)`.
pub fn merge_records(
    persisted: Vec<ValueRecord>,
    mut fetched: Vec<ValueRecord>,
) -> (Vec<ValueRecord>, Vec<ValueRecord>) {
    fetched.sort_by(|a, b| a.time.cmp(&b.time));
    if !persisted.is_empty() && !fetched.is_empty() {
        fetched.remove(0);
    }
    fetched.dedup_by_key(|record| record.time);

    let mut merged = persisted;
    merged.extend(fetched.iter().cloned());
    (merged, fetched)
}

pub struct SyncCoordinator {
    source: Arc<dyn SourceClient>,
    store: Arc<dyn ValueStore>,
    queue: WriteQueue,
    max_concurrency: usize,
    pacing: Duration,
}

impl SyncCoordinator {
    pub fn new(
        source: Arc<dyn SourceClient>,
        store: Arc<dyn ValueStore>,
        queue: WriteQueue,
        max_concurrency: usize,
        pacing: Duration,
    ) -> Self {
        Self {
            source,
            store,
            queue,
            max_concurrency,
            pacing,
        }
    }

    pub fn with_config(
        config: &SyncConfig,
        source: Arc<dyn SourceClient>,
        store: Arc<dyn ValueStore>,
        queue: WriteQueue,
    ) -> Self {
        Self::new(source, store, queue, config.max_concurrency, config.page_pacing())
    }

    /// Synchronize one instrument up to today
    pub async fn sync(&self, instrument_id: &str) -> Result<SyncOutcome> {
        self.sync_at(instrument_id, Utc::now()).await
    }

    /// Synchronize with an explicit notion of "now"
    pub async fn sync_at(&self, instrument_id: &str, now: DateTime<Utc>) -> Result<SyncOutcome> {
        let span = info_span!("sync", instrument_id = %instrument_id, run_id = %Uuid::new_v4());
        self.run(instrument_id, now).instrument(span).await
    }

    async fn run(&self, instrument_id: &str, now: DateTime<Utc>) -> Result<SyncOutcome> {
        let mut state = SyncState::Init;

        transition(&mut state, SyncState::ResolveWindow);
        let persisted = match self.store.read_values(instrument_id).await {
            Ok(values) => values,
            Err(e) => return Err(self.fail(&mut state, instrument_id, e)),
        };
        let window = resolve_window(instrument_id, &persisted);

        if !persisted.is_empty() && window.resume_date == source_today(now) {
            transition(&mut state, SyncState::UpToDate);
            info!("{} is up to date as of {}", instrument_id, window.resume_date);
            transition(&mut state, SyncState::Done);
            return Ok(SyncOutcome {
                window,
                values: persisted,
                fetched: 0,
                up_to_date: true,
            });
        }

        let fetched = match self.fetch_since(&mut state, instrument_id, window.resume_date).await {
            Ok(values) => values,
            Err(e) => return Err(self.fail(&mut state, instrument_id, e)),
        };

        transition(&mut state, SyncState::Merge);
        let stored = persisted.len();
        let (merged, new_values) = merge_records(persisted, fetched);
        info!(
            "Merged {} stored + {} new values for {}",
            stored,
            new_values.len(),
            instrument_id
        );

        let fetched = new_values.len();
        if new_values.is_empty() {
            transition(&mut state, SyncState::UpToDate);
        } else {
            transition(&mut state, SyncState::PersistAsync);
            self.queue.submit(instrument_id, new_values);
        }

        transition(&mut state, SyncState::Done);
        Ok(SyncOutcome {
            window,
            values: merged,
            fetched,
            up_to_date: fetched == 0,
        })
    }

    async fn fetch_since(
        &self,
        state: &mut SyncState,
        instrument_id: &str,
        resume_date: NaiveDate,
    ) -> Result<Vec<ValueRecord>> {
        transition(state, SyncState::FetchFirstPage);
        let first = fetch_value_page(self.source.as_ref(), instrument_id, 1, Some(resume_date)).await?;
        info!(
            "📥 {} has {} pages since {}",
            instrument_id, first.total_pages, resume_date
        );

        let mut values = first.values;
        let remaining = first.total_pages.saturating_sub(1) as usize;
        if remaining == 0 {
            return Ok(values);
        }

        transition(state, SyncState::FetchRemainingPages);
        let source = Arc::clone(&self.source);
        let id = instrument_id.to_string();
        let pacing = self.pacing;

        let pages = run_in_pool(remaining, self.max_concurrency, move |idx| {
            let source = Arc::clone(&source);
            let id = id.clone();
            async move {
                // Page 1 was fetched above
                let page = idx as u32 + 2;
                let response = fetch_value_page(source.as_ref(), &id, page, Some(resume_date)).await?;
                tokio::time::sleep(pacing).await;
                Ok(response.values)
            }
        })
        .await?;

        for page in pages {
            values.extend(page);
        }
        Ok(values)
    }

    fn fail(&self, state: &mut SyncState, instrument_id: &str, cause: SyncError) -> SyncError {
        transition(state, SyncState::Failed);
        error!(
            "❌ Sync failed for {}: {} ({})",
            instrument_id,
            cause,
            cause.error_code()
        );
        SyncError::SyncFailed {
            instrument_id: instrument_id.to_string(),
            source: Box::new(cause),
        }
    }
}
