/// Instrument history: directory lookup joined with value synchronization
use std::sync::Arc;

use tracing::info;

use crate::data::instruments::InstrumentDirectory;
use crate::data::sync::SyncCoordinator;
use crate::error::Result;
use crate::types::{InstrumentHistory, SyncOutcome};

pub struct InstrumentService {
    directory: Arc<InstrumentDirectory>,
    coordinator: SyncCoordinator,
}

impl InstrumentService {
    pub fn new(directory: Arc<InstrumentDirectory>, coordinator: SyncCoordinator) -> Self {
        Self {
            directory,
            coordinator,
        }
    }

    /// Resolve the instrument, then bring its values up to date
    pub async fn history(&self, instrument_id: &str) -> Result<InstrumentHistory> {
        self.history_with_outcome(instrument_id)
            .await
            .map(|(history, _)| history)
    }

    /// Same as `history`, also returning the sync run details
    pub async fn history_with_outcome(
        &self,
        instrument_id: &str,
    ) -> Result<(InstrumentHistory, SyncOutcome)> {
        let info = self.directory.lookup_or_refresh(instrument_id).await?;
        let outcome = self.coordinator.sync(instrument_id).await?;

        info!(
            "{} ({}): {} values, {} new",
            info.name,
            info.category.as_str(),
            outcome.values.len(),
            outcome.fetched
        );

        let history = InstrumentHistory {
            info,
            values: outcome.values.clone(),
        };
        Ok((history, outcome))
    }
}
