/// Instrument directory backed by storage, refreshed from upstream on a miss
use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::error::{Result, SyncError};
use crate::source::{fetch_instrument_list, SourceClient};
use crate::storage::InstrumentStore;
use crate::types::InstrumentInfo;

pub struct InstrumentDirectory {
    source: Arc<dyn SourceClient>,
    store: Arc<dyn InstrumentStore>,
    cache: RwLock<HashMap<String, InstrumentInfo>>,
    last_refreshed: RwLock<Option<DateTime<Utc>>>,
}

impl InstrumentDirectory {
    pub fn new(source: Arc<dyn SourceClient>, store: Arc<dyn InstrumentStore>) -> Self {
        InstrumentDirectory {
            source,
            store,
            cache: RwLock::new(HashMap::new()),
            last_refreshed: RwLock::new(None),
        }
    }

    /// Download the full list, persist it and replace the cache
    pub async fn refresh(&self) -> Result<Vec<InstrumentInfo>> {
        info!("📥 Downloading instrument list...");

        let instruments = fetch_instrument_list(self.source.as_ref()).await?;
        self.store.upsert_instruments(&instruments).await?;

        let map = instruments
            .iter()
            .map(|info| (info.id.clone(), info.clone()))
            .collect();
        *self.cache.write().await = map;
        *self.last_refreshed.write().await = Some(Utc::now());

        info!("✅ Cached {} instruments", instruments.len());
        Ok(instruments)
    }

    /// Resolve an id from cache, then storage, then one upstream refresh
    pub async fn lookup_or_refresh(&self, instrument_id: &str) -> Result<InstrumentInfo> {
        if let Some(info) = self.cache.read().await.get(instrument_id) {
            return Ok(info.clone());
        }

        if let Some(info) = self.store.find_instrument(instrument_id).await? {
            debug!("Found {} in storage", instrument_id);
            return Ok(info);
        }

        info!("{} not stored, refreshing instrument list", instrument_id);
        self.refresh().await?;

        self.store
            .find_instrument(instrument_id)
            .await?
            .ok_or_else(|| SyncError::NotFound(instrument_id.to_string()))
    }

    pub async fn size(&self) -> usize {
        self.cache.read().await.len()
    }

    pub async fn last_refreshed(&self) -> Option<DateTime<Utc>> {
        *self.last_refreshed.read().await
    }
}
