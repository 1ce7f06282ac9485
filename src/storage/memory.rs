/// In-memory store, used by tests and dry runs
use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::{InstrumentStore, ValueStore};
use crate::error::Result;
use crate::types::{InstrumentInfo, ValueRecord};

#[derive(Default)]
pub struct MemoryStore {
    values: RwLock<HashMap<String, BTreeMap<DateTime<Utc>, f64>>>,
    instruments: RwLock<HashMap<String, InstrumentInfo>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of value rows held for an instrument
    pub async fn value_count(&self, instrument_id: &str) -> usize {
        self.values
            .read()
            .await
            .get(instrument_id)
            .map(|series| series.len())
            .unwrap_or(0)
    }
}

#[async_trait]
impl ValueStore for MemoryStore {
    async fn read_values(&self, instrument_id: &str) -> Result<Vec<ValueRecord>> {
        let values = self.values.read().await;
        Ok(values
            .get(instrument_id)
            .map(|series| {
                series
                    .iter()
                    .map(|(time, value)| ValueRecord::new(*time, *value))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn upsert_values(&self, instrument_id: &str, values: &[ValueRecord]) -> Result<u64> {
        let mut all = self.values.write().await;
        let series = all.entry(instrument_id.to_string()).or_default();
        for record in values {
            series.insert(record.time, record.value);
        }
        Ok(values.len() as u64)
    }
}

#[async_trait]
impl InstrumentStore for MemoryStore {
    async fn find_instrument(&self, instrument_id: &str) -> Result<Option<InstrumentInfo>> {
        Ok(self.instruments.read().await.get(instrument_id).cloned())
    }

    async fn upsert_instruments(&self, instruments: &[InstrumentInfo]) -> Result<u64> {
        let mut all = self.instruments.write().await;
        for info in instruments {
            all.insert(info.id.clone(), info.clone());
        }
        Ok(instruments.len() as u64)
    }
}
