/// Storage capabilities for instrument values and the instrument directory
pub mod memory;
pub mod sqlite;

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{InstrumentInfo, ValueRecord};

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

#[async_trait]
pub trait ValueStore: Send + Sync {
    /// All persisted values for an instrument, ascending by time
    async fn read_values(&self, instrument_id: &str) -> Result<Vec<ValueRecord>>;

    /// Insert or overwrite values keyed by (instrument, time). Returns rows touched.
    async fn upsert_values(&self, instrument_id: &str, values: &[ValueRecord]) -> Result<u64>;
}

#[async_trait]
pub trait InstrumentStore: Send + Sync {
    async fn find_instrument(&self, instrument_id: &str) -> Result<Option<InstrumentInfo>>;

    /// Insert or update directory entries keyed by id. Returns rows touched.
    async fn upsert_instruments(&self, instruments: &[InstrumentInfo]) -> Result<u64>;
}
