pub mod client;
pub mod deserializer;
pub mod literal;

pub use client::{HttpSourceClient, SourceClient, PAGE_SIZE};
pub use deserializer::{deserialize_instrument_list, deserialize_value_page};

use chrono::NaiveDate;
use tracing::debug;

use crate::error::{Result, SyncError};
use crate::types::{InstrumentInfo, PagedValueResponse};

/// Fetch one value page and validate it
pub async fn fetch_value_page(
    client: &dyn SourceClient,
    instrument_id: &str,
    page: u32,
    resume_hint: Option<NaiveDate>,
) -> Result<PagedValueResponse> {
    let raw = client.fetch_page(instrument_id, page, resume_hint).await?;
    let response = deserialize_value_page(&raw)?;
    if response.current_page != page {
        return Err(SyncError::deserialization(
            "apidata.curpage",
            format!("requested page {}, upstream returned page {}", page, response.current_page),
        ));
    }
    debug!(
        "Page {}/{} of {}: {} values",
        response.current_page,
        response.total_pages,
        instrument_id,
        response.values.len()
    );
    Ok(response)
}

/// Fetch the instrument directory and validate it
pub async fn fetch_instrument_list(client: &dyn SourceClient) -> Result<Vec<InstrumentInfo>> {
    let raw = client.fetch_list().await?;
    deserialize_instrument_list(&raw)
}
