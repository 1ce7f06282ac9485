/// HTTP client for the upstream fund value and fund list endpoints
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::{Client, Url};
use tracing::{debug, info, warn};

use crate::error::{Result, SyncError};
use crate::utils::time::format_date;

/// Rows per page requested from the value endpoint
pub const PAGE_SIZE: u32 = 20;

const VALUE_PATH: &str = "/f10/F10DataApi.aspx";
const LIST_PATH: &str = "/js/fundcode_search.js";

/// Raw access to the upstream. Implementations return the body text of a
/// 2xx response and map everything else to `SyncError::Http`.
#[async_trait]
pub trait SourceClient: Send + Sync {
    /// Fetch one page of value history, optionally starting at `resume_hint`
    async fn fetch_page(
        &self,
        instrument_id: &str,
        page: u32,
        resume_hint: Option<NaiveDate>,
    ) -> Result<String>;

    /// Fetch the instrument directory
    async fn fetch_list(&self) -> Result<String>;
}

pub struct HttpSourceClient {
    client: Client,
    base_url: String,
}

impl HttpSourceClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SyncError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(HttpSourceClient {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn get_text(&self, url: Url) -> Result<String> {
        let response = self.client.get(url.clone()).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!("Upstream returned {} for {}", status, url);
            return Err(SyncError::Http {
                status_code: i32::from(status.as_u16()),
                status_text: status.canonical_reason().unwrap_or_default().to_string(),
                body,
            });
        }

        let body = response.text().await?;
        debug!("Received {} bytes from {}", body.len(), url);
        Ok(body)
    }
}

#[async_trait]
impl SourceClient for HttpSourceClient {
    async fn fetch_page(
        &self,
        instrument_id: &str,
        page: u32,
        resume_hint: Option<NaiveDate>,
    ) -> Result<String> {
        let url = value_page_url(&self.base_url, instrument_id, page, resume_hint)?;
        info!("Fetching values from remote: {}", url);
        self.get_text(url).await
    }

    async fn fetch_list(&self) -> Result<String> {
        let url = list_url(&self.base_url)?;
        info!("Fetching instrument list: {}", url);
        self.get_text(url).await
    }
}

/// Build the value endpoint URL for one page
pub fn value_page_url(
    base_url: &str,
    instrument_id: &str,
    page: u32,
    resume_hint: Option<NaiveDate>,
) -> Result<Url> {
    let page = page.to_string();
    let per = PAGE_SIZE.to_string();
    let mut params = vec![
        ("type", "lsjz".to_string()),
        ("code", instrument_id.to_string()),
        ("page", page),
        ("per", per),
    ];
    if let Some(date) = resume_hint {
        params.push(("sdate", format_date(date)));
    }

    Url::parse_with_params(&format!("{}{}", base_url, VALUE_PATH), &params)
        .map_err(|e| SyncError::Config(format!("Invalid upstream URL '{}': {}", base_url, e)))
}

pub fn list_url(base_url: &str) -> Result<Url> {
    Url::parse(&format!("{}{}", base_url, LIST_PATH))
        .map_err(|e| SyncError::Config(format!("Invalid upstream URL '{}': {}", base_url, e)))
}
