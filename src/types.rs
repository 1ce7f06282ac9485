/// Core type definitions for the synchronization pipeline
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::utils::time::source_date;

/// One instrument valuation on one trading day
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValueRecord {
    pub time: DateTime<Utc>,
    pub value: f64,
}

impl ValueRecord {
    pub fn new(time: DateTime<Utc>, value: f64) -> Self {
        ValueRecord { time, value }
    }

    /// Trading day of this record in the source calendar
    pub fn trading_day(&self) -> NaiveDate {
        source_date(self.time)
    }
}

/// Fund category derived from the upstream free-text label
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Mixed,
    Bond,
    Index,
    Equity,
    Other,
}

impl Category {
    /// Map an upstream label. Unknown labels are rejected, never defaulted.
    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "混合型" | "混合-FOF" => Some(Category::Mixed),
            "债券型" | "定开债券" | "债券指数" => Some(Category::Bond),
            "联接基金" | "股票指数" | "QDII-指数" | "ETF-场内" | "QDII-ETF" => {
                Some(Category::Index)
            }
            "货币型" | "理财型" | "固定收益" | "分级杠杆" | "保本型" | "其他创新" => {
                Some(Category::Other)
            }
            "QDII" | "股票型" | "股票-FOF" => Some(Category::Equity),
            _ => None,
        }
    }

    /// Stable code used in storage
    pub fn as_str(&self) -> &str {
        match self {
            Category::Mixed => "mixed",
            Category::Bond => "bond",
            Category::Index => "index",
            Category::Equity => "equity",
            Category::Other => "other",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "mixed" => Some(Category::Mixed),
            "bond" => Some(Category::Bond),
            "index" => Some(Category::Index),
            "equity" => Some(Category::Equity),
            "other" => Some(Category::Other),
            _ => None,
        }
    }
}

/// Directory entry for one instrument
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentInfo {
    pub id: String,
    pub name: String,
    pub category: Category,
}

/// One deserialized page of the value endpoint
#[derive(Debug, Clone, PartialEq)]
pub struct PagedValueResponse {
    pub values: Vec<ValueRecord>,
    pub current_page: u32,
    pub total_pages: u32,
    /// Upstream total row count, when reported
    pub records: Option<u64>,
}

/// Where a synchronization run resumes from
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncWindow {
    pub instrument_id: String,
    pub resume_date: NaiveDate,
}

/// Result of one synchronization run
#[derive(Debug, Clone, Serialize)]
pub struct SyncOutcome {
    pub window: SyncWindow,
    /// Persisted records followed by the new ones, ascending by time
    pub values: Vec<ValueRecord>,
    /// Records that were not persisted before this run
    pub fetched: usize,
    pub up_to_date: bool,
}

/// Synchronized history joined with its directory entry
#[derive(Debug, Clone, Serialize)]
pub struct InstrumentHistory {
    pub info: InstrumentInfo,
    pub values: Vec<ValueRecord>,
}

/// Configuration for the synchronizer
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    // Upstream
    pub base_url: String,
    pub request_timeout_sec: u64,

    // Fetch pool
    pub max_concurrency: usize,
    pub page_pacing_ms: u64,

    // Storage
    pub database_path: String,

    // Logging
    pub log_json: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        SyncConfig {
            base_url: "http://fund.eastmoney.com".to_string(),
            request_timeout_sec: 30,
            max_concurrency: 3,
            page_pacing_ms: 500,
            database_path: "data/fundsync.db".to_string(),
            log_json: false,
        }
    }
}

impl SyncConfig {
    pub fn page_pacing(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.page_pacing_ms)
    }

    pub fn request_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.request_timeout_sec)
    }
}
