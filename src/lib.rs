pub mod types;
pub mod error;
pub mod source;
pub mod data;
pub mod storage;
pub mod config;
pub mod utils;

pub use types::*;
pub use error::{Result, SyncError};
