/// Configuration loading from TOML file with FUNDSYNC_* environment overrides
use std::path::Path;

use crate::error::{Result, SyncError};
use crate::types::SyncConfig;

/// Prefix for environment overrides, e.g. FUNDSYNC_MAX_CONCURRENCY=5
pub const ENV_PREFIX: &str = "FUNDSYNC";

/// Load configuration. A missing file falls back to defaults.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<SyncConfig> {
    let settings = config::Config::builder()
        .add_source(
            config::File::from(path.as_ref())
                .format(config::FileFormat::Toml)
                .required(false),
        )
        .add_source(config::Environment::with_prefix(ENV_PREFIX).try_parsing(true))
        .build()
        .map_err(|e| SyncError::Config(format!("Failed to read config: {}", e)))?;

    let config: SyncConfig = settings
        .try_deserialize()
        .map_err(|e| SyncError::Config(format!("Failed to parse config: {}", e)))?;

    validate_config(&config)?;

    Ok(config)
}

/// Parse configuration from TOML text without consulting the environment
pub fn parse_config(content: &str) -> Result<SyncConfig> {
    let config: SyncConfig = toml::from_str(content)
        .map_err(|e| SyncError::Config(format!("Failed to parse config: {}", e)))?;

    validate_config(&config)?;

    Ok(config)
}

fn validate_config(config: &SyncConfig) -> Result<()> {
    if !(config.base_url.starts_with("http://") || config.base_url.starts_with("https://")) {
        return Err(SyncError::Config(format!(
            "base_url must be an http(s) URL, got '{}'",
            config.base_url
        )));
    }

    if config.max_concurrency == 0 {
        return Err(SyncError::Config("max_concurrency must be >= 1".to_string()));
    }

    if config.request_timeout_sec == 0 {
        return Err(SyncError::Config("request_timeout_sec must be >= 1".to_string()));
    }

    if config.database_path.trim().is_empty() {
        return Err(SyncError::Config("database_path is empty".to_string()));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let config = parse_config(
            r#"
            base_url = "https://fund.example.com"
            request_timeout_sec = 10
            max_concurrency = 5
            page_pacing_ms = 250
            database_path = "/tmp/values.db"
            log_json = true
            "#,
        )
        .unwrap();

        assert_eq!(config.base_url, "https://fund.example.com");
        assert_eq!(config.max_concurrency, 5);
        assert_eq!(config.page_pacing().as_millis(), 250);
        assert_eq!(config.request_timeout().as_secs(), 10);
        assert!(config.log_json);
    }

    #[test]
    fn test_missing_fields_use_defaults() {
        let config = parse_config("max_concurrency = 2").unwrap();
        let defaults = SyncConfig::default();

        assert_eq!(config.max_concurrency, 2);
        assert_eq!(config.base_url, defaults.base_url);
        assert_eq!(config.page_pacing_ms, defaults.page_pacing_ms);
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let err = parse_config("max_concurrency = 0").unwrap_err();
        assert_eq!(err.error_code(), "CFG_001");
    }

    #[test]
    fn test_non_http_base_url_rejected() {
        assert!(parse_config(r#"base_url = "ftp://fund.example.com""#).is_err());
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let config = load_config("does/not/exist/fundsync.toml").unwrap();
        assert!(config.max_concurrency >= 1);
    }
}
