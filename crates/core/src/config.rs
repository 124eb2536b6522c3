//! Configuration for tikcomments, loaded from TOML.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{
    backoff::{RateLimitPolicy, RetryPolicy},
    error::ConfigError,
    output::DEFAULT_OUTPUT_DIR,
};

pub const DEFAULT_API_URL: &str = "https://www.tiktok.com/api/comment/list/";
pub const DEFAULT_MAX_COMMENTS: usize = 1_000;

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub fetch: FetchConfig,
    pub http: HttpConfig,
    pub batch: BatchConfig,
}

/// Pagination limits and backoff for a single video
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Comments requested per page
    pub page_size: u32,
    /// Pages fetched per video before the result is reported as truncated
    pub max_pages: Option<u32>,
    /// Comments kept per video before the result is reported as truncated
    pub max_comments: Option<usize>,
    pub rate_limit: RateLimitPolicy,
    pub retry: RetryPolicy,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            page_size: 50,
            max_pages: Some(200),
            max_comments: Some(DEFAULT_MAX_COMMENTS),
            rate_limit: RateLimitPolicy::default(),
            retry: RetryPolicy::default(),
        }
    }
}

/// Settings of the HTTP comment source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub api_url: String,
    pub timeout_secs: u64,
    /// Rotated per request
    pub user_agents: Vec<String>,
    pub cookie: Option<String>,
    /// API `status_code` values the platform uses to signal throttling
    pub rate_limit_status_codes: Vec<i64>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            timeout_secs: 20,
            user_agents: vec![
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36".to_string(),
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/121.0.0.0 Safari/537.36".to_string(),
                "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36".to_string(),
                "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36".to_string(),
            ],
            cookie: None,
            rate_limit_status_codes: Vec::new(),
        }
    }
}

/// Batch level settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Videos fetched concurrently
    pub workers: usize,
    pub video_delay_min_ms: u64,
    pub video_delay_max_ms: u64,
    pub output_dir: PathBuf,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            video_delay_min_ms: 1_000,
            video_delay_max_ms: 3_000,
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
        }
    }
}

impl AppConfig {
    /// `~/.config/tikcomments/config.toml` (platform equivalent)
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("tikcomments").join("config.toml"))
    }

    /// Load from an explicit path, or from the default path when present.
    ///
    /// A missing explicit file is an error, a missing default file yields defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let (path, required) = match path {
            Some(path) => (path.to_path_buf(), true),
            None => match Self::default_path() {
                Some(path) => (path, false),
                None => return Ok(Self::default()),
            },
        };

        if !required && !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&path).map_err(|source| ConfigError::Io {
            path: path.clone(),
            source,
        })?;

        let config = Self::from_toml(&content).map_err(|source| ConfigError::Parse {
            path: path.clone(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.fetch.page_size == 0 {
            return Err(ConfigError::Invalid("fetch.page_size must be > 0".into()));
        }
        if self.fetch.max_pages == Some(0) {
            return Err(ConfigError::Invalid("fetch.max_pages must be > 0".into()));
        }
        if self.fetch.max_comments == Some(0) {
            return Err(ConfigError::Invalid("fetch.max_comments must be > 0".into()));
        }
        if self.fetch.rate_limit.max_consecutive == 0 {
            return Err(ConfigError::Invalid(
                "fetch.rate_limit.max_consecutive must be > 0".into(),
            ));
        }
        if self.fetch.rate_limit.base_delay_ms > self.fetch.rate_limit.max_delay_ms {
            return Err(ConfigError::Invalid(
                "fetch.rate_limit.base_delay_ms exceeds max_delay_ms".into(),
            ));
        }
        if self.http.user_agents.is_empty() {
            return Err(ConfigError::Invalid("http.user_agents must not be empty".into()));
        }
        if self.batch.workers == 0 {
            return Err(ConfigError::Invalid("batch.workers must be > 0".into()));
        }
        if self.batch.video_delay_min_ms > self.batch.video_delay_max_ms {
            return Err(ConfigError::Invalid(
                "batch.video_delay_min_ms exceeds video_delay_max_ms".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.fetch.page_size, 50);
        assert_eq!(config.fetch.max_pages, Some(200));
        assert_eq!(config.fetch.max_comments, Some(1_000));
        assert_eq!(config.batch.workers, 2);
        assert_eq!(config.http.api_url, DEFAULT_API_URL);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = AppConfig::from_toml(
            r#"
            [fetch]
            page_size = 20
            max_comments = 500

            [fetch.rate_limit]
            max_consecutive = 3

            [batch]
            workers = 4
            output_dir = "out"
            "#,
        )
        .unwrap();

        assert_eq!(config.fetch.page_size, 20);
        assert_eq!(config.fetch.max_comments, Some(500));
        assert_eq!(config.fetch.max_pages, Some(200));
        assert_eq!(config.fetch.rate_limit.max_consecutive, 3);
        assert_eq!(config.fetch.rate_limit.base_delay_ms, 2_000);
        assert_eq!(config.fetch.retry, RetryPolicy::default());
        assert_eq!(config.batch.workers, 4);
        assert_eq!(config.batch.output_dir, PathBuf::from("out"));
        assert!(!config.http.user_agents.is_empty());
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = AppConfig::default();
        config.batch.workers = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = AppConfig::default();
        config.batch.video_delay_min_ms = 10;
        config.batch.video_delay_max_ms = 5;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.http.user_agents.clear();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.fetch.page_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_missing_explicit_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.toml");
        assert!(matches!(
            AppConfig::load(Some(&missing)),
            Err(ConfigError::Io { .. })
        ));
    }

    #[test]
    fn test_load_reports_parse_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[fetch]\npage_size = \"many\"\n").unwrap();
        assert!(matches!(
            AppConfig::load(Some(&path)),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn test_load_reads_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[http]\ncookie = \"sid=1\"\n").unwrap();
        let config = AppConfig::load(Some(&path)).unwrap();
        assert_eq!(config.http.cookie.as_deref(), Some("sid=1"));
    }
}
