//! Engine configuration.
//!
//! One `SyncConfig` carries the remote endpoint settings and paging defaults.
//! It can be provisioned as JSON or read from `FORMSYNC_*` environment
//! variables.

use std::env;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::util::{is_http_url, normalize_text_option};
use crate::{Error, Result};

const ENV_API_BASE_URL: &str = "FORMSYNC_API_BASE_URL";
const ENV_API_TOKEN: &str = "FORMSYNC_API_TOKEN";
const ENV_HTTP_TIMEOUT_SECS: &str = "FORMSYNC_HTTP_TIMEOUT_SECS";
const ENV_PAGE_SIZE: &str = "FORMSYNC_PAGE_SIZE";
const ENV_MAX_PAGE_SIZE: &str = "FORMSYNC_MAX_PAGE_SIZE";

const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 15;
const DEFAULT_PAGE_SIZE: usize = 20;
const DEFAULT_MAX_PAGE_SIZE: usize = 100;
/// Upper bound accepted for `max_page_size`
const PAGE_SIZE_CEILING: usize = 10_000;

#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct SyncConfig {
    /// Remote API root, e.g. `https://forms.example.com`
    #[serde(default)]
    pub api_base_url: Option<String>,
    /// Bearer token attached to remote requests; refreshing it is the caller's job
    #[serde(default)]
    pub api_token: Option<String>,
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    #[serde(default = "default_max_page_size")]
    pub max_page_size: usize,
}

const fn default_http_timeout_secs() -> u64 {
    DEFAULT_HTTP_TIMEOUT_SECS
}

const fn default_page_size() -> usize {
    DEFAULT_PAGE_SIZE
}

const fn default_max_page_size() -> usize {
    DEFAULT_MAX_PAGE_SIZE
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            api_base_url: None,
            api_token: None,
            http_timeout_secs: DEFAULT_HTTP_TIMEOUT_SECS,
            page_size: DEFAULT_PAGE_SIZE,
            max_page_size: DEFAULT_MAX_PAGE_SIZE,
        }
    }
}

impl fmt::Debug for SyncConfig {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("SyncConfig")
            .field("api_base_url", &self.api_base_url)
            .field(
                "api_token",
                &self.api_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("http_timeout_secs", &self.http_timeout_secs)
            .field("page_size", &self.page_size)
            .field("max_page_size", &self.max_page_size)
            .finish()
    }
}

impl SyncConfig {
    /// Parse and validate a JSON configuration payload.
    pub fn from_json(payload: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(payload)?;
        config.normalized()
    }

    /// Load configuration from `FORMSYNC_*` environment variables.
    ///
    /// Unset variables fall back to defaults.
    pub fn from_env() -> Result<Self> {
        parse_config(|key| env::var(key).ok())
    }

    /// Request timeout for remote calls.
    pub const fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    /// Whether a remote endpoint is configured.
    pub const fn has_remote(&self) -> bool {
        self.api_base_url.is_some()
    }

    /// Cap a requested page size to the configured maximum.
    pub fn clamp_page_size(&self, requested: usize) -> usize {
        requested.min(self.max_page_size)
    }

    fn normalized(mut self) -> Result<Self> {
        self.api_token = normalize_text_option(self.api_token.take());
        self.api_base_url = match normalize_text_option(self.api_base_url.take()) {
            Some(url) if is_http_url(&url) => Some(url.trim_end_matches('/').to_string()),
            Some(url) => {
                return Err(Error::InvalidInput(format!(
                    "api_base_url '{url}' must include http:// or https://"
                )))
            }
            None => None,
        };

        if self.http_timeout_secs == 0 {
            return Err(Error::InvalidInput(
                "http_timeout_secs must be greater than zero".into(),
            ));
        }
        if self.page_size == 0 || self.max_page_size == 0 {
            return Err(Error::InvalidInput(
                "page sizes must be greater than zero".into(),
            ));
        }
        if self.max_page_size > PAGE_SIZE_CEILING {
            return Err(Error::InvalidInput(format!(
                "max_page_size {} exceeds {PAGE_SIZE_CEILING}",
                self.max_page_size
            )));
        }
        if self.page_size > self.max_page_size {
            return Err(Error::InvalidInput(format!(
                "page_size {} exceeds max_page_size {}",
                self.page_size, self.max_page_size
            )));
        }
        Ok(self)
    }
}

fn parse_config<F>(lookup: F) -> Result<SyncConfig>
where
    F: Fn(&str) -> Option<String>,
{
    let read = |key: &str| normalize_text_option(lookup(key));
    let mut config = SyncConfig {
        api_base_url: read(ENV_API_BASE_URL),
        api_token: read(ENV_API_TOKEN),
        ..SyncConfig::default()
    };

    if let Some(value) = read(ENV_HTTP_TIMEOUT_SECS) {
        config.http_timeout_secs = parse_number(ENV_HTTP_TIMEOUT_SECS, &value)?;
    }
    if let Some(value) = read(ENV_PAGE_SIZE) {
        config.page_size = parse_number(ENV_PAGE_SIZE, &value)?;
    }
    if let Some(value) = read(ENV_MAX_PAGE_SIZE) {
        config.max_page_size = parse_number(ENV_MAX_PAGE_SIZE, &value)?;
    }

    config.normalized()
}

fn parse_number<N: std::str::FromStr>(key: &str, value: &str) -> Result<N> {
    value
        .parse()
        .map_err(|_| Error::InvalidInput(format!("{key} must be a positive integer, got '{value}'")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(key, value)| ((*key).to_string(), (*value).to_string()))
            .collect();
        move |key: &str| vars.get(key).cloned()
    }

    #[test]
    fn env_defaults_when_unset() {
        let config = parse_config(lookup(&[])).unwrap();
        assert_eq!(config, SyncConfig::default());
        assert!(!config.has_remote());
    }

    #[test]
    fn env_values_are_trimmed_and_parsed() {
        let config = parse_config(lookup(&[
            (ENV_API_BASE_URL, " https://forms.example.com/ "),
            (ENV_API_TOKEN, "  "),
            (ENV_HTTP_TIMEOUT_SECS, "5"),
            (ENV_PAGE_SIZE, "25"),
        ]))
        .unwrap();

        assert_eq!(
            config.api_base_url.as_deref(),
            Some("https://forms.example.com")
        );
        assert_eq!(config.api_token, None);
        assert_eq!(config.http_timeout(), Duration::from_secs(5));
        assert_eq!(config.page_size, 25);
    }

    #[test]
    fn env_rejects_bad_numbers_and_urls() {
        assert!(parse_config(lookup(&[(ENV_PAGE_SIZE, "many")])).is_err());
        assert!(parse_config(lookup(&[(ENV_HTTP_TIMEOUT_SECS, "0")])).is_err());
        assert!(parse_config(lookup(&[(ENV_API_BASE_URL, "forms.example.com")])).is_err());
        assert!(parse_config(lookup(&[(ENV_PAGE_SIZE, "500")])).is_err());
    }

    #[test]
    fn max_page_size_is_bounded() {
        let huge = usize::MAX.to_string();
        assert!(parse_config(lookup(&[(ENV_MAX_PAGE_SIZE, huge.as_str())])).is_err());
        let config = parse_config(lookup(&[(ENV_MAX_PAGE_SIZE, "10000")])).unwrap();
        assert_eq!(config.max_page_size, PAGE_SIZE_CEILING);
    }

    #[test]
    fn json_rejects_unknown_fields() {
        let error = SyncConfig::from_json(r#"{"page_size": 10, "unexpected": true}"#).unwrap_err();
        assert!(error.to_string().contains("unknown field"));
    }

    #[test]
    fn json_fills_defaults() {
        let config =
            SyncConfig::from_json(r#"{"api_base_url": "http://localhost:8000"}"#).unwrap();
        assert_eq!(config.page_size, DEFAULT_PAGE_SIZE);
        assert_eq!(config.clamp_page_size(1_000), DEFAULT_MAX_PAGE_SIZE);
        assert_eq!(config.clamp_page_size(7), 7);
    }

    #[test]
    fn debug_redacts_token() {
        let config = SyncConfig {
            api_token: Some("secret".to_string()),
            ..SyncConfig::default()
        };
        let debug = format!("{config:?}");
        assert!(!debug.contains("secret"));
        assert!(debug.contains("[REDACTED]"));
    }
}
