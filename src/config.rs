//! Configuration: generation/search parameters and client transport settings.

use crate::{Error, ErrorContext, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://api.perplexity.ai";
pub const DEFAULT_MODEL: &str = "sonar";
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(3);
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    Web,
    Academic,
    Sec,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReasoningEffort {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecencyFilter {
    Hour,
    Day,
    Week,
    Month,
    Year,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchContextSize {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserLocation {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
}

impl UserLocation {
    pub fn is_empty(&self) -> bool {
        self.latitude.is_none()
            && self.longitude.is_none()
            && self.country.as_deref().map_or(true, |c| c.trim().is_empty())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WebSearchOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search_context_size: Option<SearchContextSize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_location: Option<UserLocation>,
}

impl WebSearchOptions {
    pub fn is_empty(&self) -> bool {
        self.search_context_size.is_none()
            && self.user_location.as_ref().map_or(true, UserLocation::is_empty)
    }
}

/// Generation and search parameters for one conversation.
///
/// Every field has an inactive default (`None`, `false` or empty). The payload
/// builder leaves inactive fields off the wire entirely.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub model: String,
    pub system_prompt: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
    pub top_k: Option<u32>,
    pub presence_penalty: Option<f64>,
    pub frequency_penalty: Option<f64>,
    pub search_mode: Option<SearchMode>,
    pub reasoning_effort: Option<ReasoningEffort>,
    pub search_domain_filter: Vec<String>,
    pub search_recency_filter: Option<RecencyFilter>,
    pub search_after_date_filter: Option<String>,
    pub search_before_date_filter: Option<String>,
    pub last_updated_after_filter: Option<String>,
    pub last_updated_before_filter: Option<String>,
    pub return_images: bool,
    pub image_domain_filter: Vec<String>,
    pub image_format_filter: Vec<String>,
    pub return_related_questions: bool,
    pub disable_search: bool,
    pub enable_search_classifier: bool,
    pub web_search_options: Option<WebSearchOptions>,
    pub response_format: Option<serde_json::Value>,
    pub language_preference: Option<String>,
    pub stream: bool,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            system_prompt: None,
            max_tokens: None,
            temperature: None,
            top_p: None,
            top_k: None,
            presence_penalty: None,
            frequency_penalty: None,
            search_mode: None,
            reasoning_effort: None,
            search_domain_filter: Vec::new(),
            search_recency_filter: None,
            search_after_date_filter: None,
            search_before_date_filter: None,
            last_updated_after_filter: None,
            last_updated_before_filter: None,
            return_images: false,
            image_domain_filter: Vec::new(),
            image_format_filter: Vec::new(),
            return_related_questions: false,
            disable_search: false,
            enable_search_classifier: false,
            web_search_options: None,
            response_format: None,
            language_preference: None,
            stream: true,
        }
    }
}

impl SearchConfig {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..Self::default()
        }
    }

    /// Parse a configuration handed over by an external store as JSON.
    pub fn from_json_str(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }
}

/// Transport settings for talking to the upstream API.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
    pub poll_interval: Duration,
    pub proxy_url: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: None,
            timeout: DEFAULT_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            proxy_url: None,
        }
    }
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    /// Defaults, overridden by environment variables:
    /// - `SONAR_BASE_URL`
    /// - `SONAR_API_KEY`
    /// - `SONAR_HTTP_TIMEOUT_SECS`
    /// - `SONAR_POLL_INTERVAL_MS`
    /// - `SONAR_PROXY_URL`
    pub fn from_env() -> Result<Self> {
        let mut cfg = Self::default();
        if let Ok(url) = env::var("SONAR_BASE_URL") {
            cfg.base_url = url;
        }
        cfg.api_key = env::var("SONAR_API_KEY")
            .ok()
            .filter(|k| !k.trim().is_empty());
        if let Some(secs) = env::var("SONAR_HTTP_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .filter(|s| *s > 0)
        {
            cfg.timeout = Duration::from_secs(secs);
        }
        if let Some(ms) = env::var("SONAR_POLL_INTERVAL_MS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .filter(|ms| *ms > 0)
        {
            cfg.poll_interval = Duration::from_millis(ms);
        }
        cfg.proxy_url = env::var("SONAR_PROXY_URL").ok();
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_proxy(mut self, proxy_url: impl Into<String>) -> Self {
        self.proxy_url = Some(proxy_url.into());
        self
    }

    pub fn validate(&self) -> Result<()> {
        let parsed = url::Url::parse(&self.base_url).map_err(|e| {
            Error::configuration_with_context(
                "invalid base url",
                ErrorContext::new()
                    .with_field_path("base_url")
                    .with_details(format!("{}: {}", self.base_url, e))
                    .with_source("client_config"),
            )
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(Error::configuration_with_context(
                "base url must be http or https",
                ErrorContext::new()
                    .with_field_path("base_url")
                    .with_details(self.base_url.clone())
                    .with_source("client_config"),
            ));
        }
        if self.poll_interval.is_zero() {
            return Err(Error::configuration_with_context(
                "poll interval must be positive",
                ErrorContext::new()
                    .with_field_path("poll_interval")
                    .with_source("client_config"),
            ));
        }
        Ok(())
    }

    /// Base URL without a trailing slash, ready for path concatenation.
    pub fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_config_defaults_from_partial_json() {
        let cfg = SearchConfig::from_json_str(
            r#"{"model": "sonar-pro", "search_mode": "academic", "return_images": true}"#,
        )
        .unwrap();
        assert_eq!(cfg.model, "sonar-pro");
        assert_eq!(cfg.search_mode, Some(SearchMode::Academic));
        assert!(cfg.return_images);
        assert!(cfg.search_domain_filter.is_empty());
        assert!(cfg.stream);
    }

    #[test]
    fn client_config_rejects_bad_base_url() {
        let err = ClientConfig::new("not a url").validate().unwrap_err();
        assert!(matches!(err, Error::Configuration { .. }));

        let err = ClientConfig::new("ftp://example.com").validate().unwrap_err();
        assert!(err.to_string().contains("http or https"));
    }

    #[test]
    fn endpoint_joins_without_double_slash() {
        let cfg = ClientConfig::new("http://localhost:8080/");
        assert_eq!(
            cfg.endpoint("/chat/completions"),
            "http://localhost:8080/chat/completions"
        );
    }

    #[test]
    fn empty_web_search_options_are_inactive() {
        let opts = WebSearchOptions {
            search_context_size: None,
            user_location: Some(UserLocation::default()),
        };
        assert!(opts.is_empty());
    }
}
