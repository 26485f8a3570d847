// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Output configuration.
//!
//! A [`Config`] can come from the plugin option block (a JSON object using
//! the option names `url`, `index`, `oauth2_token`, `is_debug`, ...), from
//! `LOGLENS_*` environment variables, or be built in code with
//! [`Config::new`]. Whatever the source, [`Config::validate`] runs before
//! the output accepts events.

use serde::Deserialize;
use std::env;
use std::time::Duration;
use url::Url;

use crate::constants::{
    DEFAULT_BACKOFF_BASE_MS, DEFAULT_MAX_ATTEMPTS, DEFAULT_QUEUE_CAPACITY, DEFAULT_TIMEOUT_SECS,
    MAX_QUEUE_CAPACITY,
};
use crate::error::ConfigError;
use crate::retry::RetryStrategy;
use crate::token::BearerToken;

#[derive(Debug, Clone)]
pub struct Config {
    /// Remote endpoint envelopes are POSTed to.
    pub url: String,
    /// Index name attached to every envelope.
    pub index: String,
    pub oauth2_token: BearerToken,
    /// Print envelopes instead of sending them.
    pub is_debug: bool,
    /// Per-attempt request deadline.
    pub timeout: Duration,
    pub retry_strategy: RetryStrategy,
    pub https_proxy: Option<String>,
    /// Zero delivers inline; anything else puts a bounded queue in front of the client.
    pub queue_capacity: usize,
}

/// Option block as written in the pipeline configuration.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PluginSettings {
    pub url: Option<String>,
    pub index: Option<String>,
    pub oauth2_token: Option<BearerToken>,
    pub is_debug: Option<bool>,
    pub timeout_secs: Option<u64>,
    pub max_attempts: Option<u32>,
    pub backoff_base_ms: Option<u64>,
    pub https_proxy: Option<String>,
    pub queue_capacity: Option<usize>,
}

impl Config {
    /// Config with the given required options and defaults for the rest.
    pub fn new(url: &str, index: &str, oauth2_token: &str) -> Self {
        Config {
            url: url.to_string(),
            index: index.to_string(),
            oauth2_token: BearerToken::new(oauth2_token),
            is_debug: false,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            retry_strategy: RetryStrategy::default(),
            https_proxy: None,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }

    pub fn from_settings(settings: PluginSettings) -> Result<Self, ConfigError> {
        let url = settings.url.ok_or(ConfigError::Missing("url"))?;
        let index = settings.index.ok_or(ConfigError::Missing("index"))?;
        let oauth2_token = settings
            .oauth2_token
            .ok_or(ConfigError::Missing("oauth2_token"))?;

        let config = Config {
            url,
            index,
            oauth2_token,
            is_debug: settings.is_debug.unwrap_or(false),
            timeout: Duration::from_secs(settings.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS)),
            retry_strategy: RetryStrategy::ExponentialBackoff(
                settings.max_attempts.unwrap_or(DEFAULT_MAX_ATTEMPTS),
                settings.backoff_base_ms.unwrap_or(DEFAULT_BACKOFF_BASE_MS),
            ),
            https_proxy: settings.https_proxy.filter(|p| !p.trim().is_empty()),
            queue_capacity: settings.queue_capacity.unwrap_or(DEFAULT_QUEUE_CAPACITY),
        };
        config.validate()?;
        Ok(config)
    }

    /// Parses the plugin option block, e.g.
    /// `{"url": "https://…", "index": "app-logs", "oauth2_token": "…", "is_debug": false}`.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let settings: PluginSettings = serde_json::from_str(json)?;
        Self::from_settings(settings)
    }

    /// Loads configuration from `LOGLENS_*` environment variables.
    ///
    /// - `LOGLENS_URL`, `LOGLENS_INDEX`, `LOGLENS_OAUTH2_TOKEN` (required)
    /// - `LOGLENS_IS_DEBUG` (`true`/`1`/`yes`)
    /// - `LOGLENS_TIMEOUT_SECS`, `LOGLENS_MAX_ATTEMPTS`, `LOGLENS_BACKOFF_BASE_MS`
    /// - `LOGLENS_QUEUE_CAPACITY`
    /// - `LOGLENS_PROXY_HTTPS`, falling back to `HTTPS_PROXY`
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let settings = PluginSettings {
            url: lookup("LOGLENS_URL"),
            index: lookup("LOGLENS_INDEX"),
            oauth2_token: lookup("LOGLENS_OAUTH2_TOKEN").map(|t| BearerToken::new(&t)),
            is_debug: lookup("LOGLENS_IS_DEBUG")
                .map(|v| parse_bool("is_debug", &v))
                .transpose()?,
            timeout_secs: parse_number(&lookup, "LOGLENS_TIMEOUT_SECS", "timeout_secs")?,
            max_attempts: parse_number(&lookup, "LOGLENS_MAX_ATTEMPTS", "max_attempts")?,
            backoff_base_ms: parse_number(&lookup, "LOGLENS_BACKOFF_BASE_MS", "backoff_base_ms")?,
            https_proxy: lookup("LOGLENS_PROXY_HTTPS").or_else(|| lookup("HTTPS_PROXY")),
            queue_capacity: parse_number(&lookup, "LOGLENS_QUEUE_CAPACITY", "queue_capacity")?,
        };
        Self::from_settings(settings)
    }

    /// Checks every option and returns the parsed endpoint.
    pub fn validate(&self) -> Result<Url, ConfigError> {
        if self.index.trim().is_empty() {
            return Err(ConfigError::EmptyIndex);
        }
        if self.oauth2_token.is_empty() {
            return Err(ConfigError::EmptyToken);
        }
        if self.timeout.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "timeout_secs",
                value: "0".to_string(),
            });
        }
        if self.retry_strategy.attempts() == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_attempts",
                value: "0".to_string(),
            });
        }
        if self.queue_capacity > MAX_QUEUE_CAPACITY {
            return Err(ConfigError::InvalidValue {
                field: "queue_capacity",
                value: self.queue_capacity.to_string(),
            });
        }
        parse_endpoint(&self.url)
    }
}

fn parse_endpoint(raw: &str) -> Result<Url, ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidUrl {
        url: raw.to_string(),
        reason,
    };
    let url = Url::parse(raw.trim()).map_err(|e| invalid(e.to_string()))?;
    match url.scheme() {
        "http" | "https" => {}
        other => return Err(invalid(format!("unsupported scheme `{other}`"))),
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err(invalid("missing host".to_string()));
    }
    Ok(url)
}

fn parse_bool(field: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" | "" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            field,
            value: value.to_string(),
        }),
    }
}

fn parse_number<F, T>(lookup: &F, key: &str, field: &'static str) -> Result<Option<T>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    lookup(key)
        .map(|raw| {
            raw.trim().parse::<T>().map_err(|_| ConfigError::InvalidValue {
                field,
                value: raw.clone(),
            })
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key: &str| vars.get(key).cloned()
    }

    #[test]
    fn test_new_uses_defaults() {
        let config = Config::new("https://loglens.example.com/ingest", "app-logs", "token");

        assert!(!config.is_debug);
        assert_eq!(config.timeout, Duration::from_secs(5));
        assert_eq!(config.retry_strategy.max_attempts(), 3);
        assert_eq!(config.queue_capacity, 0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_json_plugin_options() {
        let config = Config::from_json(
            r#"{"url": "https://loglens.example.com", "index": "app-logs",
                "oauth2_token": "secret", "is_debug": true}"#,
        )
        .unwrap();

        assert_eq!(config.url, "https://loglens.example.com");
        assert_eq!(config.index, "app-logs");
        assert!(config.is_debug);
        assert_eq!(config.oauth2_token.header_value(), "Bearer secret");
    }

    #[test]
    fn test_from_json_missing_index() {
        let err = Config::from_json(r#"{"url": "https://x.example.com", "oauth2_token": "t"}"#)
            .unwrap_err();
        assert!(matches!(err, ConfigError::Missing("index")));
    }

    #[test]
    fn test_from_json_unknown_option() {
        let err = Config::from_json(
            r#"{"url": "https://x.example.com", "index": "i", "oauth2_token": "t", "codec": "json"}"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_validate_rejects_malformed_url() {
        let config = Config::new("not a url", "app-logs", "token");
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidUrl { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_unsupported_scheme() {
        let config = Config::new("ftp://loglens.example.com", "app-logs", "token");
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("unsupported scheme `ftp`"));
    }

    #[test]
    fn test_validate_rejects_empty_token() {
        let config = Config::new("https://loglens.example.com", "app-logs", "  ");
        assert!(matches!(config.validate(), Err(ConfigError::EmptyToken)));
    }

    #[test]
    fn test_validate_rejects_empty_index() {
        let config = Config::new("https://loglens.example.com", "", "token");
        assert!(matches!(config.validate(), Err(ConfigError::EmptyIndex)));
    }

    #[test]
    fn test_validate_rejects_oversized_queue() {
        let mut config = Config::new("https://loglens.example.com", "i", "token");
        config.queue_capacity = MAX_QUEUE_CAPACITY + 1;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue {
                field: "queue_capacity",
                ..
            })
        ));
    }

    #[test]
    fn test_validate_rejects_zero_timeout() {
        let mut config = Config::new("https://loglens.example.com", "i", "token");
        config.timeout = Duration::ZERO;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue {
                field: "timeout_secs",
                ..
            })
        ));
    }

    #[test]
    fn test_from_json_rejects_zero_attempts() {
        let err = Config::from_json(
            r#"{"url": "https://x.example.com", "index": "i", "oauth2_token": "t",
                "max_attempts": 0}"#,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue {
                field: "max_attempts",
                ..
            }
        ));
    }

    #[test]
    fn test_from_lookup_full() {
        let config = Config::from_lookup(lookup_from(&[
            ("LOGLENS_URL", "http://127.0.0.1:9000/log"),
            ("LOGLENS_INDEX", "app-logs"),
            ("LOGLENS_OAUTH2_TOKEN", "token"),
            ("LOGLENS_IS_DEBUG", "YES"),
            ("LOGLENS_TIMEOUT_SECS", "2"),
            ("LOGLENS_MAX_ATTEMPTS", "5"),
            ("LOGLENS_BACKOFF_BASE_MS", "10"),
            ("LOGLENS_QUEUE_CAPACITY", "64"),
            ("HTTPS_PROXY", "http://proxy.local:3128"),
        ]))
        .unwrap();

        assert!(config.is_debug);
        assert_eq!(config.timeout, Duration::from_secs(2));
        assert_eq!(config.retry_strategy, RetryStrategy::ExponentialBackoff(5, 10));
        assert_eq!(config.queue_capacity, 64);
        assert_eq!(config.https_proxy.as_deref(), Some("http://proxy.local:3128"));
    }

    #[test]
    fn test_from_lookup_missing_token() {
        let err = Config::from_lookup(lookup_from(&[
            ("LOGLENS_URL", "http://127.0.0.1:9000/log"),
            ("LOGLENS_INDEX", "app-logs"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Missing("oauth2_token")));
    }

    #[test]
    fn test_from_lookup_bad_number() {
        let err = Config::from_lookup(lookup_from(&[
            ("LOGLENS_URL", "http://127.0.0.1:9000/log"),
            ("LOGLENS_INDEX", "app-logs"),
            ("LOGLENS_OAUTH2_TOKEN", "token"),
            ("LOGLENS_MAX_ATTEMPTS", "three"),
        ]))
        .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue {
                field: "max_attempts",
                ..
            }
        ));
    }

    #[test]
    fn test_proxy_specific_var_wins() {
        let config = Config::from_lookup(lookup_from(&[
            ("LOGLENS_URL", "https://loglens.example.com"),
            ("LOGLENS_INDEX", "app-logs"),
            ("LOGLENS_OAUTH2_TOKEN", "token"),
            ("LOGLENS_PROXY_HTTPS", "http://a:1"),
            ("HTTPS_PROXY", "http://b:2"),
        ]))
        .unwrap();
        assert_eq!(config.https_proxy.as_deref(), Some("http://a:1"));
    }

    #[test]
    fn test_debug_output_hides_token() {
        let config = Config::new("https://loglens.example.com", "app-logs", "super-secret");
        assert!(!format!("{config:?}").contains("super-secret"));
    }
}
