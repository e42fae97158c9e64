//! Global configuration types for stepgraph.
//!
//! `GlobalConfig` represents the top-level `config.toml` that sets executor
//! defaults: concurrency cap, default timeouts and retry backoff.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level configuration.
///
/// Loaded from `~/.stepgraph/config.toml`. All fields have defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalConfig {
    /// Cap on concurrently running steps (None = bounded only by the graph).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_concurrency: Option<u32>,

    /// Per-attempt timeout for steps that declare none (and whose workflow
    /// declares none).
    #[serde(
        default,
        with = "crate::duration::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub default_step_timeout: Option<Duration>,

    /// Deadline applied to workflows that declare no `timeout`.
    #[serde(
        default,
        with = "crate::duration::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub default_workflow_timeout: Option<Duration>,

    /// Delay before the first retry; doubles on each subsequent retry.
    #[serde(default, with = "crate::duration::required")]
    pub retry_backoff: Duration,

    /// Upper bound on the retry delay.
    #[serde(
        default = "default_max_retry_backoff",
        with = "crate::duration::required"
    )]
    pub max_retry_backoff: Duration,
}

fn default_max_retry_backoff() -> Duration {
    Duration::from_secs(30)
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            max_concurrency: None,
            default_step_timeout: None,
            default_workflow_timeout: None,
            retry_backoff: Duration::ZERO,
            max_retry_backoff: default_max_retry_backoff(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_global_config_default_values() {
        let config = GlobalConfig::default();
        assert!(config.max_concurrency.is_none());
        assert!(config.default_step_timeout.is_none());
        assert_eq!(config.retry_backoff, Duration::ZERO);
        assert_eq!(config.max_retry_backoff, Duration::from_secs(30));
    }

    #[test]
    fn test_global_config_deserialize_with_defaults() {
        let config: GlobalConfig = toml::from_str("").unwrap();
        assert_eq!(config, GlobalConfig::default());
    }

    #[test]
    fn test_global_config_deserialize_with_values() {
        let toml_str = r#"
max_concurrency = 4
default_step_timeout = "2m"
default_workflow_timeout = "1h"
retry_backoff = "500ms"
max_retry_backoff = "10s"
"#;
        let config: GlobalConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.max_concurrency, Some(4));
        assert_eq!(config.default_step_timeout, Some(Duration::from_secs(120)));
        assert_eq!(
            config.default_workflow_timeout,
            Some(Duration::from_secs(3600))
        );
        assert_eq!(config.retry_backoff, Duration::from_millis(500));
        assert_eq!(config.max_retry_backoff, Duration::from_secs(10));
    }

    #[test]
    fn test_global_config_toml_roundtrip() {
        let config = GlobalConfig {
            max_concurrency: Some(2),
            default_step_timeout: Some(Duration::from_secs(30)),
            default_workflow_timeout: None,
            retry_backoff: Duration::from_millis(250),
            max_retry_backoff: Duration::from_secs(5),
        };
        let text = toml::to_string(&config).unwrap();
        let parsed: GlobalConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed, config);
    }
}
