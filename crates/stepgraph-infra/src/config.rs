//! Global configuration loader for stepgraph.
//!
//! Reads `config.toml` from the config directory (`~/.stepgraph/` by
//! default) and deserializes it into [`GlobalConfig`]. Falls back to
//! defaults when the file is missing or malformed.

use std::path::{Path, PathBuf};

use stepgraph_core::workflow::executor::ExecutorConfig;
use stepgraph_types::config::GlobalConfig;

/// Environment variable overriding the config directory.
pub const CONFIG_DIR_ENV: &str = "STEPGRAPH_CONFIG_DIR";

/// Resolve the config directory.
///
/// Priority:
/// 1. `STEPGRAPH_CONFIG_DIR` environment variable
/// 2. `~/.stepgraph`
/// 3. `./.stepgraph` when no home directory is known
pub fn resolve_config_dir() -> PathBuf {
    if let Ok(dir) = std::env::var(CONFIG_DIR_ENV) {
        return PathBuf::from(dir);
    }
    if let Some(home) = dirs::home_dir() {
        return home.join(".stepgraph");
    }
    PathBuf::from(".stepgraph")
}

/// Load global configuration from `{config_dir}/config.toml`.
///
/// - Missing file: [`GlobalConfig::default()`].
/// - Unreadable or malformed file: a warning, then the default.
pub async fn load_global_config(config_dir: &Path) -> GlobalConfig {
    let config_path = config_dir.join("config.toml");

    let content = match tokio::fs::read_to_string(&config_path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No config.toml found at {}, using defaults", config_path.display());
            return GlobalConfig::default();
        }
        Err(err) => {
            tracing::warn!("Failed to read {}: {err}, using defaults", config_path.display());
            return GlobalConfig::default();
        }
    };

    match toml::from_str::<GlobalConfig>(&content) {
        Ok(config) => config,
        Err(err) => {
            tracing::warn!(
                "Failed to parse {}: {err}, using defaults",
                config_path.display()
            );
            GlobalConfig::default()
        }
    }
}

/// Load the config file and resolve it into executor settings.
pub async fn load_executor_config(config_dir: &Path) -> ExecutorConfig {
    ExecutorConfig::from(&load_global_config(config_dir).await)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn load_global_config_missing_file_returns_default() {
        let tmp = TempDir::new().unwrap();
        let config = load_global_config(tmp.path()).await;
        assert_eq!(config, GlobalConfig::default());
    }

    #[tokio::test]
    async fn load_global_config_valid_toml_returns_parsed() {
        let tmp = TempDir::new().unwrap();
        tokio::fs::write(
            tmp.path().join("config.toml"),
            r#"
max_concurrency = 8
default_step_timeout = "45s"
retry_backoff = "200ms"
"#,
        )
        .await
        .unwrap();

        let config = load_global_config(tmp.path()).await;
        assert_eq!(config.max_concurrency, Some(8));
        assert_eq!(config.default_step_timeout, Some(Duration::from_secs(45)));
        assert_eq!(config.retry_backoff, Duration::from_millis(200));
        assert_eq!(config.max_retry_backoff, Duration::from_secs(30));
    }

    #[tokio::test]
    async fn load_global_config_invalid_toml_returns_default() {
        let tmp = TempDir::new().unwrap();
        tokio::fs::write(tmp.path().join("config.toml"), "this is not { valid toml !!!")
            .await
            .unwrap();

        let config = load_global_config(tmp.path()).await;
        assert_eq!(config, GlobalConfig::default());
    }

    #[tokio::test]
    async fn load_global_config_bad_duration_returns_default() {
        let tmp = TempDir::new().unwrap();
        tokio::fs::write(tmp.path().join("config.toml"), "retry_backoff = \"soon\"")
            .await
            .unwrap();

        let config = load_global_config(tmp.path()).await;
        assert_eq!(config.retry_backoff, Duration::ZERO);
    }

    #[tokio::test]
    async fn load_executor_config_resolves_global() {
        let tmp = TempDir::new().unwrap();
        tokio::fs::write(
            tmp.path().join("config.toml"),
            "max_concurrency = 3\ndefault_workflow_timeout = \"2m\"\n",
        )
        .await
        .unwrap();

        let config = load_executor_config(tmp.path()).await;
        assert_eq!(config.max_concurrency, Some(3));
        assert_eq!(
            config.default_workflow_timeout,
            Some(Duration::from_secs(120))
        );
    }

    #[test]
    fn test_resolve_config_dir_from_env() {
        // SAFETY: This test is single-threaded and restores the env var immediately.
        unsafe {
            std::env::set_var(CONFIG_DIR_ENV, "/tmp/test-stepgraph");
        }
        let dir = resolve_config_dir();
        assert_eq!(dir, PathBuf::from("/tmp/test-stepgraph"));
        unsafe {
            std::env::remove_var(CONFIG_DIR_ENV);
        }
    }
}
