//! Global configuration loader for casflow.
//!
//! Reads `casflow.toml` and deserializes it into [`GlobalConfig`]. Falls back
//! to defaults when the file is missing or malformed, then applies
//! environment overrides.

use std::path::Path;

use casflow_types::config::GlobalConfig;

/// Default config file name, looked up in the working directory.
pub const CONFIG_FILE_NAME: &str = "casflow.toml";

/// Environment variable overriding `resource_server_url`.
pub const RESOURCE_SERVER_ENV: &str = "CAS_SERVER";

/// Load configuration from `path`, then apply environment overrides.
///
/// - If the file does not exist, starts from [`GlobalConfig::default()`].
/// - If the file exists but fails to parse, logs a warning and starts from the default.
/// - `CAS_SERVER`, when set and non-empty, replaces the resource server URL.
pub async fn load_global_config(path: &Path) -> GlobalConfig {
    let config = read_config_file(path).await;
    apply_env_overrides(config, |key| std::env::var(key).ok())
}

async fn read_config_file(path: &Path) -> GlobalConfig {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No config file found at {}, using defaults", path.display());
            return GlobalConfig::default();
        }
        Err(err) => {
            tracing::warn!("Failed to read {}: {err}, using defaults", path.display());
            return GlobalConfig::default();
        }
    };

    match toml::from_str::<GlobalConfig>(&content) {
        Ok(config) => config,
        Err(err) => {
            tracing::warn!("Failed to parse {}: {err}, using defaults", path.display());
            GlobalConfig::default()
        }
    }
}

/// Apply overrides read through `var`.
pub fn apply_env_overrides(mut config: GlobalConfig, var: impl Fn(&str) -> Option<String>) -> GlobalConfig {
    if let Some(server) = var(RESOURCE_SERVER_ENV).filter(|s| !s.trim().is_empty()) {
        tracing::debug!(resource_server_url = %server, "resource server overridden from environment");
        config.resource_server_url = server.trim().to_string();
    }
    config
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[tokio::test]
    async fn missing_file_returns_default() {
        let tmp = TempDir::new().unwrap();
        let config = read_config_file(&tmp.path().join(CONFIG_FILE_NAME)).await;
        assert_eq!(config, GlobalConfig::default());
        assert_eq!(config.resource_server_url, "http://localhost:9200");
    }

    #[tokio::test]
    async fn valid_toml_returns_parsed() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(CONFIG_FILE_NAME);
        tokio::fs::write(
            &path,
            r#"
resource_server_url = "http://cas.internal:9200"

[http]
retry_count = 2

[activity]
max_attempts = 4
"#,
        )
        .await
        .unwrap();

        let config = read_config_file(&path).await;
        assert_eq!(config.resource_server_url, "http://cas.internal:9200");
        assert_eq!(config.http.retry_count, 2);
        assert_eq!(config.http.retry_wait_ms, 1_000);
        assert_eq!(config.activity.max_attempts, 4);
        assert_eq!(config.polling.initial_delay_secs, 5);
    }

    #[tokio::test]
    async fn invalid_toml_returns_default() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(CONFIG_FILE_NAME);
        tokio::fs::write(&path, "this is not { valid toml !!!").await.unwrap();

        assert_eq!(read_config_file(&path).await, GlobalConfig::default());
    }

    #[test]
    fn env_override_replaces_server_url() {
        let config = apply_env_overrides(GlobalConfig::default(), |key| {
            (key == RESOURCE_SERVER_ENV).then(|| " http://override:1234 ".to_string())
        });
        assert_eq!(config.resource_server_url, "http://override:1234");
    }

    #[test]
    fn blank_or_absent_env_keeps_file_value() {
        let config = apply_env_overrides(GlobalConfig::default(), no_env);
        assert_eq!(config.resource_server_url, "http://localhost:9200");

        let config = apply_env_overrides(GlobalConfig::default(), |_| Some("  ".to_string()));
        assert_eq!(config.resource_server_url, "http://localhost:9200");
    }
}
