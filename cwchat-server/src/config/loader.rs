//! Configuration loader

use std::path::{Path, PathBuf};

use cwchat_utils::{config_file, CwchatError, Result};

use super::AppConfig;

/// Environment variables applied on top of the configuration file
pub const ENV_OVERRIDES: &[&str] = &[
    "PORT",
    "CWCHAT_BIND",
    "CWCHAT_WORKER_CMD",
    "CWCHAT_WORKER_CWD",
    "CWCHAT_REQUEST_TIMEOUT_MS",
    "CWCHAT_STRICT_PARSING",
    "CWCHAT_FIXTURES",
];

/// Configuration loader
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from default location, then apply the environment
    pub fn load() -> Result<AppConfig> {
        let path = config_file();
        let mut config = if path.exists() {
            Self::load_from_path(&path)?
        } else {
            AppConfig::default()
        };

        Self::apply_overrides(&mut config, |key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<AppConfig> {
        let content = std::fs::read_to_string(path).map_err(|e| CwchatError::FileRead {
            path: path.to_path_buf(),
            source: e,
        })?;

        Self::parse(&content, path)
    }

    /// Parse configuration from string
    pub fn parse(content: &str, path: &Path) -> Result<AppConfig> {
        toml::from_str(content).map_err(|e| CwchatError::ConfigInvalid {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// Apply environment overrides read through `lookup`
    ///
    /// Empty values are treated as unset.
    pub fn apply_overrides<F>(config: &mut AppConfig, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(port) = get("PORT") {
            config.server.port = port
                .trim()
                .parse()
                .map_err(|_| CwchatError::config(format!("PORT is not a valid port: {}", port)))?;
        }

        if let Some(bind) = get("CWCHAT_BIND") {
            config.server.bind = bind;
        }

        if let Some(command) = get("CWCHAT_WORKER_CMD") {
            // Whitespace-separated: program followed by its arguments
            let mut parts = command.split_whitespace().map(String::from);
            config.worker.command = parts.next();
            config.worker.args = parts.collect();
        }

        if let Some(cwd) = get("CWCHAT_WORKER_CWD") {
            config.worker.cwd = Some(PathBuf::from(cwd));
        }

        if let Some(timeout) = get("CWCHAT_REQUEST_TIMEOUT_MS") {
            config.worker.request_timeout_ms = timeout.trim().parse().map_err(|_| {
                CwchatError::config(format!(
                    "CWCHAT_REQUEST_TIMEOUT_MS must be a number of milliseconds: {}",
                    timeout
                ))
            })?;
        }

        if let Some(strict) = get("CWCHAT_STRICT_PARSING") {
            config.router.strict = parse_flag(&strict).ok_or_else(|| {
                CwchatError::config(format!(
                    "CWCHAT_STRICT_PARSING must be true/false: {}",
                    strict
                ))
            })?;
        }

        if let Some(fixtures) = get("CWCHAT_FIXTURES") {
            config.metrics.fixtures = Some(PathBuf::from(fixtures));
        }

        Ok(())
    }

    /// Validate configuration
    pub fn validate(config: &AppConfig) -> Result<()> {
        if config.worker.request_timeout_ms == 0 {
            return Err(CwchatError::config(
                "request_timeout_ms must be greater than 0",
            ));
        }

        if config.worker.max_in_flight == 0 {
            return Err(CwchatError::config("max_in_flight must be at least 1"));
        }

        if let Some(command) = &config.worker.command {
            if command.trim().is_empty() {
                return Err(CwchatError::config("worker command must not be empty"));
            }
        }

        if config.router.default_instance_id.is_empty()
            || config.router.default_namespace.is_empty()
            || config.router.default_metric.is_empty()
        {
            return Err(CwchatError::config("router defaults must not be empty"));
        }

        Ok(())
    }

    /// Load and validate
    pub fn load_and_validate() -> Result<AppConfig> {
        let config = Self::load()?;
        Self::validate(&config)?;
        Ok(config)
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_load_missing_file() {
        let config = ConfigLoader::load();
        assert!(config.is_ok());
    }

    #[test]
    fn test_load_from_path() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");

        std::fs::write(
            &path,
            r#"
            [server]
            port = 4000

            [worker]
            request_timeout_ms = 2500
            env = { AWS_REGION = "ap-northeast-1" }
            "#,
        )
        .unwrap();

        let config = ConfigLoader::load_from_path(&path).unwrap();
        assert_eq!(config.server.port, 4000);
        assert_eq!(config.worker.request_timeout_ms, 2500);
        assert_eq!(
            config.worker.env.get("AWS_REGION").map(String::as_str),
            Some("ap-northeast-1")
        );
    }

    #[test]
    fn test_load_from_missing_path_is_file_read_error() {
        let dir = tempdir().unwrap();
        let result = ConfigLoader::load_from_path(&dir.path().join("absent.toml"));
        assert!(matches!(result, Err(CwchatError::FileRead { .. })));
    }

    #[test]
    fn test_parse_invalid_toml() {
        let result = ConfigLoader::parse("invalid { toml", Path::new("test.toml"));
        assert!(matches!(result, Err(CwchatError::ConfigInvalid { .. })));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = AppConfig::default();
        ConfigLoader::apply_overrides(
            &mut config,
            env(&[
                ("PORT", "8081"),
                ("CWCHAT_BIND", "127.0.0.1"),
                ("CWCHAT_WORKER_CMD", "node mcp-server.js"),
                ("CWCHAT_WORKER_CWD", "/srv/worker"),
                ("CWCHAT_REQUEST_TIMEOUT_MS", "1500"),
                ("CWCHAT_STRICT_PARSING", "true"),
                ("CWCHAT_FIXTURES", "/srv/metrics.json"),
            ]),
        )
        .unwrap();

        assert_eq!(config.server.listen_addr(), "127.0.0.1:8081");
        assert_eq!(config.worker.command.as_deref(), Some("node"));
        assert_eq!(config.worker.args, vec!["mcp-server.js".to_string()]);
        assert_eq!(config.worker.cwd, Some(PathBuf::from("/srv/worker")));
        assert_eq!(config.worker.request_timeout_ms, 1500);
        assert!(config.router.strict);
        assert_eq!(
            config.metrics.fixtures,
            Some(PathBuf::from("/srv/metrics.json"))
        );
    }

    #[test]
    fn test_empty_env_values_are_ignored() {
        let mut config = AppConfig::default();
        ConfigLoader::apply_overrides(&mut config, env(&[("PORT", ""), ("CWCHAT_WORKER_CMD", "  ")]))
            .unwrap();

        assert_eq!(config.server.port, 3000);
        assert!(config.worker.command.is_none());
    }

    #[test]
    fn test_invalid_port_override() {
        let mut config = AppConfig::default();
        let result = ConfigLoader::apply_overrides(&mut config, env(&[("PORT", "http")]));
        assert!(matches!(result, Err(CwchatError::Config(_))));
    }

    #[test]
    fn test_invalid_strict_flag() {
        let mut config = AppConfig::default();
        let result =
            ConfigLoader::apply_overrides(&mut config, env(&[("CWCHAT_STRICT_PARSING", "maybe")]));
        assert!(result.is_err());
    }

    #[test]
    fn test_validate_zero_timeout() {
        let mut config = AppConfig::default();
        config.worker.request_timeout_ms = 0;
        assert!(ConfigLoader::validate(&config).is_err());
    }

    #[test]
    fn test_validate_zero_in_flight() {
        let mut config = AppConfig::default();
        config.worker.max_in_flight = 0;
        assert!(ConfigLoader::validate(&config).is_err());
    }

    #[test]
    fn test_validate_empty_command() {
        let mut config = AppConfig::default();
        config.worker.command = Some(String::new());
        assert!(ConfigLoader::validate(&config).is_err());
    }

    #[test]
    fn test_validate_defaults() {
        assert!(ConfigLoader::validate(&AppConfig::default()).is_ok());
    }
}
