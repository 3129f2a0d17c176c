use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::ConfigError;

pub const CONFIG_PATH_ENV: &str = "BACKBONE_CONFIG";
pub const LOG_LEVEL_ENV: &str = "BACKBONE_LOG";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub log_level: String,
    pub event_bus_capacity: usize,
    pub service: ServiceConfig,
    pub coordination: CoordinationConfig,
    pub initializer: InitializerConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            event_bus_capacity: 1024,
            service: ServiceConfig::default(),
            coordination: CoordinationConfig::default(),
            initializer: InitializerConfig::default(),
        }
    }
}

impl Config {
    /// Loads from the file named by `BACKBONE_CONFIG` if set, then applies
    /// `BACKBONE_LOG` on top.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = match std::env::var(CONFIG_PATH_ENV) {
            Ok(path) => Self::from_file(path)?,
            Err(_) => Self::default(),
        };

        if let Ok(level) = std::env::var(LOG_LEVEL_ENV) {
            config.log_level = level;
        }

        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        match path.extension().and_then(|ext| ext.to_str()) {
            Some("yaml") | Some("yml") => Self::from_yaml_str(&contents),
            _ => Self::from_toml_str(&contents),
        }
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        toml::from_str(contents).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    pub fn from_yaml_str(contents: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(contents).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.event_bus_capacity == 0 {
            return Err(ConfigError::invalid(
                "event_bus_capacity",
                "must be greater than zero",
            ));
        }
        self.service.validate()?;
        self.coordination.validate()?;
        self.initializer.validate()?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    #[serde(with = "humantime_serde")]
    pub startup_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,
    /// Zero disables health checking.
    #[serde(with = "humantime_serde")]
    pub health_check_interval: Duration,
    pub max_restart_attempts: u32,
    #[serde(with = "humantime_serde")]
    pub restart_delay: Duration,
    pub enable_auto_restart: bool,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            startup_timeout: Duration::from_secs(30),
            shutdown_timeout: Duration::from_secs(30),
            health_check_interval: Duration::from_secs(30),
            max_restart_attempts: 3,
            restart_delay: Duration::from_secs(1),
            enable_auto_restart: true,
        }
    }
}

impl ServiceConfig {
    pub fn health_checks_enabled(&self) -> bool {
        !self.health_check_interval.is_zero()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.startup_timeout.is_zero() {
            return Err(ConfigError::invalid(
                "service.startup_timeout",
                "must be greater than zero",
            ));
        }
        if self.shutdown_timeout.is_zero() {
            return Err(ConfigError::invalid(
                "service.shutdown_timeout",
                "must be greater than zero",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinationConfig {
    pub max_retries: u32,
    #[serde(with = "humantime_serde")]
    pub retry_delay: Duration,
    pub deadlock_detection: bool,
    #[serde(with = "humantime_serde")]
    pub resource_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub message_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub maintenance_interval: Duration,
}

impl Default for CoordinationConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay: Duration::from_secs(1),
            deadlock_detection: true,
            resource_timeout: Duration::from_secs(30),
            message_timeout: Duration::from_secs(30),
            maintenance_interval: Duration::from_secs(60),
        }
    }
}

impl CoordinationConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("coordination.retry_delay", self.retry_delay),
            ("coordination.resource_timeout", self.resource_timeout),
            ("coordination.message_timeout", self.message_timeout),
            ("coordination.maintenance_interval", self.maintenance_interval),
        ];

        for (field, value) in positive {
            if value.is_zero() {
                return Err(ConfigError::invalid(field, "must be greater than zero"));
            }
        }

        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    #[serde(with = "humantime_serde")]
    pub reset_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            reset_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InitializerConfig {
    #[serde(with = "humantime_serde")]
    pub base_retry_delay: Duration,
    pub required_attempts: u32,
    pub optional_attempts: u32,
    pub critical_components: Vec<String>,
    pub circuit_breaker: CircuitBreakerConfig,
}

impl Default for InitializerConfig {
    fn default() -> Self {
        Self {
            base_retry_delay: Duration::from_secs(1),
            required_attempts: 3,
            optional_attempts: 2,
            critical_components: vec![
                "logging".to_string(),
                "config".to_string(),
                "event_bus".to_string(),
            ],
            circuit_breaker: CircuitBreakerConfig::default(),
        }
    }
}

impl InitializerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.required_attempts == 0 {
            return Err(ConfigError::invalid(
                "initializer.required_attempts",
                "must be at least 1",
            ));
        }
        if self.optional_attempts == 0 {
            return Err(ConfigError::invalid(
                "initializer.optional_attempts",
                "must be at least 1",
            ));
        }
        if self.circuit_breaker.failure_threshold == 0 {
            return Err(ConfigError::invalid(
                "initializer.circuit_breaker.failure_threshold",
                "must be at least 1",
            ));
        }
        Ok(())
    }

    /// Total attempts, first try included. The defaults give required
    /// components two retries and optional components one.
    pub fn attempts_for(&self, required: bool) -> u32 {
        if required {
            self.required_attempts
        } else {
            self.optional_attempts
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.initializer.critical_components.len(), 3);
    }

    #[test]
    fn test_zero_retry_delay_rejected() {
        let mut config = Config::default();
        config.coordination.retry_delay = Duration::ZERO;

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("coordination.retry_delay"));
    }

    #[test]
    fn test_zero_resource_timeout_rejected() {
        let config = CoordinationConfig {
            resource_timeout: Duration::ZERO,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_toml_with_human_durations() {
        let config = Config::from_toml_str(
            r#"
            log_level = "debug"

            [service]
            startup_timeout = "5s"
            health_check_interval = "0s"
            max_restart_attempts = 5

            [coordination]
            resource_timeout = "250ms"
            deadlock_detection = false
            "#,
        )
        .unwrap();

        assert_eq!(config.log_level, "debug");
        assert_eq!(config.service.startup_timeout, Duration::from_secs(5));
        assert!(!config.service.health_checks_enabled());
        assert_eq!(config.service.max_restart_attempts, 5);
        assert_eq!(
            config.coordination.resource_timeout,
            Duration::from_millis(250)
        );
        assert!(!config.coordination.deadlock_detection);
        assert_eq!(config.coordination.max_retries, 3);
    }

    #[test]
    fn test_negative_retries_fail_to_parse() {
        let result = Config::from_toml_str("[coordination]\nmax_retries = -1\n");
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_from_file_yaml() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(file, "event_bus_capacity: 64\ncoordination:\n  message_timeout: 2s").unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.event_bus_capacity, 64);
        assert_eq!(config.coordination.message_timeout, Duration::from_secs(2));
    }

    #[test]
    fn test_from_file_missing() {
        let result = Config::from_file("/definitely/not/here.toml");
        assert!(matches!(result, Err(ConfigError::Io { .. })));
    }
}
