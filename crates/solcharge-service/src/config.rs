//! Server configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use solcharge_store::BackendKind;

/// Server configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Server settings.
    pub server: ServerConfig,
    /// Storage settings.
    pub storage: StorageConfig,
    /// Charge controller settings.
    pub device: DeviceConfig,
}

impl Config {
    /// Load configuration from the default path.
    pub fn load_default() -> Result<Self, ConfigError> {
        let path = default_config_path();
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Read {
            path: path.as_ref().to_path_buf(),
            source: e,
        })?;
        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.as_ref().to_path_buf(),
            source: e,
        })
    }

    /// Save configuration to a file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self).map_err(ConfigError::Serialize)?;

        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Write {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        std::fs::write(path.as_ref(), content).map_err(|e| ConfigError::Write {
            path: path.as_ref().to_path_buf(),
            source: e,
        })
    }

    /// Validate the configuration and return any errors.
    ///
    /// # Example
    ///
    /// ```
    /// use solcharge_service::Config;
    ///
    /// let config = Config::default();
    /// config.validate().expect("Default config should be valid");
    /// ```
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();
        errors.extend(self.server.validate());
        errors.extend(self.storage.validate());
        errors.extend(self.device.validate());

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }

    /// Load and validate configuration from a file.
    pub fn load_validated<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config = Self::load(path)?;
        config.validate()?;
        Ok(config)
    }
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address (e.g., "127.0.0.1:8000").
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8000".to_string(),
        }
    }
}

impl ServerConfig {
    /// Validate server configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.bind.is_empty() {
            errors.push(ValidationError::new(
                "server.bind",
                "bind address cannot be empty",
            ));
            return errors;
        }

        match self.bind.rsplit_once(':') {
            None => errors.push(ValidationError::new(
                "server.bind",
                format!(
                    "invalid bind address '{}': expected format 'host:port'",
                    self.bind
                ),
            )),
            Some((_, port)) => match port.parse::<u16>() {
                Ok(0) => errors.push(ValidationError::new("server.bind", "port cannot be 0")),
                Err(_) => errors.push(ValidationError::new(
                    "server.bind",
                    format!("invalid port '{}': must be a number 1-65535", port),
                )),
                Ok(_) => {}
            },
        }

        errors
    }
}

/// Storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Persistence medium.
    pub backend: BackendKind,
    /// Database file (sqlite) or directory (files).
    pub path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Sqlite,
            path: solcharge_store::default_db_path(),
        }
    }
}

impl StorageConfig {
    /// Validate storage configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.path.as_os_str().is_empty() {
            errors.push(ValidationError::new(
                "storage.path",
                "storage path cannot be empty",
            ));
        }

        errors
    }
}

/// How the service reaches the charge controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    /// The controller's HTTP bridge.
    #[default]
    Http,
    /// In-process mock that acknowledges everything.
    Mock,
}

/// Minimum apply deadline in seconds.
pub const MIN_APPLY_DEADLINE: u64 = 1;
/// Maximum apply deadline in seconds.
pub const MAX_APPLY_DEADLINE: u64 = 300;

/// Charge controller configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Channel type.
    pub kind: DeviceKind,
    /// Base URL of the HTTP bridge.
    pub url: String,
    /// Overall deadline for one apply, in seconds.
    pub apply_deadline_secs: u64,
    /// Timeout for a single parameter group, in seconds.
    pub group_timeout_secs: u64,
    /// Allow applies of different configurations to overlap.
    ///
    /// Only honored when the channel reports that it supports concurrent
    /// access.
    pub concurrent_access: bool,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            kind: DeviceKind::Http,
            url: "http://192.168.4.1".to_string(),
            apply_deadline_secs: 30,
            group_timeout_secs: 10,
            concurrent_access: false,
        }
    }
}

impl DeviceConfig {
    /// Overall apply deadline.
    pub fn apply_deadline(&self) -> Duration {
        Duration::from_secs(self.apply_deadline_secs)
    }

    /// Per-group timeout.
    pub fn group_timeout(&self) -> Duration {
        Duration::from_secs(self.group_timeout_secs)
    }

    /// Validate device configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.kind == DeviceKind::Http {
            if self.url.is_empty() {
                errors.push(ValidationError::new(
                    "device.url",
                    "device URL cannot be empty",
                ));
            } else if !self.url.starts_with("http://") && !self.url.starts_with("https://") {
                errors.push(ValidationError::new(
                    "device.url",
                    format!("device URL '{}' must start with http:// or https://", self.url),
                ));
            }
        }

        if !(MIN_APPLY_DEADLINE..=MAX_APPLY_DEADLINE).contains(&self.apply_deadline_secs) {
            errors.push(ValidationError::new(
                "device.apply_deadline_secs",
                format!(
                    "apply deadline {} is out of range ({}-{} seconds)",
                    self.apply_deadline_secs, MIN_APPLY_DEADLINE, MAX_APPLY_DEADLINE
                ),
            ));
        }

        if self.group_timeout_secs == 0 {
            errors.push(ValidationError::new(
                "device.group_timeout_secs",
                "group timeout cannot be 0",
            ));
        } else if self.group_timeout_secs > self.apply_deadline_secs {
            errors.push(ValidationError::new(
                "device.group_timeout_secs",
                format!(
                    "group timeout {} exceeds apply deadline {}",
                    self.group_timeout_secs, self.apply_deadline_secs
                ),
            ));
        }

        errors
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("Failed to serialize config: {0}")]
    Serialize(toml::ser::Error),
    #[error("Failed to write config file {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Configuration validation failed:\n{}", format_validation_errors(.0))]
    Validation(Vec<ValidationError>),
}

/// A single validation error with context.
#[derive(Debug, Clone)]
pub struct ValidationError {
    /// The field path (e.g., `server.bind` or `device.url`).
    pub field: String,
    /// Description of the validation failure.
    pub message: String,
}

impl ValidationError {
    fn new(field: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

fn format_validation_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| format!("  - {}", e))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("solcharge")
        .join("server.toml")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.server.bind, "127.0.0.1:8000");
        assert_eq!(config.storage.backend, BackendKind::Sqlite);
        assert_eq!(config.device.kind, DeviceKind::Http);
        assert_eq!(config.device.apply_deadline(), Duration::from_secs(30));
        assert_eq!(config.device.group_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn test_default_config_validates() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_config_full_toml() {
        let toml = r#"
            [server]
            bind = "0.0.0.0:8000"

            [storage]
            backend = "files"
            path = "/var/lib/solcharge/configurations"

            [device]
            kind = "mock"
            apply_deadline_secs = 20
            group_timeout_secs = 5
            concurrent_access = true
        "#;

        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.server.bind, "0.0.0.0:8000");
        assert_eq!(config.storage.backend, BackendKind::Files);
        assert_eq!(
            config.storage.path,
            PathBuf::from("/var/lib/solcharge/configurations")
        );
        assert_eq!(config.device.kind, DeviceKind::Mock);
        assert_eq!(config.device.url, "http://192.168.4.1");
        assert!(config.device.concurrent_access);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_save_and_load() {
        let temp_dir = tempfile::tempdir().unwrap();
        let config_path = temp_dir.path().join("server.toml");

        let mut config = Config::default();
        config.server.bind = "0.0.0.0:9090".to_string();
        config.device.url = "http://charger.local".to_string();
        config.save(&config_path).unwrap();

        let loaded = Config::load_validated(&config_path).unwrap();
        assert_eq!(loaded.server.bind, "0.0.0.0:9090");
        assert_eq!(loaded.device.url, "http://charger.local");
    }

    #[test]
    fn test_config_load_errors() {
        let result = Config::load("/nonexistent/path/config.toml");
        assert!(matches!(result, Err(ConfigError::Read { .. })));

        let temp_dir = tempfile::tempdir().unwrap();
        let config_path = temp_dir.path().join("invalid.toml");
        std::fs::write(&config_path, "this is not valid { toml").unwrap();
        assert!(matches!(
            Config::load(&config_path),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn test_server_bind_validation() {
        for ok in ["127.0.0.1:8000", "[::1]:8000", "localhost:1"] {
            let config = ServerConfig {
                bind: ok.to_string(),
            };
            assert!(config.validate().is_empty(), "{} rejected", ok);
        }
        for bad in ["", "localhost", "127.0.0.1:0", "127.0.0.1:http"] {
            let config = ServerConfig {
                bind: bad.to_string(),
            };
            assert_eq!(config.validate().len(), 1, "{} accepted", bad);
        }
    }

    #[test]
    fn test_device_validation() {
        let mut device = DeviceConfig {
            url: "192.168.4.1".to_string(),
            ..DeviceConfig::default()
        };
        assert_eq!(device.validate()[0].field, "device.url");

        device.kind = DeviceKind::Mock;
        assert!(device.validate().is_empty());

        device.apply_deadline_secs = 0;
        device.group_timeout_secs = 0;
        let fields: Vec<_> = device.validate().into_iter().map(|e| e.field).collect();
        assert_eq!(
            fields,
            vec!["device.apply_deadline_secs", "device.group_timeout_secs"]
        );

        device.apply_deadline_secs = 10;
        device.group_timeout_secs = 20;
        assert_eq!(device.validate()[0].field, "device.group_timeout_secs");
    }

    #[test]
    fn test_config_validation_error_display() {
        let mut config = Config::default();
        config.storage.path = PathBuf::new();
        let err = config.validate().unwrap_err();
        let display = err.to_string();
        assert!(display.contains("storage.path"));
        assert!(display.contains("  - "));
    }

    #[test]
    fn test_default_config_path() {
        assert!(default_config_path().ends_with("solcharge/server.toml"));
    }
}
