//! Application configuration.
//!
//! Aggregates configuration into a single Config struct that can be loaded
//! from YAML files or environment variables.

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "fluxbus.yaml";
/// Environment variable for configuration file path.
pub const CONFIG_ENV_VAR: &str = "FLUXBUS_CONFIG";
/// Prefix for configuration environment variables.
pub const CONFIG_ENV_PREFIX: &str = "FLUXBUS";
/// Environment variable for logging configuration.
pub const LOG_ENV_VAR: &str = "FLUXBUS_LOG";

use serde::Deserialize;

pub use crate::bus::{AmqpBusConfig, MessagingConfig, MessagingType};

/// Main application configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Messaging configuration.
    pub messaging: MessagingConfig,
}

impl Config {
    /// Load configuration from file and environment.
    ///
    /// Configuration sources (in order of priority, later overrides earlier):
    /// 1. `fluxbus.yaml` in current directory (if exists)
    /// 2. File specified by `path` argument (if provided)
    /// 3. File specified by `CONFIG_ENV_VAR` environment variable (if set)
    /// 4. Environment variables with `CONFIG_ENV_PREFIX` prefix, `__` separated
    ///    (e.g. `FLUXBUS__MESSAGING__AMQP__URL`)
    pub fn load(path: Option<&str>) -> Result<Self, Box<dyn std::error::Error>> {
        use ::config::{Config as ConfigLib, Environment, File, FileFormat};

        let mut builder = ConfigLib::builder()
            .add_source(File::new(DEFAULT_CONFIG_FILE, FileFormat::Yaml).required(false));

        if let Some(config_path) = path {
            builder = builder.add_source(File::new(config_path, FileFormat::Yaml).required(true));
        }

        if let Ok(config_path) = std::env::var(CONFIG_ENV_VAR) {
            builder = builder.add_source(File::new(&config_path, FileFormat::Yaml).required(true));
        }

        let config = builder
            .add_source(
                Environment::with_prefix(CONFIG_ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = config.try_deserialize()?;
        Ok(config)
    }

    /// Create config for testing (in-process transport).
    pub fn for_test() -> Self {
        Self {
            messaging: MessagingConfig::channel(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.messaging.messaging_type, MessagingType::Amqp);
        assert_eq!(config.messaging.prefix, "channels");
    }

    #[test]
    fn test_config_for_test() {
        let config = Config::for_test();
        assert_eq!(config.messaging.messaging_type, MessagingType::Channel);
    }

    #[test]
    #[serial]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            "messaging:\n  type: channel\n  prefix: things\n  operation_timeout_ms: 250\n  amqp:\n    url: amqp://rabbit:5672\n"
        )
        .unwrap();

        let config = Config::load(file.path().to_str()).unwrap();
        assert_eq!(config.messaging.messaging_type, MessagingType::Channel);
        assert_eq!(config.messaging.prefix, "things");
        assert_eq!(config.messaging.operation_timeout_ms, 250);
        assert_eq!(config.messaging.amqp.url, "amqp://rabbit:5672");
        // Unset fields keep their defaults
        assert_eq!(config.messaging.amqp.exchange, "messages");
    }

    #[test]
    #[serial]
    fn test_env_overrides_file() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(file, "messaging:\n  prefix: things\n").unwrap();

        std::env::set_var("FLUXBUS__MESSAGING__PREFIX", "devices");
        let config = Config::load(file.path().to_str());
        std::env::remove_var("FLUXBUS__MESSAGING__PREFIX");

        assert_eq!(config.unwrap().messaging.prefix, "devices");
    }

    #[test]
    #[serial]
    fn test_load_missing_explicit_file_fails() {
        assert!(Config::load(Some("/nonexistent/fluxbus.yaml")).is_err());
    }
}
