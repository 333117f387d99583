//! Configuration traits and utilities.

use std::path::Path;

use serde::de::DeserializeOwned;

use crate::LoggingConfig;
use crate::error::{FrameworkError, Result};

/// Trait for collector configuration types.
///
/// Implement this trait for your collector's configuration struct to get
/// automatic loading, validation, and access to common config fields.
///
/// # Example
///
/// ```ignore
/// use serde::Deserialize;
/// use minersight_framework::{CollectorConfig, FrameworkError, LoggingConfig};
///
/// #[derive(Debug, Deserialize)]
/// pub struct MyCollectorConfig {
///     pub logging: LoggingConfig,
///     pub devices: Vec<String>,
/// }
///
/// impl CollectorConfig for MyCollectorConfig {
///     fn logging(&self) -> &LoggingConfig {
///         &self.logging
///     }
///
///     fn validate(&self) -> minersight_framework::Result<()> {
///         if self.devices.is_empty() {
///             return Err(FrameworkError::validation("At least one device required"));
///         }
///         Ok(())
///     }
/// }
/// ```
pub trait CollectorConfig: Sized + DeserializeOwned {
    /// Get the logging configuration.
    fn logging(&self) -> &LoggingConfig;

    /// Validate the configuration.
    ///
    /// Called automatically after loading. Override to add custom validation.
    fn validate(&self) -> Result<()> {
        Ok(())
    }

    /// Load configuration from a file path.
    ///
    /// Supports JSON5 format. Calls [`validate`](Self::validate) after loading.
    fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(FrameworkError::ConfigNotFound {
                path: path.display().to_string(),
            });
        }

        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse configuration from a JSON5 string and validate it.
    fn parse(content: &str) -> Result<Self> {
        let config: Self = json5::from_str(content)?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::io::Write;

    #[derive(Debug, Deserialize)]
    struct TestConfig {
        #[serde(default)]
        logging: LoggingConfig,
        devices: Vec<String>,
    }

    impl CollectorConfig for TestConfig {
        fn logging(&self) -> &LoggingConfig {
            &self.logging
        }

        fn validate(&self) -> Result<()> {
            if self.devices.is_empty() {
                return Err(FrameworkError::validation("no devices"));
            }
            Ok(())
        }
    }

    #[test]
    fn test_config_not_found() {
        let result = TestConfig::load("/nonexistent/path.json5");
        assert!(matches!(result, Err(FrameworkError::ConfigNotFound { .. })));
    }

    #[test]
    fn test_config_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"{{ logging: {{ level: "warn" }}, devices: ["10.0.0.2"], }}"#
        )
        .unwrap();

        let config = TestConfig::load(file.path()).unwrap();
        assert_eq!(config.logging().level, "warn");
        assert_eq!(config.devices, vec!["10.0.0.2"]);
    }

    #[test]
    fn test_config_validation_runs_after_parse() {
        let result = TestConfig::parse("{ devices: [] }");
        assert!(matches!(result, Err(FrameworkError::ConfigValidation(_))));
    }

    #[test]
    fn test_config_parse_error() {
        let result = TestConfig::parse("{ devices: [ }");
        assert!(matches!(result, Err(FrameworkError::ConfigParse(_))));
    }
}
