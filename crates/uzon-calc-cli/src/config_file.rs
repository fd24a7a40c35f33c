use std::{fs, io, path::Path};

use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct Config {
    #[serde(flatten)]
    pub uzon_calc: uzon_calc::Config,
}

/// Error type for configuration loading operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// I/O error when reading the file.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    /// TOML parsing error.
    #[error("TOML parsing error: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Loads and deserializes the configuration from a TOML file.
///
/// # Arguments
///
/// * `path` - The path to the TOML configuration file.
///
/// # Returns
///
/// Returns `Ok(Config)` on success, or `Err(ConfigError)` if the file
/// cannot be read or parsed.
pub fn load_config_file(path: &Path) -> Result<Config, ConfigError> {
    let content = fs::read_to_string(path)?;
    let config = parse_config(&content)?;
    Ok(config)
}

#[inline]
fn parse_config(s: &str) -> Result<Config, ConfigError> {
    let config: Config = toml::from_str(s)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_config() {
        let toml_content = r#"
execution-timeout-secs = 60
idle-ttl-secs = 120
enable-substitution = false

[aliases]
speed_car = "speed_汽车"
        "#;
        let config = parse_config(toml_content).unwrap().uzon_calc;
        assert_eq!(config.execution_timeout_secs, 60);
        assert_eq!(config.idle_ttl_secs, 120);
        assert!(!config.enable_substitution);
        assert!(config.enable_fstring_equation);
        assert_eq!(config.aliases.get("speed_car").unwrap(), "speed_汽车");
    }

    #[test]
    fn test_invalid_config() {
        let invalid_toml = "invalid_toml";
        let result = parse_config(invalid_toml);
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_partial_config() {
        let toml_content = r#"
suppress-private-assignments = false
        "#;
        let config = parse_config(toml_content).unwrap().uzon_calc;
        assert!(!config.suppress_private_assignments);
        assert_eq!(config.execution_timeout_secs, 300);
        assert!(config.aliases.is_empty());
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let result = load_config_file(&dir.path().join("uzoncalc.toml"));
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }
}
