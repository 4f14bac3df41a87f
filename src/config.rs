//! Configuration types for Tapedeck

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::cassette::CassetteOptions;
use crate::{Result, TapedeckError};

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory cassette storage collaborators read from and write to
    pub cassette_library_dir: Option<PathBuf>,
    /// Permit live requests while no cassette is inserted
    pub allow_http_connections_when_no_cassette: bool,
    /// Hosts whose requests bypass cassettes
    pub ignore_hosts: Vec<String>,
    /// Let requests to localhost aliases bypass cassettes
    pub ignore_localhost: bool,
    /// Options used when a cassette is inserted without explicit ones
    pub default_cassette_options: CassetteOptions,
    /// Secrets scrubbed from recordings
    pub filter_sensitive_data: Vec<SensitiveDataFilter>,
}

/// A secret replaced by a placeholder in recordings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SensitiveDataFilter {
    /// Text written to cassettes in place of the secret
    pub placeholder: String,
    /// Literal secret value
    #[serde(default)]
    pub secret: Option<String>,
    /// Environment variable holding the secret
    #[serde(default)]
    pub secret_env: Option<String>,
    /// Only apply to cassettes with this tag
    #[serde(default)]
    pub tag: Option<String>,
}

impl SensitiveDataFilter {
    /// The secret value, read from the environment if configured that way
    ///
    /// # Errors
    ///
    /// Returns error if neither or both sources are set, or the variable is unset
    pub fn resolve_secret(&self) -> Result<String> {
        match (&self.secret, &self.secret_env) {
            (Some(secret), None) => Ok(secret.clone()),
            (None, Some(var)) => std::env::var(var).map_err(|e| {
                TapedeckError::ConfigError(format!(
                    "Secret for placeholder {:?}: cannot read ${var}: {e}",
                    self.placeholder
                ))
            }),
            (Some(_), Some(_)) => Err(TapedeckError::ConfigError(format!(
                "Secret for placeholder {:?}: set either secret or secret_env, not both",
                self.placeholder
            ))),
            (None, None) => Err(TapedeckError::ConfigError(format!(
                "Secret for placeholder {:?}: secret or secret_env is required",
                self.placeholder
            ))),
        }
    }
}

impl Config {
    /// Load configuration from TOML file
    ///
    /// # Errors
    ///
    /// Returns error if file cannot be read or parsed
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| TapedeckError::ConfigError(format!("Failed to read config file: {e}")))?;

        Self::parse(&content)
    }

    /// Parse and validate configuration from TOML text
    ///
    /// # Errors
    ///
    /// Returns error if the text is not valid configuration
    pub fn parse(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| TapedeckError::ConfigError(format!("Failed to parse config: {e}")))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    ///
    /// Creates the cassette library directory if it does not exist yet.
    ///
    /// # Errors
    ///
    /// Returns error if configuration is invalid, or `Io` if the cassette
    /// library directory cannot be created
    pub fn validate(&self) -> Result<()> {
        if let Some(dir) = &self.cassette_library_dir {
            if !dir.exists() {
                std::fs::create_dir_all(dir)?;
            }
        }

        if self.default_cassette_options.match_requests_on.is_empty() {
            return Err(TapedeckError::ConfigError(
                "default_cassette_options.match_requests_on cannot be empty".to_string(),
            ));
        }

        for (i, host) in self.ignore_hosts.iter().enumerate() {
            if host.trim().is_empty() {
                return Err(TapedeckError::ConfigError(format!(
                    "ignore_hosts[{i}]: host cannot be empty"
                )));
            }
        }

        for (i, filter) in self.filter_sensitive_data.iter().enumerate() {
            if filter.placeholder.is_empty() {
                return Err(TapedeckError::ConfigError(format!(
                    "filter_sensitive_data[{i}]: placeholder cannot be empty"
                )));
            }
            filter.resolve_secret()?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cassette::RecordMode;
    use std::io::Write;
    use tempfile::{NamedTempFile, TempDir};

    #[test]
    fn test_config_defaults() {
        let config: Config = toml::from_str("").unwrap();

        assert_eq!(config.default_cassette_options.record, RecordMode::Once);
        assert_eq!(
            config.default_cassette_options.match_requests_on,
            vec!["method", "uri"]
        );
        assert!(!config.allow_http_connections_when_no_cassette);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_record_default_kept_when_other_options_set() {
        let config: Config = toml::from_str(
            r#"
            [default_cassette_options]
            tag = "api"
        "#,
        )
        .unwrap();

        assert_eq!(config.default_cassette_options.record, RecordMode::Once);
        assert_eq!(config.default_cassette_options.tag.as_deref(), Some("api"));
    }

    #[test]
    fn test_config_parse() {
        let config = Config::parse(
            r#"
            allow_http_connections_when_no_cassette = true
            ignore_hosts = ["example.com", "example.net"]
            ignore_localhost = true

            [default_cassette_options]
            record = "new_episodes"
            match_requests_on = ["method", "host", "path"]

            [[filter_sensitive_data]]
            placeholder = "<API_KEY>"
            secret = "abc123"
            tag = "billing"
        "#,
        )
        .unwrap();

        assert!(config.allow_http_connections_when_no_cassette);
        assert_eq!(config.ignore_hosts, vec!["example.com", "example.net"]);
        assert_eq!(config.default_cassette_options.record, RecordMode::NewEpisodes);
        assert_eq!(config.default_cassette_options.match_requests_on.len(), 3);
        assert_eq!(config.filter_sensitive_data[0].resolve_secret().unwrap(), "abc123");
    }

    #[test]
    fn test_config_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        let config_toml = r#"
            [default_cassette_options]
            record = "none"
        "#;
        file.write_all(config_toml.as_bytes()).unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.default_cassette_options.record, RecordMode::None);
    }

    #[test]
    fn test_creates_cassette_library_dir() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path().join("cassettes/new_dir");
        let config = Config {
            cassette_library_dir: Some(dir.clone()),
            ..Config::default()
        };

        assert!(!dir.exists());
        config.validate().unwrap();
        assert!(dir.exists());
    }

    #[test]
    fn test_uncreatable_cassette_library_dir() {
        let file = NamedTempFile::new().unwrap();
        let config = Config {
            cassette_library_dir: Some(file.path().join("cassettes")),
            ..Config::default()
        };

        assert!(matches!(config.validate(), Err(TapedeckError::Io(_))));
    }

    #[test]
    fn test_invalid_record_mode() {
        let result = Config::parse(
            r#"
            [default_cassette_options]
            record = "sometimes"
        "#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_invalid_filters() {
        let missing_secret = Config::parse(
            r#"
            [[filter_sensitive_data]]
            placeholder = "<X>"
        "#,
        );
        assert!(missing_secret.is_err());

        let empty_placeholder = Config::parse(
            r#"
            [[filter_sensitive_data]]
            placeholder = ""
            secret = "x"
        "#,
        );
        assert!(empty_placeholder.is_err());

        let unset_env = Config::parse(
            r#"
            [[filter_sensitive_data]]
            placeholder = "<X>"
            secret_env = "TAPEDECK_TEST_SURELY_UNSET_VARIABLE"
        "#,
        );
        assert!(unset_env.is_err());
    }

    #[test]
    fn test_empty_match_requests_on_rejected() {
        let result = Config::parse(
            r#"
            [default_cassette_options]
            match_requests_on = []
        "#,
        );
        assert!(result.is_err());
    }
}
