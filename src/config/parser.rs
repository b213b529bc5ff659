//! Configuration parser for loading and merging configuration files.
//!
//! This module handles loading configuration from YAML files and environment
//! variables, with proper precedence and error handling.

use crate::error::{ConfigError, KeelError, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::spec::DeployConfig;

/// Environment variable holding the Kubernetes bearer token.
pub const TOKEN_ENV_VAR: &str = "KEEL_KUBE_TOKEN";

/// Configuration parser for loading deployment configuration.
#[derive(Debug, Default)]
pub struct ConfigParser {
    /// Base path for resolving relative paths.
    base_path: Option<PathBuf>,
}

impl ConfigParser {
    /// Creates a new configuration parser.
    #[must_use]
    pub const fn new() -> Self {
        Self { base_path: None }
    }

    /// Sets the base path for resolving relative paths.
    #[must_use]
    pub fn with_base_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.base_path = Some(path.into());
        self
    }

    /// Loads configuration from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<DeployConfig> {
        let path = path.as_ref();
        info!("Loading configuration from: {}", path.display());

        if !path.exists() {
            return Err(KeelError::Config(ConfigError::FileNotFound {
                path: path.to_path_buf(),
            }));
        }

        let content = std::fs::read_to_string(path).map_err(|e| {
            KeelError::Config(ConfigError::ParseError {
                message: format!("Failed to read file: {e}"),
                location: Some(path.display().to_string()),
            })
        })?;

        self.parse_yaml(&content, Some(path))
    }

    /// Parses configuration from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML is invalid.
    pub fn parse_yaml(&self, content: &str, source: Option<&Path>) -> Result<DeployConfig> {
        debug!("Parsing YAML configuration");

        let config: DeployConfig = serde_yaml::from_str(content).map_err(|e| {
            let location = e
                .location()
                .map(|l| format!("line {}, column {}", l.line(), l.column()))
                .or_else(|| source.map(|p| p.display().to_string()));
            KeelError::Config(ConfigError::ParseError {
                message: format!("YAML parse error: {e}"),
                location,
            })
        })?;

        debug!(
            "Parsed configuration for project {} with {} resources",
            config.project.name,
            config.resources.len()
        );
        Ok(config)
    }

    /// Loads configuration with environment variable overrides.
    ///
    /// Environment variables are checked in the format
    /// `KEEL_<SECTION>_<KEY>` (e.g., `KEEL_PROJECT_NAME`).
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_with_env(&self, path: impl AsRef<Path>) -> Result<DeployConfig> {
        let mut config = self.load_file(path)?;
        Self::apply_overrides(&mut config, |key| std::env::var(key).ok());
        Ok(config)
    }

    /// Applies overrides looked up through `lookup`.
    pub(crate) fn apply_overrides(
        config: &mut DeployConfig,
        lookup: impl Fn(&str) -> Option<String>,
    ) {
        if let Some(name) = lookup("KEEL_PROJECT_NAME") {
            debug!("Overriding project.name from environment");
            config.project.name = name;
        }

        if let Some(env) = lookup("KEEL_PROJECT_ENVIRONMENT") {
            debug!("Overriding project.environment from environment");
            config.project.environment = env;
        }

        if let Some(namespace) = lookup("KEEL_PROJECT_NAMESPACE") {
            debug!("Overriding project.namespace from environment");
            config.project.namespace = namespace;
        }

        if let Some(bucket) = lookup("KEEL_STATE_BUCKET") {
            debug!("Overriding state.bucket from environment");
            config.state.bucket = Some(bucket);
        }

        if let Some(prefix) = lookup("KEEL_STATE_PREFIX") {
            debug!("Overriding state.prefix from environment");
            config.state.prefix = Some(prefix);
        }

        if let Some(server) = lookup("KEEL_KUBE_API_SERVER") {
            debug!("Overriding provider.api_server from environment");
            config.provider.api_server = Some(server);
        }
    }

    /// Loads the .env file if present.
    ///
    /// # Errors
    ///
    /// Returns an error if the .env file exists but cannot be loaded.
    pub fn load_dotenv(&self) -> Result<()> {
        let env_path = self
            .base_path
            .as_ref()
            .map_or_else(|| PathBuf::from(".env"), |p| p.join(".env"));

        if env_path.exists() {
            info!("Loading environment from: {}", env_path.display());
            dotenvy::from_path(&env_path).map_err(|e| {
                KeelError::Config(ConfigError::ParseError {
                    message: format!("Failed to load .env file: {e}"),
                    location: Some(env_path.display().to_string()),
                })
            })?;
        } else {
            debug!(".env file not found at: {}", env_path.display());
        }

        Ok(())
    }

    /// Gets the Kubernetes bearer token from environment (optional).
    #[must_use]
    pub fn kube_token() -> Option<String> {
        std::env::var(TOKEN_ENV_VAR).ok().filter(|t| !t.is_empty())
    }

    /// Gets the Kubernetes bearer token, failing if it is not set.
    ///
    /// # Errors
    ///
    /// Returns an error if the token is not set.
    pub fn require_kube_token() -> Result<String> {
        Self::kube_token().ok_or_else(|| {
            KeelError::Config(ConfigError::MissingEnvVar {
                name: String::from(TOKEN_ENV_VAR),
            })
        })
    }
}

/// Default configuration file names to search for.
pub const DEFAULT_CONFIG_FILES: &[&str] = &[
    "keel.deploy.yaml",
    "keel.deploy.yml",
    "deploy.yaml",
    "deploy.yml",
];

/// Finds the configuration file in the current directory or parent directories.
///
/// # Errors
///
/// Returns an error if no configuration file is found.
pub fn find_config_file(start_dir: impl AsRef<Path>) -> Result<PathBuf> {
    let start = start_dir.as_ref();
    let mut current = start.to_path_buf();

    loop {
        for filename in DEFAULT_CONFIG_FILES {
            let config_path = current.join(filename);
            if config_path.exists() {
                info!("Found configuration file: {}", config_path.display());
                return Ok(config_path);
            }
        }

        if !current.pop() {
            break;
        }
    }

    Err(KeelError::Config(ConfigError::FileNotFound {
        path: start.join(DEFAULT_CONFIG_FILES[0]),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ProviderBackend, ResourceConfig, StateBackend};
    use std::collections::HashMap;

    #[test]
    fn test_parse_minimal_config() {
        let yaml = r"
project:
  name: test-project
";
        let config = ConfigParser::new().parse_yaml(yaml, None).unwrap();
        assert_eq!(config.project.name, "test-project");
        assert_eq!(config.project.environment, "dev");
        assert_eq!(config.project.namespace, "default");
        assert_eq!(config.state.backend, StateBackend::Local);
        assert_eq!(config.provider.backend, ProviderBackend::Kubernetes);
        assert_eq!(config.execution.max_parallel, 4);
        assert_eq!(config.execution.retry.max_attempts, 5);
        assert!(config.resources.is_empty());
    }

    #[test]
    fn test_parse_bundled_template() {
        let config = ConfigParser::new()
            .parse_yaml(include_str!("../../templates/keel.deploy.yaml"), None)
            .unwrap();
        assert_eq!(config.resources.len(), 9);
        assert!(config.resources.iter().any(|r| matches!(r, ResourceConfig::Service(s) if s.name == "vote")));
    }

    #[test]
    fn test_parse_error_has_location() {
        let err = ConfigParser::new()
            .parse_yaml("project:\n  name: [unterminated", None)
            .unwrap_err();
        assert!(matches!(
            err,
            KeelError::Config(ConfigError::ParseError { location: Some(_), .. })
        ));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = ConfigParser::new()
            .parse_yaml("project:\n  name: voting\n", None)
            .unwrap();
        let vars = HashMap::from([
            ("KEEL_PROJECT_ENVIRONMENT", "prod"),
            ("KEEL_PROJECT_NAMESPACE", "vote"),
            ("KEEL_KUBE_API_SERVER", "https://k8s.local:6443"),
        ]);

        ConfigParser::apply_overrides(&mut config, |key| vars.get(key).map(ToString::to_string));

        assert_eq!(config.project.name, "voting");
        assert_eq!(config.project.environment, "prod");
        assert_eq!(config.project.namespace, "vote");
        assert_eq!(
            config.provider.api_server.as_deref(),
            Some("https://k8s.local:6443")
        );
    }

    #[test]
    fn test_find_config_file_walks_parents() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("keel.deploy.yaml"), "project:\n  name: x\n").unwrap();
        let nested = dir.path().join("a").join("b");
        std::fs::create_dir_all(&nested).unwrap();

        let found = find_config_file(&nested).unwrap();
        assert_eq!(found, dir.path().join("keel.deploy.yaml"));
    }
}
