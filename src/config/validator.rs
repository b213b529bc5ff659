//! Configuration validation for deployment specs.
//!
//! This module checks the settings around the resources (project, state,
//! provider, execution) and the cross-resource rules a single spec schema
//! cannot express. Identity and dependency checks belong to the graph
//! builder.

use crate::error::{ConfigError, KeelError, Result};
use std::collections::{BTreeMap, HashSet};
use tracing::debug;

use super::spec::{
    DeployConfig, DeploymentSpec, ExecutionConfig, ProjectConfig, ProviderBackend, ProviderConfig,
    ResourceConfig, ServiceSpec, ServiceType, StateBackend, StateConfig,
};

/// Validator for deployment configurations.
#[derive(Debug, Default)]
pub struct ConfigValidator;

/// Validation result containing all errors found.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// List of validation errors.
    pub errors: Vec<ValidationError>,
    /// List of warnings (non-fatal issues).
    pub warnings: Vec<String>,
}

/// A single validation error.
#[derive(Debug)]
pub struct ValidationError {
    /// The field path that failed validation.
    pub field: String,
    /// The error message.
    pub message: String,
}

impl ConfigValidator {
    /// Creates a new validator.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Validates a deployment configuration.
    ///
    /// # Errors
    ///
    /// Returns the first error if validation fails.
    pub fn validate(&self, config: &DeployConfig) -> Result<ValidationResult> {
        let result = self.check(config);

        match result.errors.first() {
            None => {
                debug!(
                    "Configuration validation passed with {} warnings",
                    result.warnings.len()
                );
                Ok(result)
            }
            Some(first) => Err(KeelError::Config(ConfigError::ValidationError {
                message: first.message.clone(),
                field: Some(first.field.clone()),
            })),
        }
    }

    /// Runs every check and collects all errors and warnings.
    #[must_use]
    pub fn check(&self, config: &DeployConfig) -> ValidationResult {
        let mut result = ValidationResult::default();

        Self::validate_project(&config.project, &mut result);
        Self::validate_state(&config.state, &mut result);
        Self::validate_provider(&config.provider, &mut result);
        Self::validate_execution(&config.execution, &mut result);
        Self::validate_resources(&config.resources, &mut result);

        result
    }

    fn validate_project(project: &ProjectConfig, result: &mut ValidationResult) {
        if project.name.is_empty() {
            result.error("project.name", "Project name cannot be empty");
        } else if !is_valid_name(&project.name) {
            result.error(
                "project.name",
                format!(
                    "Project name '{}' is invalid. Must be lowercase alphanumeric with hyphens.",
                    project.name
                ),
            );
        }

        if project.environment.is_empty() {
            result.error("project.environment", "Environment cannot be empty");
        }

        if !is_valid_name(&project.namespace) {
            result.error(
                "project.namespace",
                format!("Namespace '{}' is not a valid DNS label", project.namespace),
            );
        }
    }

    fn validate_state(state: &StateConfig, result: &mut ValidationResult) {
        match state.backend {
            StateBackend::S3 => {
                if state.bucket.as_ref().is_none_or(String::is_empty) {
                    result.error(
                        "state.bucket",
                        "S3 bucket name is required when using S3 backend",
                    );
                }
            }
            StateBackend::Local => {}
        }
    }

    fn validate_provider(provider: &ProviderConfig, result: &mut ValidationResult) {
        if provider.backend == ProviderBackend::Kubernetes {
            match provider.api_server.as_deref() {
                None | Some("") => result.error(
                    "provider.api_server",
                    "API server URL is required for the kubernetes backend",
                ),
                Some(url) if !url.starts_with("http://") && !url.starts_with("https://") => {
                    result.error(
                        "provider.api_server",
                        format!("API server URL must start with http:// or https://: {url}"),
                    );
                }
                Some(url) if url.starts_with("http://") => result.warnings.push(format!(
                    "provider.api_server: {url} is not using TLS"
                )),
                Some(_) => {}
            }
        }

        if provider.timeout_secs == 0 {
            result.error("provider.timeout_secs", "Timeout must be at least 1 second");
        }
    }

    fn validate_execution(execution: &ExecutionConfig, result: &mut ValidationResult) {
        if execution.max_parallel == 0 {
            result.error("execution.max_parallel", "max_parallel must be at least 1");
        }

        let retry = &execution.retry;
        if retry.max_attempts == 0 {
            result.error(
                "execution.retry.max_attempts",
                "max_attempts must be at least 1",
            );
        }
        if retry.initial_backoff_ms > retry.max_backoff_ms {
            result.error(
                "execution.retry.initial_backoff_ms",
                format!(
                    "initial_backoff_ms ({}) exceeds max_backoff_ms ({})",
                    retry.initial_backoff_ms, retry.max_backoff_ms
                ),
            );
        }
    }

    fn validate_resources(resources: &[ResourceConfig], result: &mut ValidationResult) {
        if resources.is_empty() {
            result
                .warnings
                .push(String::from("No resources defined in configuration"));
            return;
        }

        let mut node_ports: HashSet<u16> = HashSet::new();
        let deployment_labels: Vec<&BTreeMap<String, String>> = resources
            .iter()
            .filter_map(|r| match r {
                ResourceConfig::Deployment(d) => Some(&d.spec.labels),
                ResourceConfig::Service(_) => None,
            })
            .collect();

        for (i, resource) in resources.iter().enumerate() {
            let prefix = format!("resources[{i}]");

            if !is_valid_name(resource.name()) {
                result.error(
                    format!("{prefix}.name"),
                    format!(
                        "Resource name '{}' is invalid. Must be lowercase alphanumeric with hyphens.",
                        resource.name()
                    ),
                );
            }

            match resource {
                ResourceConfig::Deployment(d) => {
                    Self::validate_deployment(&d.spec, &prefix, result);
                }
                ResourceConfig::Service(s) => {
                    Self::validate_service(&s.spec, &prefix, &mut node_ports, result);
                    if !s.spec.selector.is_empty()
                        && !deployment_labels
                            .iter()
                            .any(|labels| selects(&s.spec.selector, labels))
                    {
                        result.warnings.push(format!(
                            "{prefix}.spec.selector: Service '{}' selects no declared deployment",
                            s.name
                        ));
                    }
                }
            }
        }
    }

    fn validate_deployment(spec: &DeploymentSpec, prefix: &str, result: &mut ValidationResult) {
        let mut seen_ports = HashSet::new();
        for (i, port) in spec.ports.iter().enumerate() {
            if !seen_ports.insert(port.container_port) {
                result.error(
                    format!("{prefix}.spec.ports[{i}]"),
                    format!("Duplicate container port {}", port.container_port),
                );
            }
        }

        let mut seen_mounts = HashSet::new();
        for (i, volume) in spec.volumes.iter().enumerate() {
            if !volume.mount_path.starts_with('/') {
                result.error(
                    format!("{prefix}.spec.volumes[{i}].mount_path"),
                    format!("Mount path must be absolute: {}", volume.mount_path),
                );
            }
            if !seen_mounts.insert(&volume.mount_path) {
                result.error(
                    format!("{prefix}.spec.volumes[{i}].mount_path"),
                    format!("Duplicate mount path: {}", volume.mount_path),
                );
            }
        }

        if spec.image.ends_with(":latest") || !image_has_tag(&spec.image) {
            result.warnings.push(format!(
                "{prefix}.spec.image: '{}' does not pin a version, which is not recommended for production",
                spec.image
            ));
        }

        if spec.labels.is_empty() {
            result.warnings.push(format!(
                "{prefix}.spec.labels: No labels, no service can select this deployment"
            ));
        }
    }

    fn validate_service(
        spec: &ServiceSpec,
        prefix: &str,
        node_ports: &mut HashSet<u16>,
        result: &mut ValidationResult,
    ) {
        if spec.selector.is_empty() {
            result.warnings.push(format!(
                "{prefix}.spec.selector: Empty selector, the service routes to nothing"
            ));
        }

        for (i, port) in spec.ports.iter().enumerate() {
            if let Some(node_port) = port.node_port
                && spec.service_type != ServiceType::ClusterIP
                && !node_ports.insert(node_port)
            {
                result.error(
                    format!("{prefix}.spec.ports[{i}].node_port"),
                    format!("Node port {node_port} is already used by another service"),
                );
            }
        }
    }
}

impl ValidationResult {
    fn error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ValidationError {
            field: field.into(),
            message: message.into(),
        });
    }

    /// Returns true if validation passed (no errors).
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Returns the number of errors.
    #[must_use]
    pub const fn error_count(&self) -> usize {
        self.errors.len()
    }

    /// Returns the number of warnings.
    #[must_use]
    pub const fn warning_count(&self) -> usize {
        self.warnings.len()
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Validates that a name follows the naming convention.
/// Names must be lowercase alphanumeric with hyphens, starting with a letter.
fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();

    let Some(first) = chars.next() else {
        return false;
    };
    if !first.is_ascii_lowercase() {
        return false;
    }

    if !chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-') {
        return false;
    }

    name.len() <= 63 && !name.ends_with('-') && !name.contains("--")
}

/// True when the last path segment of the image carries a tag or digest.
fn image_has_tag(image: &str) -> bool {
    let last = image.rsplit('/').next().unwrap_or(image);
    last.contains(':') || last.contains('@')
}

fn selects(selector: &BTreeMap<String, String>, labels: &BTreeMap<String, String>) -> bool {
    selector.iter().all(|(k, v)| labels.get(k) == Some(v))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigParser;

    fn parse(yaml: &str) -> DeployConfig {
        ConfigParser::new().parse_yaml(yaml, None).unwrap()
    }

    #[test]
    fn test_valid_name() {
        assert!(is_valid_name("vote"));
        assert!(is_valid_name("result-db-2"));
        assert!(is_valid_name("a"));
    }

    #[test]
    fn test_invalid_name() {
        assert!(!is_valid_name(""));
        assert!(!is_valid_name("Vote")); // uppercase
        assert!(!is_valid_name("1-vote")); // starts with number
        assert!(!is_valid_name("vote_app")); // underscore
        assert!(!is_valid_name("vote-")); // ends with hyphen
        assert!(!is_valid_name("vote--app")); // consecutive hyphens
    }

    #[test]
    fn test_image_tag_detection() {
        assert!(image_has_tag("postgres:15-alpine"));
        assert!(image_has_tag("registry.local:5000/vote@sha256:abc"));
        assert!(!image_has_tag("registry.local:5000/vote"));
        assert!(!image_has_tag("redis"));
    }

    #[test]
    fn test_bundled_template_is_valid() {
        let config = parse(include_str!("../../templates/keel.deploy.yaml"));
        let result = ConfigValidator::new().check(&config);
        assert!(result.is_valid(), "{:?}", result.errors);
    }

    #[test]
    fn test_kubernetes_requires_api_server() {
        let config = parse("project:\n  name: voting\n");
        let result = ConfigValidator::new().check(&config);
        assert!(result.errors.iter().any(|e| e.field == "provider.api_server"));
        assert!(ConfigValidator::new().validate(&config).is_err());
    }

    #[test]
    fn test_execution_bounds() {
        let config = parse(
            r"
project:
  name: voting
provider:
  backend: memory
execution:
  max_parallel: 0
  retry:
    max_attempts: 0
    initial_backoff_ms: 500
    max_backoff_ms: 100
",
        );
        let result = ConfigValidator::new().check(&config);
        assert_eq!(result.error_count(), 3);
    }

    #[test]
    fn test_s3_requires_bucket() {
        let config = parse(
            "project:\n  name: voting\nprovider:\n  backend: memory\nstate:\n  backend: s3\n",
        );
        let result = ConfigValidator::new().check(&config);
        assert!(result.errors.iter().any(|e| e.field == "state.bucket"));
    }

    #[test]
    fn test_latest_image_and_duplicate_node_port() {
        let config = parse(
            r"
project:
  name: voting
provider:
  backend: memory
resources:
  - kind: deployment
    name: vote
    spec:
      image: example/vote:latest
      labels: { app: vote }
  - kind: service
    name: vote
    spec:
      type: NodePort
      selector: { app: vote }
      ports:
        - { name: http, port: 80, target_port: 80, node_port: 31000 }
  - kind: service
    name: vote-alt
    spec:
      type: NodePort
      selector: { app: vote }
      ports:
        - { name: http, port: 80, target_port: 80, node_port: 31000 }
",
        );
        let result = ConfigValidator::new().check(&config);
        assert_eq!(result.error_count(), 1);
        assert!(result.errors[0].message.contains("31000"));
        assert!(result.warnings.iter().any(|w| w.contains(":latest")));
    }
}
