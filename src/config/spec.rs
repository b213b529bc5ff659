//! Configuration specification types for the reconciliation engine.
//!
//! This module defines all the structs that map to the `keel.deploy.yaml` file.
//! These types are declarative and fully describe the desired state; each
//! resource is a tagged variant carrying the schema for its kind.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use validator::Validate;

use crate::graph::ResourceKind;

/// The root configuration structure for a Keel deployment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeployConfig {
    /// Project-level configuration.
    pub project: ProjectConfig,
    /// State backend configuration.
    #[serde(default)]
    pub state: StateConfig,
    /// Provider configuration.
    #[serde(default)]
    pub provider: ProviderConfig,
    /// Execution tuning.
    #[serde(default)]
    pub execution: ExecutionConfig,
    /// Declared resources.
    #[serde(default)]
    pub resources: Vec<ResourceConfig>,
}

/// Project-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProjectConfig {
    /// Unique name for the project.
    pub name: String,
    /// Environment (e.g., "dev", "staging", "prod").
    #[serde(default = "default_environment")]
    pub environment: String,
    /// Target namespace on the platform.
    #[serde(default = "default_namespace")]
    pub namespace: String,
}

/// State backend configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct StateConfig {
    /// Backend type (local or s3).
    #[serde(default)]
    pub backend: StateBackend,
    /// S3 bucket name (required for s3 backend).
    #[serde(default)]
    pub bucket: Option<String>,
    /// S3 key prefix (optional).
    #[serde(default)]
    pub prefix: Option<String>,
    /// S3 region (optional, uses AWS default if not specified).
    #[serde(default)]
    pub region: Option<String>,
    /// Local state directory (for local backend).
    #[serde(default)]
    pub path: Option<String>,
}

/// State backend types.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StateBackend {
    /// Local file-based state storage.
    #[default]
    Local,
    /// AWS S3-based state storage.
    S3,
}

/// Provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProviderConfig {
    /// Which platform to reconcile against.
    #[serde(default)]
    pub backend: ProviderBackend,
    /// Kubernetes API server URL.
    #[serde(default)]
    pub api_server: Option<String>,
    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

/// Provider backend types.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProviderBackend {
    /// Kubernetes API server over HTTP.
    #[default]
    Kubernetes,
    /// In-process sandbox, nothing leaves the machine.
    Memory,
}

/// Execution tuning for the scheduler.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExecutionConfig {
    /// Maximum number of provider calls in flight.
    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,
    /// Retry policy for transient provider failures.
    #[serde(default)]
    pub retry: RetryConfig,
}

/// Retry policy for transient provider failures.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RetryConfig {
    /// Total attempts per provider call, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay before the first retry, in milliseconds.
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    /// Upper bound on any single delay, in milliseconds.
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

/// A declared resource, tagged by kind.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ResourceConfig {
    /// A Deployment declaration.
    Deployment(Declaration<DeploymentSpec>),
    /// A Service declaration.
    Service(Declaration<ServiceSpec>),
}

/// Name, dependencies and kind-specific spec of a declared resource.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Declaration<S> {
    /// Resource name, unique within its kind.
    pub name: String,
    /// Identities (`kind/name`) this resource depends on.
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Kind-specific desired attributes.
    pub spec: S,
}

/// Desired attributes of a Deployment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Validate)]
#[serde(deny_unknown_fields)]
pub struct DeploymentSpec {
    /// Container image.
    #[validate(length(min = 1, message = "image cannot be empty"))]
    pub image: String,
    /// Desired replica count.
    #[serde(default = "default_replicas")]
    #[validate(range(max = 1000, message = "replicas must be at most 1000"))]
    pub replicas: u32,
    /// Pod labels, also used as the selector.
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    /// Container environment variables.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Exposed container ports.
    #[serde(default)]
    #[validate(nested)]
    pub ports: Vec<ContainerPort>,
    /// Scratch volumes mounted into the container.
    #[serde(default)]
    #[validate(nested)]
    pub volumes: Vec<VolumeMount>,
}

/// A container port.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Validate)]
#[serde(deny_unknown_fields)]
pub struct ContainerPort {
    /// Port name.
    #[validate(length(min = 1, max = 15, message = "port name must be 1-15 characters"))]
    pub name: String,
    /// Port number inside the container.
    #[validate(range(min = 1, message = "container_port must be non-zero"))]
    pub container_port: u16,
}

/// A scratch volume mount.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Validate)]
#[serde(deny_unknown_fields)]
pub struct VolumeMount {
    /// Volume name.
    #[validate(length(min = 1, message = "volume name cannot be empty"))]
    pub name: String,
    /// Absolute mount path.
    #[validate(length(min = 1, message = "mount_path cannot be empty"))]
    pub mount_path: String,
}

/// Desired attributes of a Service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Validate)]
#[serde(deny_unknown_fields)]
pub struct ServiceSpec {
    /// Service type.
    #[serde(rename = "type", default)]
    pub service_type: ServiceType,
    /// Labels of the pods this service routes to.
    #[serde(default)]
    pub selector: BTreeMap<String, String>,
    /// Service labels.
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    /// Exposed ports.
    #[validate(length(min = 1, message = "a service needs at least one port"), nested)]
    pub ports: Vec<ServicePort>,
}

/// Service types.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum ServiceType {
    /// Cluster-internal virtual IP.
    #[default]
    ClusterIP,
    /// Exposed on every node.
    NodePort,
    /// Exposed through an external load balancer.
    LoadBalancer,
}

/// A service port.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Validate)]
#[serde(deny_unknown_fields)]
pub struct ServicePort {
    /// Port name.
    #[validate(length(min = 1, message = "port name cannot be empty"))]
    pub name: String,
    /// Port exposed by the service.
    #[validate(range(min = 1, message = "port must be non-zero"))]
    pub port: u16,
    /// Port on the selected pods.
    #[validate(range(min = 1, message = "target_port must be non-zero"))]
    pub target_port: u16,
    /// Fixed node port (NodePort and LoadBalancer only).
    #[serde(default)]
    pub node_port: Option<u16>,
}

/// Inclusive node port range accepted by the platform.
pub const NODE_PORT_RANGE: std::ops::RangeInclusive<u16> = 30000..=32767;

// Default value functions

fn default_environment() -> String {
    String::from("dev")
}

fn default_namespace() -> String {
    String::from("default")
}

const fn default_timeout_secs() -> u64 {
    30
}

const fn default_max_parallel() -> usize {
    4
}

const fn default_max_attempts() -> u32 {
    5
}

const fn default_initial_backoff_ms() -> u64 {
    200
}

const fn default_max_backoff_ms() -> u64 {
    10_000
}

const fn default_replicas() -> u32 {
    1
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            backend: ProviderBackend::default(),
            api_server: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            max_parallel: default_max_parallel(),
            retry: RetryConfig::default(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

impl ResourceConfig {
    /// Returns the resource kind.
    #[must_use]
    pub const fn kind(&self) -> ResourceKind {
        match self {
            Self::Deployment(_) => ResourceKind::Deployment,
            Self::Service(_) => ResourceKind::Service,
        }
    }

    /// Returns the resource name.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Deployment(d) => &d.name,
            Self::Service(d) => &d.name,
        }
    }

    /// Returns the declared dependency references.
    #[must_use]
    pub fn depends_on(&self) -> &[String] {
        match self {
            Self::Deployment(d) => &d.depends_on,
            Self::Service(d) => &d.depends_on,
        }
    }

    /// Runs the kind's schema checks.
    ///
    /// # Errors
    ///
    /// Returns a description of every failed constraint.
    pub fn validate_schema(&self) -> Result<(), String> {
        let result = match self {
            Self::Deployment(d) => d.spec.validate(),
            Self::Service(d) => d.spec.validate(),
        };
        result.map_err(|e| e.to_string())?;

        if let Self::Service(d) = self {
            d.spec.check_node_ports()?;
        }

        Ok(())
    }

    /// Returns the spec as a JSON value for hashing and persistence.
    ///
    /// # Errors
    ///
    /// Returns an error if the spec cannot be serialized.
    pub fn spec_value(&self) -> Result<serde_json::Value, serde_json::Error> {
        match self {
            Self::Deployment(d) => serde_json::to_value(&d.spec),
            Self::Service(d) => serde_json::to_value(&d.spec),
        }
    }
}

impl ServiceSpec {
    /// Checks node ports against the service type and the allowed range.
    fn check_node_ports(&self) -> Result<(), String> {
        for port in &self.ports {
            let Some(node_port) = port.node_port else {
                continue;
            };
            if self.service_type == ServiceType::ClusterIP {
                return Err(format!(
                    "port '{}' sets node_port but the service type is ClusterIP",
                    port.name
                ));
            }
            if !NODE_PORT_RANGE.contains(&node_port) {
                return Err(format!(
                    "node_port {node_port} of port '{}' is outside {}-{}",
                    port.name,
                    NODE_PORT_RANGE.start(),
                    NODE_PORT_RANGE.end()
                ));
            }
        }
        Ok(())
    }
}

impl DeployConfig {
    /// Returns the fully qualified project name including environment.
    #[must_use]
    pub fn qualified_name(&self) -> String {
        format!("{}-{}", self.project.name, self.project.environment)
    }

    /// Returns declared resource names as `kind/name`.
    #[must_use]
    pub fn resource_names(&self) -> Vec<String> {
        self.resources
            .iter()
            .map(|r| format!("{}/{}", r.kind(), r.name()))
            .collect()
    }
}

impl std::fmt::Display for ServiceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::ClusterIP => "ClusterIP",
            Self::NodePort => "NodePort",
            Self::LoadBalancer => "LoadBalancer",
        };
        write!(f, "{s}")
    }
}
