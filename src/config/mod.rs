//! Configuration module for the Keel reconciliation engine.
//!
//! This module handles all configuration-related functionality:
//! - Parsing and deserializing `keel.deploy.yaml`
//! - Validation of configuration values
//! - Canonical content hashing for change detection

mod hash;
mod parser;
mod spec;
mod validator;

pub use hash::{ConfigHasher, canonical_json};
pub use parser::{ConfigParser, DEFAULT_CONFIG_FILES, find_config_file};
pub use spec::{
    ContainerPort, Declaration, DeployConfig, DeploymentSpec, ExecutionConfig, NODE_PORT_RANGE,
    ProjectConfig, ProviderBackend, ProviderConfig, ResourceConfig, RetryConfig, ServicePort,
    ServiceSpec, ServiceType, StateBackend, StateConfig, VolumeMount,
};
pub use validator::{ConfigValidator, ValidationError, ValidationResult};
