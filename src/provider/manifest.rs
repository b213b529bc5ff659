//! Kubernetes manifest rendering and observation.
//!
//! `render` turns a node into the object sent to the API server; `observe`
//! maps a live object back into the attribute shape of its spec, so live and
//! applied attributes can be compared field by field.

use serde_json::{Map, Value, json};
use std::collections::{BTreeMap, BTreeSet};

use crate::config::{
    ContainerPort, DeploymentSpec, ResourceConfig, ServicePort, ServiceSpec, ServiceType,
    VolumeMount,
};
use crate::error::ProviderError;
use crate::graph::{Attributes, ResourceId, ResourceKind, ResourceNode};

/// Label marking objects managed by this tool.
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";

/// Value of the managed-by label.
pub const MANAGED_BY_VALUE: &str = "keel";

/// Annotation carrying the applied content hash.
pub const SPEC_HASH_ANNOTATION: &str = "keel.io/spec-hash";

/// Annotation carrying the applied dependency identities.
pub const DEPENDS_ON_ANNOTATION: &str = "keel.io/depends-on";

/// Pod label used as the deployment selector.
const NAME_LABEL: &str = "keel.io/name";

/// Renders the API object for a node.
#[must_use]
pub fn render(node: &ResourceNode, namespace: &str) -> Value {
    let depends_on = node
        .dependencies
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(",");
    let annotations = json!({
        SPEC_HASH_ANNOTATION: node.hash,
        DEPENDS_ON_ANNOTATION: depends_on,
    });

    match &node.spec {
        ResourceConfig::Deployment(d) => render_deployment(&d.name, &d.spec, namespace, annotations),
        ResourceConfig::Service(s) => render_service(&s.name, &s.spec, namespace, annotations),
    }
}

fn with_managed_by(labels: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    let mut labels = labels.clone();
    labels.insert(MANAGED_BY_LABEL.to_string(), MANAGED_BY_VALUE.to_string());
    labels
}

fn render_deployment(name: &str, spec: &DeploymentSpec, namespace: &str, annotations: Value) -> Value {
    let mut pod_labels = spec.labels.clone();
    pod_labels.insert(NAME_LABEL.to_string(), name.to_string());

    let env: Vec<Value> = spec
        .env
        .iter()
        .map(|(k, v)| json!({"name": k, "value": v}))
        .collect();
    let ports: Vec<Value> = spec
        .ports
        .iter()
        .map(|p| json!({"name": p.name, "containerPort": p.container_port}))
        .collect();
    let mounts: Vec<Value> = spec
        .volumes
        .iter()
        .map(|v| json!({"name": v.name, "mountPath": v.mount_path}))
        .collect();
    let volumes: Vec<Value> = spec
        .volumes
        .iter()
        .map(|v| json!({"name": v.name, "emptyDir": {}}))
        .collect();

    json!({
        "apiVersion": "apps/v1",
        "kind": "Deployment",
        "metadata": {
            "name": name,
            "namespace": namespace,
            "labels": with_managed_by(&spec.labels),
            "annotations": annotations,
        },
        "spec": {
            "replicas": spec.replicas,
            "selector": { "matchLabels": { NAME_LABEL: name } },
            "template": {
                "metadata": { "labels": pod_labels },
                "spec": {
                    "containers": [{
                        "name": name,
                        "image": spec.image,
                        "env": env,
                        "ports": ports,
                        "volumeMounts": mounts,
                    }],
                    "volumes": volumes,
                },
            },
        },
    })
}

fn render_service(name: &str, spec: &ServiceSpec, namespace: &str, annotations: Value) -> Value {
    let ports: Vec<Value> = spec
        .ports
        .iter()
        .map(|p| {
            let mut port = json!({"name": p.name, "port": p.port, "targetPort": p.target_port});
            if let (Some(node_port), Some(obj)) = (p.node_port, port.as_object_mut()) {
                obj.insert(String::from("nodePort"), json!(node_port));
            }
            port
        })
        .collect();

    json!({
        "apiVersion": "v1",
        "kind": "Service",
        "metadata": {
            "name": name,
            "namespace": namespace,
            "labels": with_managed_by(&spec.labels),
            "annotations": annotations,
        },
        "spec": {
            "type": spec.service_type.to_string(),
            "selector": spec.selector,
            "ports": ports,
        },
    })
}

/// What a live object says about a resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observed {
    /// Live attributes in spec shape.
    pub attributes: Attributes,
    /// Hash recorded on the object, if any.
    pub hash: Option<String>,
    /// Dependencies recorded on the object.
    pub dependencies: BTreeSet<ResourceId>,
    /// Platform uid.
    pub uid: Option<String>,
}

/// Maps a live object back to spec-shaped attributes.
///
/// # Errors
///
/// Returns a permanent error if the object does not have the expected shape.
pub fn observe(kind: ResourceKind, object: &Value) -> Result<Observed, ProviderError> {
    let metadata = &object["metadata"];
    let annotation = |key: &str| metadata["annotations"][key].as_str().map(ToString::to_string);

    let dependencies = annotation(DEPENDS_ON_ANNOTATION)
        .map(|raw| {
            raw.split(',')
                .filter(|s| !s.is_empty())
                .filter_map(|s| ResourceId::parse(s).ok())
                .collect()
        })
        .unwrap_or_default();

    let value = match kind {
        ResourceKind::Deployment => serde_json::to_value(observe_deployment(object)?),
        ResourceKind::Service => serde_json::to_value(observe_service(object)?),
    }
    .map_err(|e| ProviderError::permanent(format!("cannot encode observed {kind}: {e}")))?;

    Ok(Observed {
        attributes: Attributes::from_value(value),
        hash: annotation(SPEC_HASH_ANNOTATION),
        dependencies,
        uid: metadata["uid"].as_str().map(ToString::to_string),
    })
}

fn string_map(value: &Value, skip: &[&str]) -> BTreeMap<String, String> {
    value
        .as_object()
        .map(|map| {
            map.iter()
                .filter(|(k, _)| !skip.contains(&k.as_str()))
                .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                .collect()
        })
        .unwrap_or_default()
}

fn port_number(value: &Value) -> Option<u16> {
    value.as_u64().and_then(|n| u16::try_from(n).ok())
}

fn items(value: &Value) -> &[Value] {
    value.as_array().map_or(&[][..], Vec::as_slice)
}

fn observe_deployment(object: &Value) -> Result<DeploymentSpec, ProviderError> {
    let spec = &object["spec"];
    let container = &spec["template"]["spec"]["containers"][0];
    let image = container["image"]
        .as_str()
        .ok_or_else(|| ProviderError::permanent("deployment has no container image"))?;

    let env = items(&container["env"])
        .iter()
        .filter_map(|e| Some((e["name"].as_str()?.to_string(), e["value"].as_str()?.to_string())))
        .collect();
    let ports = items(&container["ports"])
        .iter()
        .filter_map(|p| {
            Some(ContainerPort {
                name: p["name"].as_str().unwrap_or_default().to_string(),
                container_port: port_number(&p["containerPort"])?,
            })
        })
        .collect();
    let volumes = items(&container["volumeMounts"])
        .iter()
        .filter_map(|v| {
            Some(VolumeMount {
                name: v["name"].as_str()?.to_string(),
                mount_path: v["mountPath"].as_str()?.to_string(),
            })
        })
        .collect();

    Ok(DeploymentSpec {
        image: image.to_string(),
        replicas: spec["replicas"]
            .as_u64()
            .and_then(|n| u32::try_from(n).ok())
            .unwrap_or(1),
        labels: string_map(&spec["template"]["metadata"]["labels"], &[NAME_LABEL]),
        env,
        ports,
        volumes,
    })
}

fn observe_service(object: &Value) -> Result<ServiceSpec, ProviderError> {
    let spec = &object["spec"];
    let service_type = match spec["type"].as_str().unwrap_or("ClusterIP") {
        "ClusterIP" => ServiceType::ClusterIP,
        "NodePort" => ServiceType::NodePort,
        "LoadBalancer" => ServiceType::LoadBalancer,
        other => {
            return Err(ProviderError::permanent(format!(
                "unsupported service type '{other}'"
            )));
        }
    };

    let ports = items(&spec["ports"])
        .iter()
        .filter_map(|p| {
            let port = port_number(&p["port"])?;
            Some(ServicePort {
                name: p["name"].as_str().unwrap_or_default().to_string(),
                port,
                target_port: port_number(&p["targetPort"]).unwrap_or(port),
                node_port: port_number(&p["nodePort"]),
            })
        })
        .collect();

    Ok(ServiceSpec {
        service_type,
        selector: string_map(&spec["selector"], &[]),
        labels: string_map(&object["metadata"]["labels"], &[MANAGED_BY_LABEL]),
        ports,
    })
}

/// True when every non-null field of `applied` has the same value in `live`.
///
/// Fields the platform fills in by itself (defaults, assigned node ports)
/// are absent or null in the applied attributes and never count as drift.
#[must_use]
pub fn covers(applied: &Value, live: &Value) -> bool {
    match (applied, live) {
        (Value::Null, _) => true,
        (Value::Object(a), Value::Object(l)) => a
            .iter()
            .all(|(k, v)| covers(v, l.get(k).unwrap_or(&Value::Null))),
        (Value::Array(a), Value::Array(l)) => {
            a.len() == l.len() && a.iter().zip(l).all(|(x, y)| covers(x, y))
        }
        (a, l) => a == l,
    }
}

/// Top-level attribute keys whose live value does not cover the applied one.
#[must_use]
pub fn drifted_fields(applied: &Attributes, live: &Attributes) -> Vec<String> {
    let empty = Value::Object(Map::new());
    let null = Value::Null;
    applied
        .iter()
        .filter(|(k, v)| {
            let live_value = live.get(k).unwrap_or(&null);
            let live_value = if live_value.is_null() && v.is_object() { &empty } else { live_value };
            !covers(v, live_value)
        })
        .map(|(k, _)| k.clone())
        .collect()
}
