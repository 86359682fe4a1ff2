//! Nginx CRD types
//!
//! Defines `Nginx` - a declarative nginx deployment. The operator turns each
//! object into a Deployment, a Service and (optionally) an Ingress.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::RollingUpdateDeployment;
use k8s_openapi::api::core::v1::{
    Affinity, Container, ContainerPort, ResourceRequirements, SecurityContext, Toleration, Volume,
    VolumeMount,
};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::{Error, DEFAULT_IMAGE};

// =============================================================================
// Config
// =============================================================================

/// Where the nginx.conf for an instance comes from
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ConfigKind {
    /// Mount the `nginx.conf` key of a named ConfigMap
    #[default]
    ConfigMap,
    /// Literal configuration carried on the pod template
    Inline,
}

impl std::fmt::Display for ConfigKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ConfigMap => write!(f, "ConfigMap"),
            Self::Inline => write!(f, "Inline"),
        }
    }
}

/// Reference to the nginx configuration.
///
/// `name` and `value` are mutually exclusive: `name` selects a ConfigMap,
/// `value` carries the configuration inline.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConfigRef {
    /// Source kind
    #[serde(default)]
    pub kind: ConfigKind,

    /// ConfigMap name (kind = ConfigMap)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Literal nginx.conf contents (kind = Inline)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

impl ConfigRef {
    /// Check that exactly the field matching `kind` is set
    pub fn validate(&self) -> Result<(), Error> {
        let name = self.name.as_deref().filter(|n| !n.is_empty());
        let value = self.value.as_deref().filter(|v| !v.is_empty());

        if name.is_some() && value.is_some() {
            return Err(Error::validation(
                "config name and value are mutually exclusive",
            ));
        }
        match (self.kind, name, value) {
            (ConfigKind::ConfigMap, Some(_), None) => Ok(()),
            (ConfigKind::Inline, None, Some(_)) => Ok(()),
            (ConfigKind::ConfigMap, _, _) => Err(Error::validation(
                "config of kind ConfigMap requires a name",
            )),
            (ConfigKind::Inline, _, _) => Err(Error::validation(
                "config of kind Inline requires a value",
            )),
        }
    }
}

// =============================================================================
// TLS / Service / Ingress overlays
// =============================================================================

/// A TLS certificate and the hosts it covers
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NginxTls {
    /// Secret holding the certificate and key
    pub secret_name: String,

    /// Hosts served with this certificate
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hosts: Vec<String>,
}

/// Overrides for the generated Service
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NginxService {
    /// Service type (ClusterIP when unset)
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub type_: Option<String>,

    /// Requested load balancer IP (LoadBalancer services only)
    #[serde(
        rename = "loadBalancerIP",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub load_balancer_ip: Option<String>,

    /// Extra labels, winning over the standard labels on conflict
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    /// Annotations for the Service
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,

    /// External traffic policy (NodePort and LoadBalancer only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_traffic_policy: Option<String>,

    /// Set to false to create the Service without a pod selector
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub use_pod_selector: Option<bool>,
}

/// Presence of this overlay requests an Ingress
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NginxIngress {
    /// Annotations for the Ingress
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,

    /// Extra labels, winning over the standard labels on conflict
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    /// Ingress class (defaults to "nginx")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ingress_class_name: Option<String>,
}

// =============================================================================
// Pod template
// =============================================================================

/// Pod-level settings applied to the generated Deployment
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NginxPodTemplate {
    /// Pod affinity rules
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub affinity: Option<Affinity>,

    /// Node selector
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub node_selector: BTreeMap<String, String>,

    /// Pod annotations
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,

    /// Pod labels, merged under the standard labels
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    /// Run pods in the host network namespace
    #[serde(default)]
    pub host_network: bool,

    /// Ports of the nginx container; http and https are added when missing
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<ContainerPort>,

    /// Pod termination grace period
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub termination_grace_period_seconds: Option<i64>,

    /// Security context of the nginx container
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security_context: Option<SecurityContext>,

    /// Extra pod volumes
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<Volume>,

    /// Extra mounts for the nginx container
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volume_mounts: Vec<VolumeMount>,

    /// Init containers
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub init_containers: Vec<Container>,

    /// Sidecar containers placed after the nginx container
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub containers: Vec<Container>,

    /// Explicit rolling update parameters
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rolling_update: Option<RollingUpdateDeployment>,

    /// Pod tolerations
    #[serde(rename = "toleration", default, skip_serializing_if = "Vec::is_empty")]
    pub tolerations: Vec<Toleration>,

    /// Service account the pods run as
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_account_name: Option<String>,
}

// =============================================================================
// CRD
// =============================================================================

/// Declarative nginx instance
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "devops.github.com",
    version = "v1",
    kind = "Nginx",
    plural = "nginxes",
    namespaced,
    status = "NginxStatus",
    scale = r#"{"specReplicasPath":".spec.replicas","statusReplicasPath":".status.currentReplicas","labelSelectorPath":".status.podSelector"}"#,
    printcolumn = r#"{"name":"Current","type":"integer","jsonPath":".status.currentReplicas"}"#,
    printcolumn = r#"{"name":"Desired","type":"integer","jsonPath":".spec.replicas"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct NginxSpec {
    /// Desired pod count; left to the existing Deployment when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,

    /// nginx container image
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    /// nginx.conf source
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<ConfigRef>,

    /// TLS certificates; their hosts become Ingress rules
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tls: Vec<NginxTls>,

    /// Pod template settings
    #[serde(default)]
    pub pod_template: NginxPodTemplate,

    /// Service overrides
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<NginxService>,

    /// Ingress request; the Ingress is deleted when this is removed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ingress: Option<NginxIngress>,

    /// Path probed for readiness
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub healthcheck_path: Option<String>,

    /// Resources of the nginx container
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceRequirements>,
}

impl NginxSpec {
    /// Validate the parts of the spec the builders depend on
    pub fn validate(&self) -> Result<(), Error> {
        if let Some(replicas) = self.replicas {
            if replicas < 0 {
                return Err(Error::validation(format!(
                    "replicas must not be negative, got {replicas}"
                )));
            }
        }
        if let Some(config) = &self.config {
            config.validate()?;
        }
        Ok(())
    }

    /// Image with the default applied
    pub fn image_or_default(&self) -> &str {
        match self.image.as_deref() {
            Some(image) if !image.is_empty() => image,
            _ => DEFAULT_IMAGE,
        }
    }

    /// Readiness probe path with the default applied
    pub fn healthcheck_path_or_default(&self) -> &str {
        match self.healthcheck_path.as_deref() {
            Some(path) if !path.is_empty() => path,
            _ => "/",
        }
    }
}

/// Name reference to a discovered sub-resource
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq, PartialOrd, Ord)]
pub struct ResourceStatus {
    /// Object name
    pub name: String,
}

impl ResourceStatus {
    /// Create a status entry for the named object
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// Aggregated observed state, written only by the status aggregator
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NginxStatus {
    /// Sum of replicas across discovered Deployments
    #[serde(default)]
    pub current_replicas: i32,

    /// Canonical selector matching the managed pods
    #[serde(default)]
    pub pod_selector: String,

    /// Deployments owned by this object, sorted by name
    #[serde(default)]
    pub deployments: Vec<ResourceStatus>,

    /// Services owned by this object, sorted by name
    #[serde(default)]
    pub services: Vec<ResourceStatus>,

    /// Ingresses owned by this object, sorted by name
    #[serde(default)]
    pub ingresses: Vec<ResourceStatus>,
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use kube::CustomResourceExt;

    fn config(kind: ConfigKind, name: Option<&str>, value: Option<&str>) -> ConfigRef {
        ConfigRef {
            kind,
            name: name.map(str::to_string),
            value: value.map(str::to_string),
        }
    }

    #[test]
    fn config_map_reference_is_valid() {
        assert!(config(ConfigKind::ConfigMap, Some("site-conf"), None)
            .validate()
            .is_ok());
        assert!(config(ConfigKind::Inline, None, Some("events {}"))
            .validate()
            .is_ok());
    }

    #[test]
    fn config_name_and_value_are_mutually_exclusive() {
        let err = config(ConfigKind::ConfigMap, Some("site-conf"), Some("events {}"))
            .validate()
            .unwrap_err();
        assert!(err.to_string().contains("mutually exclusive"));

        let err = config(ConfigKind::Inline, Some("site-conf"), Some("events {}"))
            .validate()
            .unwrap_err();
        assert!(err.to_string().contains("mutually exclusive"));
    }

    #[test]
    fn config_kind_requires_matching_field() {
        assert!(config(ConfigKind::ConfigMap, None, Some("events {}"))
            .validate()
            .is_err());
        assert!(config(ConfigKind::Inline, Some("site-conf"), None)
            .validate()
            .is_err());
        assert!(config(ConfigKind::ConfigMap, Some(""), None)
            .validate()
            .is_err());
    }

    #[test]
    fn negative_replicas_are_rejected() {
        let spec = NginxSpec {
            replicas: Some(-1),
            ..Default::default()
        };
        assert!(spec.validate().is_err());
    }

    #[test]
    fn defaults_apply_to_empty_image_and_path() {
        let spec = NginxSpec {
            image: Some(String::new()),
            ..Default::default()
        };
        assert_eq!(spec.image_or_default(), DEFAULT_IMAGE);
        assert_eq!(spec.healthcheck_path_or_default(), "/");

        let spec = NginxSpec {
            image: Some("nginx:1.27".to_string()),
            healthcheck_path: Some("/healthz".to_string()),
            ..Default::default()
        };
        assert_eq!(spec.image_or_default(), "nginx:1.27");
        assert_eq!(spec.healthcheck_path_or_default(), "/healthz");
    }

    #[test]
    fn spec_deserializes_from_camel_case_yaml() {
        let yaml = r#"
replicas: 2
config:
  kind: Inline
  value: "events {}"
tls:
  - secretName: tls1
    hosts: [a.com]
podTemplate:
  hostNetwork: true
  toleration:
    - key: dedicated
      operator: Exists
service:
  type: LoadBalancer
  loadBalancerIP: 10.0.0.10
  usePodSelector: false
ingress:
  ingressClassName: public
healthcheckPath: /healthz
"#;
        let spec: NginxSpec = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(spec.replicas, Some(2));
        assert_eq!(spec.config.as_ref().map(|c| c.kind), Some(ConfigKind::Inline));
        assert_eq!(spec.tls[0].secret_name, "tls1");
        assert!(spec.pod_template.host_network);
        assert_eq!(spec.pod_template.tolerations.len(), 1);
        let service = spec.service.unwrap();
        assert_eq!(service.type_.as_deref(), Some("LoadBalancer"));
        assert_eq!(service.load_balancer_ip.as_deref(), Some("10.0.0.10"));
        assert_eq!(service.use_pod_selector, Some(false));
        assert_eq!(
            spec.ingress.unwrap().ingress_class_name.as_deref(),
            Some("public")
        );
    }

    #[test]
    fn crd_has_status_and_scale_subresources() {
        let crd = Nginx::crd();
        assert_eq!(crd.spec.group, "devops.github.com");
        assert_eq!(crd.spec.names.plural, "nginxes");
        let version = &crd.spec.versions[0];
        let subresources = version.subresources.as_ref().unwrap();
        assert!(subresources.status.is_some());
        let scale = subresources.scale.as_ref().unwrap();
        assert_eq!(scale.spec_replicas_path, ".spec.replicas");
        assert_eq!(scale.status_replicas_path, ".status.currentReplicas");
    }
}
