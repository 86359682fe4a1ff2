//! Deployment builder

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{
    Deployment, DeploymentSpec, DeploymentStrategy, RollingUpdateDeployment,
};
use k8s_openapi::api::core::v1::{
    Capabilities, ConfigMapVolumeSource, Container, ContainerPort, DownwardAPIVolumeFile,
    DownwardAPIVolumeSource, HTTPGetAction, ObjectFieldSelector, PodSpec, PodTemplateSpec, Probe,
    SecurityContext, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

use super::{
    non_empty, non_empty_map, object_meta, owner_name, CUSTOM_CONFIG_ANNOTATION,
    GENERATED_FROM_ANNOTATION,
};
use crate::crd::{ConfigKind, ConfigRef, Nginx, NginxPodTemplate, NginxSpec};
use crate::labels::{labels_for, merge_maps};
use crate::Error;

/// Name of the container port serving plain HTTP
pub const HTTP_PORT_NAME: &str = "http";
/// Name of the container port serving HTTPS
pub const HTTPS_PORT_NAME: &str = "https";
/// Volume carrying nginx.conf
pub const CONFIG_VOLUME_NAME: &str = "nginx-config";
/// Where nginx.conf is mounted in the nginx container
pub const CONFIG_MOUNT_PATH: &str = "/etc/nginx/nginx.conf";
/// File name of the config inside its volume
pub const CONFIG_FILE: &str = "nginx.conf";

const DEFAULT_HTTP_PORT: i32 = 80;
const DEFAULT_HTTPS_PORT: i32 = 443;
const PRIVILEGED_PORT_LIMIT: i32 = 1024;
const NET_BIND_SERVICE: &str = "NET_BIND_SERVICE";
const PROBE_TIMEOUT_SECONDS: i32 = 1;
const PROBE_INITIAL_DELAY_SECONDS: i32 = 5;

/// Build the desired Deployment for `nginx`
///
/// Fails only on invariant violations (missing namespace or uid) and on a
/// config reference that sets both or neither of `name` / `value`.
pub fn build_deployment(nginx: &Nginx) -> Result<Deployment, Error> {
    let name = owner_name(nginx);
    let spec = &nginx.spec;
    let template = &spec.pod_template;
    let labels = labels_for(&name);

    let generated_from = serde_json::to_string(spec)?;
    let metadata = object_meta(
        nginx,
        name.clone(),
        labels.clone(),
        BTreeMap::from([(GENERATED_FROM_ANNOTATION.to_string(), generated_from)]),
    )?;

    let mut pod_annotations = template.annotations.clone();
    let mut volumes = template.volumes.clone();
    let mut volume_mounts = template.volume_mounts.clone();
    if let Some(config) = &spec.config {
        let (volume, annotation) = config_volume(config)?;
        volumes.push(volume);
        volume_mounts.push(config_mount());
        if let Some((key, value)) = annotation {
            pod_annotations.insert(key, value);
        }
    }

    let ports = container_ports(template);
    let primary = Container {
        name: name.clone(),
        image: Some(spec.image_or_default().to_string()),
        resources: spec.resources.clone(),
        security_context: security_context(template, &ports),
        readiness_probe: readiness_probe(spec, &ports),
        ports: non_empty(ports),
        volume_mounts: non_empty(volume_mounts),
        ..Default::default()
    };
    let containers = std::iter::once(primary)
        .chain(template.containers.iter().cloned())
        .collect();

    // Standard labels win so the selector always matches the pods
    let pod_labels = merge_maps(&template.labels, &labels);

    Ok(Deployment {
        metadata,
        spec: Some(DeploymentSpec {
            replicas: spec.replicas,
            selector: LabelSelector {
                match_labels: Some(labels),
                ..Default::default()
            },
            strategy: deployment_strategy(spec),
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(pod_labels),
                    annotations: non_empty_map(pod_annotations),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    service_account_name: template
                        .service_account_name
                        .clone()
                        .filter(|s| !s.is_empty()),
                    enable_service_links: Some(false),
                    init_containers: non_empty(template.init_containers.clone()),
                    containers,
                    affinity: template.affinity.clone(),
                    node_selector: non_empty_map(template.node_selector.clone()),
                    host_network: template.host_network.then_some(true),
                    termination_grace_period_seconds: template.termination_grace_period_seconds,
                    volumes: non_empty(volumes),
                    tolerations: non_empty(template.tolerations.clone()),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    })
}

/// User ports plus http/https defaults for whichever names are missing.
/// Host-network pods bind the same numbers on the host.
fn container_ports(template: &NginxPodTemplate) -> Vec<ContainerPort> {
    let mut ports = template.ports.clone();
    for (port_name, number) in [
        (HTTP_PORT_NAME, DEFAULT_HTTP_PORT),
        (HTTPS_PORT_NAME, DEFAULT_HTTPS_PORT),
    ] {
        if !ports.iter().any(|p| p.name.as_deref() == Some(port_name)) {
            ports.push(ContainerPort {
                name: Some(port_name.to_string()),
                container_port: number,
                host_port: template.host_network.then_some(number),
                protocol: Some("TCP".to_string()),
                ..Default::default()
            });
        }
    }
    ports
}

/// User security context, plus NET_BIND_SERVICE when binding a port below 1024
fn security_context(
    template: &NginxPodTemplate,
    ports: &[ContainerPort],
) -> Option<SecurityContext> {
    if !ports
        .iter()
        .any(|p| p.container_port < PRIVILEGED_PORT_LIMIT)
    {
        return template.security_context.clone();
    }

    let mut context = template.security_context.clone().unwrap_or_default();
    let capabilities = context
        .capabilities
        .get_or_insert_with(Capabilities::default);
    let add = capabilities.add.get_or_insert_with(Vec::new);
    if !add.iter().any(|c| c == NET_BIND_SERVICE) {
        add.push(NET_BIND_SERVICE.to_string());
    }
    Some(context)
}

fn readiness_probe(spec: &NginxSpec, ports: &[ContainerPort]) -> Option<Probe> {
    let http = ports
        .iter()
        .find(|p| p.name.as_deref() == Some(HTTP_PORT_NAME))?;
    Some(Probe {
        http_get: Some(HTTPGetAction {
            path: Some(spec.healthcheck_path_or_default().to_string()),
            port: IntOrString::Int(http.container_port),
            ..Default::default()
        }),
        timeout_seconds: Some(PROBE_TIMEOUT_SECONDS),
        initial_delay_seconds: Some(PROBE_INITIAL_DELAY_SECONDS),
        ..Default::default()
    })
}

/// Explicit rolling update wins. Host-network pods get a surge and
/// unavailability of a quarter of the replicas, rounded up. Otherwise the
/// orchestrator default applies.
fn deployment_strategy(spec: &NginxSpec) -> Option<DeploymentStrategy> {
    let rolling_update = match &spec.pod_template.rolling_update {
        Some(explicit) => explicit.clone(),
        None if spec.pod_template.host_network => {
            let replicas = spec.replicas.filter(|r| *r > 0).unwrap_or(1);
            let step = IntOrString::Int(replicas / 4 + i32::from(replicas % 4 != 0));
            RollingUpdateDeployment {
                max_surge: Some(step.clone()),
                max_unavailable: Some(step),
            }
        }
        None => return None,
    };
    Some(DeploymentStrategy {
        type_: Some("RollingUpdate".to_string()),
        rolling_update: Some(rolling_update),
    })
}

/// Volume for the configured source, plus the pod annotation for inline config
fn config_volume(config: &ConfigRef) -> Result<(Volume, Option<(String, String)>), Error> {
    config.validate()?;
    match (config.kind, &config.name, &config.value) {
        (ConfigKind::ConfigMap, Some(config_map), _) => Ok((
            Volume {
                name: CONFIG_VOLUME_NAME.to_string(),
                config_map: Some(ConfigMapVolumeSource {
                    name: config_map.clone(),
                    optional: Some(false),
                    ..Default::default()
                }),
                ..Default::default()
            },
            None,
        )),
        (ConfigKind::Inline, _, Some(value)) => Ok((
            Volume {
                name: CONFIG_VOLUME_NAME.to_string(),
                downward_api: Some(DownwardAPIVolumeSource {
                    items: Some(vec![DownwardAPIVolumeFile {
                        path: CONFIG_FILE.to_string(),
                        field_ref: Some(ObjectFieldSelector {
                            field_path: format!(
                                "metadata.annotations['{CUSTOM_CONFIG_ANNOTATION}']"
                            ),
                            ..Default::default()
                        }),
                        ..Default::default()
                    }]),
                    ..Default::default()
                }),
                ..Default::default()
            },
            Some((CUSTOM_CONFIG_ANNOTATION.to_string(), value.clone())),
        )),
        _ => Err(Error::invariant(format!(
            "validated config of kind {} has no source",
            config.kind
        ))),
    }
}

fn config_mount() -> VolumeMount {
    VolumeMount {
        name: CONFIG_VOLUME_NAME.to_string(),
        mount_path: CONFIG_MOUNT_PATH.to_string(),
        sub_path: Some(CONFIG_FILE.to_string()),
        read_only: Some(true),
        ..Default::default()
    }
}
