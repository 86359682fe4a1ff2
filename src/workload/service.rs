//! Service builder

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

use super::{object_meta, owner_name, HTTPS_PORT_NAME, HTTP_PORT_NAME};
use crate::crd::{Nginx, NginxService};
use crate::labels::{labels_for, merge_maps, SubResource};
use crate::Error;

const CLUSTER_IP: &str = "ClusterIP";
const NODE_PORT: &str = "NodePort";
const LOAD_BALANCER: &str = "LoadBalancer";

/// Build the desired Service for `nginx`
pub fn build_service(nginx: &Nginx) -> Result<Service, Error> {
    let name = owner_name(nginx);
    let overlay = nginx.spec.service.clone().unwrap_or_default();
    let labels = labels_for(&name);

    let metadata = object_meta(
        nginx,
        SubResource::Service.name_for(&name),
        merge_maps(&labels, &overlay.labels),
        overlay.annotations.clone(),
    )?;

    let type_ = overlay
        .type_
        .clone()
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| CLUSTER_IP.to_string());
    let exposed = type_ == NODE_PORT || type_ == LOAD_BALANCER;

    Ok(Service {
        metadata,
        spec: Some(ServiceSpec {
            type_: Some(type_.clone()),
            selector: uses_pod_selector(&overlay).then_some(labels),
            ports: Some(service_ports()),
            external_traffic_policy: overlay
                .external_traffic_policy
                .clone()
                .filter(|p| exposed && !p.is_empty()),
            load_balancer_ip: overlay
                .load_balancer_ip
                .clone()
                .filter(|ip| type_ == LOAD_BALANCER && !ip.is_empty()),
            ..Default::default()
        }),
        ..Default::default()
    })
}

fn uses_pod_selector(overlay: &NginxService) -> bool {
    overlay.use_pod_selector != Some(false)
}

fn service_ports() -> Vec<ServicePort> {
    vec![
        ServicePort {
            name: Some(HTTP_PORT_NAME.to_string()),
            port: 80,
            target_port: Some(IntOrString::Int(80)),
            protocol: Some("TCP".to_string()),
            ..Default::default()
        },
        ServicePort {
            name: Some(HTTPS_PORT_NAME.to_string()),
            port: 443,
            target_port: Some(IntOrString::String(HTTPS_PORT_NAME.to_string())),
            protocol: Some("TCP".to_string()),
            ..Default::default()
        },
    ]
}

/// Annotations present on `observed` but not set by `desired`
pub(crate) fn foreign_annotations<'a>(
    desired: Option<&'a BTreeMap<String, String>>,
    observed: Option<&'a BTreeMap<String, String>>,
) -> impl Iterator<Item = (&'a String, &'a String)> {
    observed
        .into_iter()
        .flatten()
        .filter(move |(k, _)| !desired.is_some_and(|d| d.get(*k).is_some_and(|v| !v.is_empty())))
}
