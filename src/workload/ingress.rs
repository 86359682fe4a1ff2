//! Ingress builder

use k8s_openapi::api::networking::v1::{
    HTTPIngressPath, HTTPIngressRuleValue, Ingress, IngressBackend, IngressRule,
    IngressServiceBackend, IngressSpec, IngressTLS, ServiceBackendPort,
};

use super::{non_empty, object_meta, owner_name, HTTP_PORT_NAME};
use crate::crd::{Nginx, NginxTls};
use crate::labels::{labels_for, merge_maps, SubResource};
use crate::Error;

/// Ingress class used when the overlay does not name one
pub const DEFAULT_INGRESS_CLASS: &str = "nginx";

/// Build the desired Ingress, or `None` when no Ingress is requested
pub fn build_ingress(nginx: &Nginx) -> Result<Option<Ingress>, Error> {
    let Some(overlay) = &nginx.spec.ingress else {
        return Ok(None);
    };
    let name = owner_name(nginx);
    let service_name = SubResource::Service.name_for(&name);

    let metadata = object_meta(
        nginx,
        SubResource::Ingress.name_for(&name),
        merge_maps(&labels_for(&name), &overlay.labels),
        overlay.annotations.clone(),
    )?;

    let rules: Vec<IngressRule> = nginx
        .spec
        .tls
        .iter()
        .flat_map(rule_hosts)
        .map(|host| IngressRule {
            host,
            http: Some(HTTPIngressRuleValue {
                paths: vec![HTTPIngressPath {
                    path: Some("/".to_string()),
                    path_type: "Prefix".to_string(),
                    backend: service_backend(&service_name),
                }],
            }),
        })
        .collect();

    let tls: Vec<IngressTLS> = nginx
        .spec
        .tls
        .iter()
        .map(|t| IngressTLS {
            secret_name: Some(t.secret_name.clone()),
            hosts: non_empty(t.hosts.clone()),
        })
        .collect();

    Ok(Some(Ingress {
        metadata,
        spec: Some(IngressSpec {
            ingress_class_name: Some(
                overlay
                    .ingress_class_name
                    .clone()
                    .filter(|c| !c.is_empty())
                    .unwrap_or_else(|| DEFAULT_INGRESS_CLASS.to_string()),
            ),
            rules: non_empty(rules),
            tls: non_empty(tls),
            default_backend: Some(service_backend(&service_name)),
        }),
        ..Default::default()
    }))
}

/// One rule per host; a certificate without hosts yields a single wildcard rule
fn rule_hosts(tls: &NginxTls) -> Vec<Option<String>> {
    if tls.hosts.is_empty() {
        vec![None]
    } else {
        tls.hosts.iter().cloned().map(Some).collect()
    }
}

fn service_backend(service_name: &str) -> IngressBackend {
    IngressBackend {
        service: Some(IngressServiceBackend {
            name: service_name.to_string(),
            port: Some(ServiceBackendPort {
                name: Some(HTTP_PORT_NAME.to_string()),
                number: None,
            }),
        }),
        resource: None,
    }
}
