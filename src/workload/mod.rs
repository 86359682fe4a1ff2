//! Desired-state builders for the sub-resources of an `Nginx`
//!
//! Each builder is a pure function of the `Nginx` object:
//! - [`build_deployment`]: the nginx pods plus any user sidecars
//! - [`build_service`]: network exposure on ports 80 and 443
//! - [`build_ingress`]: optional HTTP routing to the Service
//!
//! Builders never talk to the cluster; the reconcilers in
//! [`crate::controller`] decide what to do with their output.

mod deployment;
mod ingress;
mod service;

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::ResourceExt;

pub use deployment::{
    build_deployment, CONFIG_FILE, CONFIG_MOUNT_PATH, CONFIG_VOLUME_NAME, HTTPS_PORT_NAME,
    HTTP_PORT_NAME,
};
pub use ingress::{build_ingress, DEFAULT_INGRESS_CLASS};
pub use service::build_service;
pub(crate) use service::foreign_annotations;

use crate::crd::Nginx;
use crate::labels::{namespace_of, owner_reference_for};
use crate::Error;

/// Annotation on the Deployment holding the JSON spec it was built from
pub const GENERATED_FROM_ANNOTATION: &str = "devops.github.com/generated-from";

/// Pod-template annotation carrying inline nginx.conf contents
pub const CUSTOM_CONFIG_ANNOTATION: &str = "devops.github.com/custom-nginx-config";

/// Metadata shared by every sub-resource: name, namespace, labels,
/// annotations and the controller owner reference
fn object_meta(
    nginx: &Nginx,
    name: String,
    labels: BTreeMap<String, String>,
    annotations: BTreeMap<String, String>,
) -> Result<ObjectMeta, Error> {
    Ok(ObjectMeta {
        name: Some(name),
        namespace: Some(namespace_of(nginx)?),
        labels: non_empty_map(labels),
        annotations: non_empty_map(annotations),
        owner_references: Some(vec![owner_reference_for(nginx)?]),
        ..Default::default()
    })
}

/// `None` for an empty list so absent and empty serialize the same way
fn non_empty<T>(items: Vec<T>) -> Option<Vec<T>> {
    (!items.is_empty()).then_some(items)
}

fn non_empty_map(map: BTreeMap<String, String>) -> Option<BTreeMap<String, String>> {
    (!map.is_empty()).then_some(map)
}

/// Name of the owning object, used to derive sub-resource names
fn owner_name(nginx: &Nginx) -> String {
    nginx.name_any()
}
