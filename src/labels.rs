//! Naming, labels and ownership shared by every sub-resource builder
//!
//! All names and label sets are pure functions of the owning `Nginx` object's
//! identity, so repeated builds always address the same objects.

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::{Resource, ResourceExt};

use crate::crd::Nginx;
use crate::{Error, GROUP};

/// Label holding the owning `Nginx` object's name
pub const RESOURCE_NAME_LABEL: &str = "devops.github.com/resource-name";

/// Label identifying pods run by this operator
pub const APP_LABEL: &str = "devops.github.com/app";

/// Value of [`APP_LABEL`]
pub const APP_NAME: &str = "nginx";

/// Prefix `suffix` with the operator's domain (`devops.github.com/<suffix>`)
pub fn key_for(suffix: &str) -> String {
    format!("{GROUP}/{suffix}")
}

/// Standard label set carried by every managed object
pub fn labels_for(name: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (RESOURCE_NAME_LABEL.to_string(), name.to_string()),
        (APP_LABEL.to_string(), APP_NAME.to_string()),
    ])
}

/// Right-biased merge: keys in `overlay` win
pub fn merge_maps(
    base: &BTreeMap<String, String>,
    overlay: &BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    let mut merged = base.clone();
    merged.extend(overlay.iter().map(|(k, v)| (k.clone(), v.clone())));
    merged
}

/// Canonical `k=v,k=v` selector form, ordered by key
pub fn format_labels(labels: &BTreeMap<String, String>) -> String {
    labels
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(",")
}

/// Controller owner reference pointing at `nginx`
///
/// Objects read from the API server always carry a name and uid; anything
/// else is an invariant violation.
pub fn owner_reference_for(nginx: &Nginx) -> Result<OwnerReference, Error> {
    let mut owner = nginx.controller_owner_ref(&()).ok_or_else(|| {
        Error::invariant(format!("Nginx {} is missing a name or uid", nginx.name_any()))
    })?;
    owner.block_owner_deletion = Some(true);
    Ok(owner)
}

/// Namespace of `nginx`, required for every sub-resource
pub fn namespace_of(nginx: &Nginx) -> Result<String, Error> {
    nginx
        .namespace()
        .ok_or_else(|| Error::invariant(format!("Nginx {} is missing a namespace", nginx.name_any())))
}

/// The three kinds of object managed per `Nginx`
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubResource {
    /// `<name>`
    Deployment,
    /// `<name>-service`
    Service,
    /// `<name>-ingress`
    Ingress,
}

impl SubResource {
    /// Kubernetes kind name
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Deployment => "Deployment",
            Self::Service => "Service",
            Self::Ingress => "Ingress",
        }
    }

    /// Name of this sub-resource for the owner called `owner`
    pub fn name_for(&self, owner: &str) -> String {
        match self {
            Self::Deployment => owner.to_string(),
            Self::Service => format!("{owner}-service"),
            Self::Ingress => format!("{owner}-ingress"),
        }
    }
}

impl std::fmt::Display for SubResource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.kind())
    }
}
