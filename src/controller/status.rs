//! Status aggregation
//!
//! Discovers the sub-resources that belong to an `Nginx`, folds them into an
//! [`NginxStatus`] and writes it only when it differs from what is stored.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::{Resource, ResourceExt};
use tracing::{debug, info};

use super::client::KubeClient;
use super::nginx::Context;
use crate::crd::{Nginx, NginxStatus, ResourceStatus};
use crate::labels::{format_labels, labels_for, namespace_of, owner_reference_for};
use crate::Error;

/// Recompute the status and persist it if it changed
pub async fn refresh_status(nginx: &Nginx, ctx: &Context) -> Result<(), Error> {
    let status = compute_status(nginx, ctx.kube.as_ref()).await?;

    // A missing status compares equal to the empty status
    if nginx.status.clone().unwrap_or_default() == status {
        debug!("status unchanged, skipping update");
        return Ok(());
    }

    ctx.kube.update_nginx_status(nginx, &status).await?;
    info!(
        current_replicas = status.current_replicas,
        deployments = status.deployments.len(),
        services = status.services.len(),
        ingresses = status.ingresses.len(),
        "updated nginx status"
    );
    Ok(())
}

/// Discover owned sub-resources and aggregate them
///
/// Objects are found by the standard label selector. When that finds
/// nothing for a kind (labels were overridden or removed), the whole
/// namespace is listed and filtered by controller owner reference.
pub async fn compute_status(nginx: &Nginx, kube: &dyn KubeClient) -> Result<NginxStatus, Error> {
    let namespace = namespace_of(nginx)?;
    let owner = owner_reference_for(nginx)?;
    let labels = labels_for(&nginx.name_any());
    let selector = format_labels(&labels);

    let mut deployments = kube.list_deployments(&namespace, &selector).await?;
    if deployments.is_empty() {
        deployments = owned_by(kube.list_deployments(&namespace, "").await?, &owner);
    }

    let mut services = kube.list_services(&namespace, &selector).await?;
    if services.is_empty() {
        services = owned_by(kube.list_services(&namespace, "").await?, &owner);
    }

    let mut ingresses = kube.list_ingresses(&namespace, &selector).await?;
    if ingresses.is_empty() {
        ingresses = owned_by(kube.list_ingresses(&namespace, "").await?, &owner);
    }

    Ok(NginxStatus {
        current_replicas: deployments
            .iter()
            .filter_map(|d| d.status.as_ref().and_then(|s| s.replicas))
            .sum(),
        pod_selector: selector,
        deployments: sorted_names(&deployments),
        services: sorted_names(&services),
        ingresses: sorted_names(&ingresses),
    })
}

/// Keep objects carrying an exact copy of `owner` among their owner references
fn owned_by<K: Resource>(items: Vec<K>, owner: &OwnerReference) -> Vec<K> {
    items
        .into_iter()
        .filter(|item| item.owner_references().iter().any(|r| r == owner))
        .collect()
}

fn sorted_names<K: Resource>(items: &[K]) -> Vec<ResourceStatus> {
    let mut names: Vec<ResourceStatus> = items
        .iter()
        .map(|item| ResourceStatus::new(item.name_any()))
        .collect();
    names.sort();
    names
}
