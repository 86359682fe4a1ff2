//! Nginx controller implementation
//!
//! Each pass converges the three sub-resources in a fixed order
//! (Deployment, Service, Ingress) and then refreshes the aggregated status.
//! A pass never retries locally: any failure ends it and the error policy
//! decides when the object is looked at again.

use std::collections::BTreeMap;
use std::sync::Arc;

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Service;
use k8s_openapi::api::networking::v1::Ingress;
use kube::runtime::controller::Action;
use kube::runtime::events::EventType;
use kube::{Client, Resource, ResourceExt};
use tracing::{debug, error, info, instrument, warn};

use super::client::{KubeClient, KubeClientImpl};
use super::status::refresh_status;
use crate::config::ControllerConfig;
use crate::crd::Nginx;
use crate::diff::{maps_eq, semantic_eq, semantic_subset};
use crate::events::{actions, reasons, EventPublisher, KubeEventPublisher};
use crate::labels::{namespace_of, SubResource};
use crate::workload::{
    build_deployment, build_ingress, build_service, foreign_annotations, GENERATED_FROM_ANNOTATION,
};
use crate::{Error, CONTROLLER_NAME};

#[cfg(test)]
use crate::events::NoopEventPublisher;

// =============================================================================
// Context
// =============================================================================

/// Shared state for every reconciliation
pub struct Context {
    /// Kubernetes client for API operations
    pub kube: Arc<dyn KubeClient>,
    /// Event publisher for emitting Kubernetes Events
    pub events: Arc<dyn EventPublisher>,
    /// Filter, requeue intervals
    pub config: ControllerConfig,
}

impl Context {
    /// Create a new Context with the given dependencies
    pub fn new(
        kube: Arc<dyn KubeClient>,
        events: Arc<dyn EventPublisher>,
        config: ControllerConfig,
    ) -> Self {
        Self {
            kube,
            events,
            config,
        }
    }

    /// Create a Context backed by a real Kubernetes client
    pub fn from_client(client: Client, config: ControllerConfig) -> Self {
        Self {
            kube: Arc::new(KubeClientImpl::new(client.clone())),
            events: Arc::new(KubeEventPublisher::new(client, CONTROLLER_NAME)),
            config,
        }
    }

    /// Create a context for testing with a mock client and no events
    #[cfg(test)]
    pub fn for_testing(kube: Arc<dyn KubeClient>) -> Self {
        Self::new(kube, Arc::new(NoopEventPublisher), ControllerConfig::default())
    }
}

// =============================================================================
// Reconcile
// =============================================================================

/// Converge one `Nginx` object
///
/// Objects rejected by the annotation filter are requeued without any API
/// writes. Otherwise the sub-resources are converged in order and the status
/// is refreshed; the next pass is triggered by a change to the object or to
/// one of its owned resources.
#[instrument(skip(nginx, ctx), fields(nginx = %nginx.name_any(), namespace = ?nginx.namespace()))]
pub async fn reconcile(nginx: Arc<Nginx>, ctx: Arc<Context>) -> Result<Action, Error> {
    if !ctx.config.annotation_filter.matches(nginx.annotations()) {
        debug!(filter = %ctx.config.annotation_filter, "annotations do not match filter, skipping");
        return Ok(Action::requeue(ctx.config.filter_requeue));
    }

    info!("reconciling nginx");

    if let Err(e) = nginx.spec.validate() {
        warn!(error = %e, "nginx validation failed");
        return Err(e);
    }

    reconcile_deployment(&nginx, &ctx).await?;
    reconcile_service(&nginx, &ctx).await?;
    reconcile_ingress(&nginx, &ctx).await?;
    refresh_status(&nginx, &ctx).await?;

    debug!("nginx converged");
    Ok(Action::await_change())
}

/// Error policy for the controller
pub fn error_policy(nginx: Arc<Nginx>, error: &Error, ctx: Arc<Context>) -> Action {
    error!(
        ?error,
        nginx = %nginx.name_any(),
        retryable = error.is_retryable(),
        "reconciliation failed"
    );

    if error.is_retryable() {
        Action::requeue(ctx.config.error_requeue)
    } else {
        // Permanent error - requires spec change to fix
        Action::await_change()
    }
}

// =============================================================================
// Deployment
// =============================================================================

/// Server-side apply the Deployment when it is missing or out of date
///
/// The Deployment is current when it was generated from the same spec and
/// still carries every field this controller sets. Anything else is applied;
/// fields dropped from the desired object are then removed by the server.
pub async fn reconcile_deployment(nginx: &Nginx, ctx: &Context) -> Result<(), Error> {
    let name = SubResource::Deployment.name_for(&nginx.name_any());
    let wrap = |e: Error| Error::for_sub_resource(SubResource::Deployment.kind(), name.clone(), e);

    let namespace = namespace_of(nginx).map_err(wrap)?;
    let desired = build_deployment(nginx).map_err(wrap)?;

    match ctx
        .kube
        .get_deployment(&name, &namespace)
        .await
        .map_err(wrap)?
    {
        None => {
            ctx.kube.apply_deployment(&desired).await.map_err(wrap)?;
            info!(deployment = %name, "created deployment");
        }
        Some(observed) => {
            let merged = merge_deployment(desired, &observed);
            if deployment_is_current(&merged, &observed) {
                debug!(deployment = %name, "deployment up to date");
                return Ok(());
            }
            ctx.kube.apply_deployment(&merged).await.map_err(wrap)?;
            info!(deployment = %name, "applied deployment");
        }
    }
    Ok(())
}

/// Carry forward the observed replica count when the spec leaves it unset
pub(crate) fn merge_deployment(mut desired: Deployment, observed: &Deployment) -> Deployment {
    if let Some(spec) = desired.spec.as_mut() {
        if spec.replicas.is_none() {
            let observed_replicas = observed.spec.as_ref().and_then(|s| s.replicas);
            spec.replicas = Some(observed_replicas.unwrap_or(1));
        }
    }
    desired
}

/// Same source spec, and every field set on `desired` holds on `observed`.
/// A spec that stops setting a field changes the source annotation, so
/// removals are never hidden behind the subset check.
fn deployment_is_current(desired: &Deployment, observed: &Deployment) -> bool {
    let generated_from = |d: &Deployment| d.annotations().get(GENERATED_FROM_ANNOTATION).cloned();
    generated_from(desired).is_some()
        && generated_from(desired) == generated_from(observed)
        && semantic_subset(desired, observed)
}

// =============================================================================
// Service
// =============================================================================

/// Create the Service, or replace it when it has drifted
///
/// Outcomes are reported as Events on the `Nginx` object.
pub async fn reconcile_service(nginx: &Nginx, ctx: &Context) -> Result<(), Error> {
    let name = SubResource::Service.name_for(&nginx.name_any());
    let wrap = |e: Error| Error::for_sub_resource(SubResource::Service.kind(), name.clone(), e);
    let object_ref = nginx.object_ref(&());

    let namespace = namespace_of(nginx).map_err(wrap)?;
    let desired = build_service(nginx).map_err(wrap)?;

    match ctx.kube.get_service(&name, &namespace).await.map_err(wrap)? {
        None => match ctx.kube.create_service(&desired).await {
            Ok(_) => {
                info!(service = %name, "created service");
                ctx.events
                    .publish(
                        &object_ref,
                        EventType::Normal,
                        reasons::SERVICE_CREATED,
                        actions::CREATE,
                        Some(format!("Created service {name}")),
                    )
                    .await;
            }
            Err(e) => {
                let reason = if e.is_quota_exceeded() {
                    reasons::SERVICE_QUOTA_EXCEEDED
                } else {
                    reasons::SERVICE_CREATION_FAILED
                };
                ctx.events
                    .publish(
                        &object_ref,
                        EventType::Warning,
                        reason,
                        actions::CREATE,
                        Some(format!("Failed to create service {name}: {e}")),
                    )
                    .await;
                return Err(wrap(e));
            }
        },
        Some(observed) => {
            let merged = merge_service(desired, &observed);
            if !service_needs_update(&merged, &observed) {
                debug!(service = %name, "service up to date");
                return Ok(());
            }
            match ctx.kube.update_service(&merged).await {
                Ok(_) => {
                    info!(service = %name, "updated service");
                    ctx.events
                        .publish(
                            &object_ref,
                            EventType::Normal,
                            reasons::SERVICE_UPDATED,
                            actions::UPDATE,
                            Some(format!("Updated service {name}")),
                        )
                        .await;
                }
                Err(e) => {
                    ctx.events
                        .publish(
                            &object_ref,
                            EventType::Warning,
                            reasons::SERVICE_UPDATE_FAILED,
                            actions::UPDATE,
                            Some(format!("Failed to update service {name}: {e}")),
                        )
                        .await;
                    return Err(wrap(e));
                }
            }
        }
    }
    Ok(())
}

/// Carry cluster-assigned and externally-owned fields from `observed`
///
/// Preserved: resourceVersion, finalizers, annotations the desired object
/// does not set, clusterIP(s), healthCheckNodePort, and for NodePort or
/// LoadBalancer Services the node port of each port number.
pub(crate) fn merge_service(mut desired: Service, observed: &Service) -> Service {
    desired.metadata.resource_version = observed.metadata.resource_version.clone();
    desired.metadata.finalizers = observed.metadata.finalizers.clone();

    let foreign: BTreeMap<String, String> = foreign_annotations(
        desired.metadata.annotations.as_ref(),
        observed.metadata.annotations.as_ref(),
    )
    .map(|(k, v)| (k.clone(), v.clone()))
    .collect();
    if !foreign.is_empty() {
        desired
            .metadata
            .annotations
            .get_or_insert_with(BTreeMap::new)
            .extend(foreign);
    }

    if let (Some(spec), Some(observed_spec)) = (desired.spec.as_mut(), observed.spec.as_ref()) {
        spec.cluster_ip = observed_spec.cluster_ip.clone();
        spec.cluster_ips = observed_spec.cluster_ips.clone();
        spec.health_check_node_port = observed_spec.health_check_node_port;

        if matches!(spec.type_.as_deref(), Some("NodePort" | "LoadBalancer")) {
            for port in spec.ports.iter_mut().flatten() {
                port.node_port = observed_spec
                    .ports
                    .iter()
                    .flatten()
                    .find(|p| p.port == port.port)
                    .and_then(|p| p.node_port);
            }
        }
    }
    desired
}

/// Fields set on the merged Service must match; labels and the selector are
/// owned outright, so extra observed entries also count as drift.
fn service_needs_update(merged: &Service, observed: &Service) -> bool {
    let selector = |s: &Service| s.spec.as_ref().and_then(|spec| spec.selector.clone());
    !semantic_subset(merged, observed)
        || !maps_eq(
            merged.metadata.labels.as_ref(),
            observed.metadata.labels.as_ref(),
        )
        || !maps_eq(selector(merged).as_ref(), selector(observed).as_ref())
}

// =============================================================================
// Ingress
// =============================================================================

/// Create, update or delete the Ingress to match `spec.ingress`
pub async fn reconcile_ingress(nginx: &Nginx, ctx: &Context) -> Result<(), Error> {
    let name = SubResource::Ingress.name_for(&nginx.name_any());
    let wrap = |e: Error| Error::for_sub_resource(SubResource::Ingress.kind(), name.clone(), e);

    let namespace = namespace_of(nginx).map_err(wrap)?;
    let desired = build_ingress(nginx).map_err(wrap)?;
    let observed = ctx.kube.get_ingress(&name, &namespace).await.map_err(wrap)?;

    match (desired, observed) {
        (None, None) => {
            debug!(ingress = %name, "no ingress requested");
        }
        (Some(desired), None) => {
            ctx.kube.create_ingress(&desired).await.map_err(wrap)?;
            info!(ingress = %name, "created ingress");
        }
        (None, Some(_)) => {
            ctx.kube
                .delete_ingress(&name, &namespace)
                .await
                .map_err(wrap)?;
            info!(ingress = %name, "deleted ingress no longer requested");
        }
        (Some(mut desired), Some(observed)) => {
            if !ingress_needs_update(&desired, &observed) {
                debug!(ingress = %name, "ingress up to date");
                return Ok(());
            }
            desired.metadata.resource_version = observed.metadata.resource_version.clone();
            desired.metadata.finalizers = observed.metadata.finalizers.clone();
            ctx.kube.update_ingress(&desired).await.map_err(wrap)?;
            info!(ingress = %name, "updated ingress");
        }
    }
    Ok(())
}

fn ingress_needs_update(desired: &Ingress, observed: &Ingress) -> bool {
    !maps_eq(
        desired.metadata.annotations.as_ref(),
        observed.metadata.annotations.as_ref(),
    ) || !maps_eq(
        desired.metadata.labels.as_ref(),
        observed.metadata.labels.as_ref(),
    ) || !semantic_eq(&desired.spec, &observed.spec)
}

// =============================================================================
// Tests
// =============================================================================
