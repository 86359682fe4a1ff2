//! Kubernetes Event recording
//!
//! A trait-based wrapper over `kube::runtime::events::Recorder` so the
//! reconcilers can report sub-resource outcomes on the `Nginx` object,
//! visible via `kubectl describe nginx`.
//!
//! Events are fire-and-forget: failures are logged and never propagate.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::Client;
use tracing::warn;

#[cfg(test)]
use mockall::automock;

/// Trait for publishing Kubernetes Events
#[cfg_attr(test, automock)]
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish an Event about `resource_ref`
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    );
}

/// Production implementation wrapping `kube::runtime::events::Recorder`
pub struct KubeEventPublisher {
    recorder: Recorder,
}

impl KubeEventPublisher {
    /// Create a publisher reporting as `controller_name`
    pub fn new(client: Client, controller_name: &str) -> Self {
        let reporter = Reporter {
            controller: controller_name.to_string(),
            instance: None,
        };
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }
}

#[async_trait]
impl EventPublisher for KubeEventPublisher {
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        let event = Event {
            type_,
            reason: reason.to_string(),
            note,
            action: action.to_string(),
            secondary: None,
        };
        if let Err(e) = self.recorder.publish(&event, resource_ref).await {
            warn!(reason, action, error = %e, "failed to publish Kubernetes event");
        }
    }
}

/// Publisher that drops every event
pub struct NoopEventPublisher;

#[async_trait]
impl EventPublisher for NoopEventPublisher {
    async fn publish(
        &self,
        _resource_ref: &ObjectReference,
        _type_: EventType,
        _reason: &str,
        _action: &str,
        _note: Option<String>,
    ) {
    }
}

/// Event reasons, shown in the REASON column of `kubectl get events`
pub mod reasons {
    /// Service created
    pub const SERVICE_CREATED: &str = "ServiceCreated";
    /// Service create rejected
    pub const SERVICE_CREATION_FAILED: &str = "ServiceCreationFailed";
    /// Service create rejected by a ResourceQuota
    pub const SERVICE_QUOTA_EXCEEDED: &str = "ServiceQuotaExceeded";
    /// Service updated
    pub const SERVICE_UPDATED: &str = "ServiceUpdated";
    /// Service update rejected
    pub const SERVICE_UPDATE_FAILED: &str = "ServiceUpdateFailed";
}

/// Event actions
pub mod actions {
    /// Object creation
    pub const CREATE: &str = "Create";
    /// Object update
    pub const UPDATE: &str = "Update";
}
