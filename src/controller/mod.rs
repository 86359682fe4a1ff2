//! Controller for the `Nginx` CRD
//!
//! Observe, diff, act: each pass builds the desired sub-resources, compares
//! them with what the cluster holds and writes only the difference.

mod client;
mod nginx;
mod status;

pub use client::{KubeClient, KubeClientImpl};
pub use nginx::{
    error_policy, reconcile, reconcile_deployment, reconcile_ingress, reconcile_service, Context,
};
pub use status::{compute_status, refresh_status};
