//! Custom Resource Definitions for the nginx operator
//!
//! - [`Nginx`] - a managed nginx deployment with its Service and optional Ingress

mod nginx;

pub use nginx::{
    ConfigKind, ConfigRef, Nginx, NginxIngress, NginxPodTemplate, NginxService, NginxSpec,
    NginxStatus, NginxTls, ResourceStatus,
};
