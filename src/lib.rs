//! nginx-operator - declarative convergence controller for `Nginx` resources
//!
//! For every `Nginx` custom resource the operator maintains three sub-resources
//! in the same namespace and reports an aggregated status back onto the spec
//! object:
//!
//! - a Deployment named `<name>` running the nginx container plus any sidecars
//! - a Service named `<name>-service` exposing ports 80 and 443
//! - an optional Ingress named `<name>-ingress`, present only when requested
//!
//! # Modules
//!
//! - [`crd`] - The `Nginx` custom resource definition
//! - [`labels`] - Naming, standard labels and owner references
//! - [`workload`] - Pure builders for the desired sub-resources
//! - [`diff`] - Semantic comparison of desired and observed objects
//! - [`filter`] - Annotation-based admission filter
//! - [`controller`] - Reconcilers, status aggregation and the cluster store
//! - [`events`] - Kubernetes Event publishing
//! - [`config`] - Controller configuration
//! - [`telemetry`] - Logging setup
//! - [`error`] - Error types for the operator

#![warn(missing_docs)]

pub mod config;
pub mod controller;
pub mod crd;
pub mod diff;
pub mod error;
pub mod events;
pub mod filter;
pub mod labels;
pub mod telemetry;
pub mod workload;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

// =============================================================================
// Default Configuration Constants
// =============================================================================

/// API group of the `Nginx` resource, also used as the label/annotation prefix
pub const GROUP: &str = "devops.github.com";

/// Container image used when a spec leaves `image` empty
pub const DEFAULT_IMAGE: &str = "nginx:latest";

/// Field manager / reporting component name used against the API server
pub const CONTROLLER_NAME: &str = "nginx-operator";
