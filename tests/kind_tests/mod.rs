//! Integration tests for nginx-operator
//!
//! These tests require a Kubernetes cluster (kind) to run and tell the story
//! of how users interact with `Nginx` resources on a real API server.
//!
//! # Test Organization
//!
//! - `crd_operations`: creating, reading and validating `Nginx` objects
//!   through the Kubernetes API
//!
//! - `nginx_lifecycle`: reconcile passes against the real API server,
//!   covering sub-resource creation, idempotence and ingress removal
//!
//! # Running These Tests
//!
//! ```bash
//! cargo test --test kind -- --ignored
//!
//! # A single story, with output
//! cargo test --test kind nginx_lifecycle -- --ignored --nocapture
//! ```

mod crd_operations;
mod helpers;
mod nginx_lifecycle;
