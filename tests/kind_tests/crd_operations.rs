//! Integration tests for CRD operations
//!
//! These tests tell the story of how users interact with Nginx resources
//! through the Kubernetes API.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, PostParams};

use nginx_operator::crd::{ConfigKind, ConfigRef, Nginx, NginxSpec, NginxTls};

use super::helpers::{cleanup_nginx, ensure_test_cluster, TEST_NAMESPACE};

fn sample_nginx(name: &str) -> Nginx {
    Nginx {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(TEST_NAMESPACE.to_string()),
            ..Default::default()
        },
        spec: NginxSpec {
            replicas: Some(2),
            config: Some(ConfigRef {
                kind: ConfigKind::Inline,
                name: None,
                value: Some("events {}\nhttp { server { listen 80; } }".to_string()),
            }),
            tls: vec![NginxTls {
                secret_name: "site-tls".to_string(),
                hosts: vec!["site.example.com".to_string()],
            }],
            ..Default::default()
        },
        status: None,
    }
}

/// Story: a user applies an Nginx and reads back exactly what they wrote
#[tokio::test]
#[ignore = "requires kind cluster - run with: cargo test --test kind -- --ignored"]
async fn story_nginx_round_trips_through_the_api() {
    let client = ensure_test_cluster()
        .await
        .expect("failed to setup cluster");
    let api: Api<Nginx> = Api::namespaced(client.clone(), TEST_NAMESPACE);
    let name = "crd-round-trip";
    cleanup_nginx(&client, name).await;

    api.create(&PostParams::default(), &sample_nginx(name))
        .await
        .expect("failed to create nginx");

    let fetched = api.get(name).await.expect("failed to get nginx");
    assert_eq!(fetched.spec.replicas, Some(2));
    let config = fetched.spec.config.expect("config should persist");
    assert_eq!(config.kind, ConfigKind::Inline);
    assert!(config.value.unwrap().contains("listen 80"));
    assert_eq!(fetched.spec.tls[0].hosts, vec!["site.example.com"]);
    assert!(fetched.status.is_none());

    cleanup_nginx(&client, name).await;
}

/// Story: the scale subresource reads replicas from the spec
#[tokio::test]
#[ignore = "requires kind cluster - run with: cargo test --test kind -- --ignored"]
async fn story_scale_subresource_tracks_spec_replicas() {
    let client = ensure_test_cluster()
        .await
        .expect("failed to setup cluster");
    let api: Api<Nginx> = Api::namespaced(client.clone(), TEST_NAMESPACE);
    let name = "crd-scale";
    cleanup_nginx(&client, name).await;

    api.create(&PostParams::default(), &sample_nginx(name))
        .await
        .expect("failed to create nginx");

    let scale = api.get_scale(name).await.expect("failed to get scale");
    assert_eq!(scale.spec.and_then(|s| s.replicas), Some(2));

    cleanup_nginx(&client, name).await;
}
