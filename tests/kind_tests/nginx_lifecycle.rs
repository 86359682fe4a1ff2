//! Integration tests for the Nginx lifecycle
//!
//! These tests run reconcile passes against a real API server so that
//! server-side defaulting is part of what the convergence logic sees.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Service;
use k8s_openapi::api::networking::v1::Ingress;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, PostParams};
use kube::runtime::controller::Action;
use kube::{Client, ResourceExt};

use nginx_operator::config::ControllerConfig;
use nginx_operator::controller::{reconcile, Context};
use nginx_operator::crd::{Nginx, NginxIngress, NginxSpec, NginxTls};

use super::helpers::{cleanup_nginx, ensure_test_cluster, TEST_NAMESPACE};

// =============================================================================
// Test Fixtures
// =============================================================================

fn site(name: &str) -> Nginx {
    Nginx {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(TEST_NAMESPACE.to_string()),
            ..Default::default()
        },
        spec: NginxSpec {
            tls: vec![NginxTls {
                secret_name: "tls1".to_string(),
                hosts: vec!["a.com".to_string()],
            }],
            ingress: Some(NginxIngress::default()),
            ..Default::default()
        },
        status: None,
    }
}

fn create_test_context(client: Client) -> Arc<Context> {
    Arc::new(Context::from_client(client, ControllerConfig::default()))
}

/// Reconcile the freshly read object, as the controller would
async fn reconcile_latest(client: &Client, name: &str) -> Action {
    let api: Api<Nginx> = Api::namespaced(client.clone(), TEST_NAMESPACE);
    let nginx = api.get(name).await.expect("failed to get nginx");
    reconcile(Arc::new(nginx), create_test_context(client.clone()))
        .await
        .expect("reconcile failed")
}

// =============================================================================
// Stories
// =============================================================================

/// Story: a new Nginx gets its Deployment, Service and Ingress, and the
/// status lists all three
#[tokio::test]
#[ignore = "requires kind cluster - run with: cargo test --test kind -- --ignored"]
async fn story_new_nginx_gets_its_sub_resources() {
    let client = ensure_test_cluster()
        .await
        .expect("failed to setup cluster");
    let name = "lifecycle-create";
    cleanup_nginx(&client, name).await;

    let api: Api<Nginx> = Api::namespaced(client.clone(), TEST_NAMESPACE);
    api.create(&PostParams::default(), &site(name))
        .await
        .expect("failed to create nginx");

    let action = reconcile_latest(&client, name).await;
    assert_eq!(action, Action::await_change());

    let deployments: Api<Deployment> = Api::namespaced(client.clone(), TEST_NAMESPACE);
    let deployment = deployments.get(name).await.expect("deployment missing");
    assert_eq!(deployment.owner_references()[0].name, name);

    let services: Api<Service> = Api::namespaced(client.clone(), TEST_NAMESPACE);
    let service = services
        .get(&format!("{name}-service"))
        .await
        .expect("service missing");
    assert!(service.spec.unwrap().cluster_ip.is_some());

    let ingresses: Api<Ingress> = Api::namespaced(client.clone(), TEST_NAMESPACE);
    ingresses
        .get(&format!("{name}-ingress"))
        .await
        .expect("ingress missing");

    let status = api
        .get(name)
        .await
        .expect("failed to get nginx")
        .status
        .expect("status should be written");
    assert_eq!(status.deployments[0].name, name);
    assert_eq!(status.services[0].name, format!("{name}-service"));
    assert_eq!(status.ingresses[0].name, format!("{name}-ingress"));

    cleanup_nginx(&client, name).await;
}

/// Story: a second pass leaves every sub-resource at the same resourceVersion
#[tokio::test]
#[ignore = "requires kind cluster - run with: cargo test --test kind -- --ignored"]
async fn story_second_pass_writes_nothing() {
    let client = ensure_test_cluster()
        .await
        .expect("failed to setup cluster");
    let name = "lifecycle-idempotent";
    cleanup_nginx(&client, name).await;

    let api: Api<Nginx> = Api::namespaced(client.clone(), TEST_NAMESPACE);
    api.create(&PostParams::default(), &site(name))
        .await
        .expect("failed to create nginx");
    reconcile_latest(&client, name).await;
    // Let the deployment controller settle its own writes
    tokio::time::sleep(Duration::from_secs(2)).await;

    let deployments: Api<Deployment> = Api::namespaced(client.clone(), TEST_NAMESPACE);
    let services: Api<Service> = Api::namespaced(client.clone(), TEST_NAMESPACE);
    let ingresses: Api<Ingress> = Api::namespaced(client.clone(), TEST_NAMESPACE);
    let service_name = format!("{name}-service");
    let ingress_name = format!("{name}-ingress");

    let before = (
        deployments.get(name).await.unwrap().metadata.generation,
        services.get(&service_name).await.unwrap().resource_version(),
        ingresses.get(&ingress_name).await.unwrap().resource_version(),
        api.get(name).await.unwrap().resource_version(),
    );

    reconcile_latest(&client, name).await;

    let after = (
        deployments.get(name).await.unwrap().metadata.generation,
        services.get(&service_name).await.unwrap().resource_version(),
        ingresses.get(&ingress_name).await.unwrap().resource_version(),
        api.get(name).await.unwrap().resource_version(),
    );
    assert_eq!(before, after);

    cleanup_nginx(&client, name).await;
}

/// Story: removing the ingress overlay removes the Ingress
#[tokio::test]
#[ignore = "requires kind cluster - run with: cargo test --test kind -- --ignored"]
async fn story_removing_ingress_overlay_deletes_ingress() {
    let client = ensure_test_cluster()
        .await
        .expect("failed to setup cluster");
    let name = "lifecycle-ingress";
    cleanup_nginx(&client, name).await;

    let api: Api<Nginx> = Api::namespaced(client.clone(), TEST_NAMESPACE);
    api.create(&PostParams::default(), &site(name))
        .await
        .expect("failed to create nginx");
    reconcile_latest(&client, name).await;

    let mut nginx = api.get(name).await.unwrap();
    nginx.spec.ingress = None;
    api.replace(name, &PostParams::default(), &nginx)
        .await
        .expect("failed to update nginx");
    reconcile_latest(&client, name).await;

    let ingresses: Api<Ingress> = Api::namespaced(client.clone(), TEST_NAMESPACE);
    assert!(ingresses
        .get_opt(&format!("{name}-ingress"))
        .await
        .unwrap()
        .is_none());

    cleanup_nginx(&client, name).await;
}

/// Story: a node selector removed from the spec is removed from the
/// Deployment by server-side apply
#[tokio::test]
#[ignore = "requires kind cluster - run with: cargo test --test kind -- --ignored"]
async fn story_removed_node_selector_leaves_the_deployment() {
    let client = ensure_test_cluster()
        .await
        .expect("failed to setup cluster");
    let name = "lifecycle-node-selector";
    cleanup_nginx(&client, name).await;

    let api: Api<Nginx> = Api::namespaced(client.clone(), TEST_NAMESPACE);
    let mut nginx = site(name);
    nginx.spec.pod_template.node_selector =
        BTreeMap::from([("kubernetes.io/os".to_string(), "linux".to_string())]);
    api.create(&PostParams::default(), &nginx)
        .await
        .expect("failed to create nginx");
    reconcile_latest(&client, name).await;

    let mut nginx = api.get(name).await.unwrap();
    nginx.spec.pod_template.node_selector.clear();
    api.replace(name, &PostParams::default(), &nginx)
        .await
        .expect("failed to update nginx");
    reconcile_latest(&client, name).await;

    let deployments: Api<Deployment> = Api::namespaced(client.clone(), TEST_NAMESPACE);
    let pod = deployments
        .get(name)
        .await
        .unwrap()
        .spec
        .unwrap()
        .template
        .spec
        .unwrap();
    assert!(pod.node_selector.unwrap_or_default().is_empty());

    cleanup_nginx(&client, name).await;
}
