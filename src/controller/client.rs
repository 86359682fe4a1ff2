//! Cluster store: the typed API calls the reconcilers make
//!
//! `KubeClient` is the seam between convergence logic and the API server.
//! Production uses [`KubeClientImpl`]; unit tests use the mockall-generated
//! `MockKubeClient`.

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Service;
use k8s_openapi::api::networking::v1::Ingress;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::NamespaceResourceScope;
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::{Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use crate::crd::{Nginx, NginxStatus};
use crate::{Error, CONTROLLER_NAME};

/// Trait abstracting the Kubernetes calls made during convergence
///
/// `get_*` return `Ok(None)` for objects that do not exist. An empty
/// `label_selector` lists the whole namespace.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait KubeClient: Send + Sync {
    /// Get a Deployment by name and namespace
    async fn get_deployment(&self, name: &str, namespace: &str)
        -> Result<Option<Deployment>, Error>;

    /// List Deployments in a namespace
    async fn list_deployments(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<Deployment>, Error>;

    /// Server-side apply a Deployment as this controller's field manager
    ///
    /// Creates the Deployment if it does not exist. Fields this manager set
    /// previously and no longer sends are removed; fields owned by other
    /// managers are left alone.
    async fn apply_deployment(&self, deployment: &Deployment) -> Result<Deployment, Error>;

    /// Get a Service by name and namespace
    async fn get_service(&self, name: &str, namespace: &str) -> Result<Option<Service>, Error>;

    /// List Services in a namespace
    async fn list_services(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<Service>, Error>;

    /// Create a Service
    async fn create_service(&self, service: &Service) -> Result<Service, Error>;

    /// Replace a Service (optimistic concurrency via resourceVersion)
    async fn update_service(&self, service: &Service) -> Result<Service, Error>;

    /// Get an Ingress by name and namespace
    async fn get_ingress(&self, name: &str, namespace: &str) -> Result<Option<Ingress>, Error>;

    /// List Ingresses in a namespace
    async fn list_ingresses(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<Ingress>, Error>;

    /// Create an Ingress
    async fn create_ingress(&self, ingress: &Ingress) -> Result<Ingress, Error>;

    /// Replace an Ingress (optimistic concurrency via resourceVersion)
    async fn update_ingress(&self, ingress: &Ingress) -> Result<Ingress, Error>;

    /// Delete an Ingress; deleting a missing Ingress succeeds
    async fn delete_ingress(&self, name: &str, namespace: &str) -> Result<(), Error>;

    /// Write the status subresource of an Nginx
    async fn update_nginx_status(&self, nginx: &Nginx, status: &NginxStatus)
        -> Result<(), Error>;
}

/// Real Kubernetes client implementation
pub struct KubeClientImpl {
    client: Client,
}

impl KubeClientImpl {
    /// Create a new KubeClientImpl wrapping the given client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api<K>(&self, namespace: &str) -> Api<K>
    where
        K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>,
    {
        Api::namespaced(self.client.clone(), namespace)
    }

    async fn get<K>(&self, name: &str, namespace: &str) -> Result<Option<K>, Error>
    where
        K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
            + Clone
            + DeserializeOwned
            + std::fmt::Debug,
    {
        match self.api::<K>(namespace).get(name).await {
            Ok(obj) => Ok(Some(obj)),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(None),
            Err(e) => Err(classify(e)),
        }
    }

    async fn list<K>(&self, namespace: &str, label_selector: &str) -> Result<Vec<K>, Error>
    where
        K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
            + Clone
            + DeserializeOwned
            + std::fmt::Debug,
    {
        let mut params = ListParams::default();
        if !label_selector.is_empty() {
            params = params.labels(label_selector);
        }
        let list = self
            .api::<K>(namespace)
            .list(&params)
            .await
            .map_err(classify)?;
        Ok(list.items)
    }

    async fn create<K>(&self, obj: &K) -> Result<K, Error>
    where
        K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
            + Clone
            + Serialize
            + DeserializeOwned
            + std::fmt::Debug,
    {
        let (_, namespace) = identity(obj.meta())?;
        self.api::<K>(&namespace)
            .create(&post_params(), obj)
            .await
            .map_err(classify)
    }

    async fn replace<K>(&self, obj: &K) -> Result<K, Error>
    where
        K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
            + Clone
            + Serialize
            + DeserializeOwned
            + std::fmt::Debug,
    {
        let (name, namespace) = identity(obj.meta())?;
        self.api::<K>(&namespace)
            .replace(&name, &post_params(), obj)
            .await
            .map_err(classify)
    }
}

fn post_params() -> PostParams {
    PostParams {
        field_manager: Some(CONTROLLER_NAME.to_string()),
        ..Default::default()
    }
}

/// Name and namespace of an object about to be written
fn identity(meta: &ObjectMeta) -> Result<(String, String), Error> {
    match (&meta.name, &meta.namespace) {
        (Some(name), Some(namespace)) => Ok((name.clone(), namespace.clone())),
        _ => Err(Error::invariant("object is missing a name or namespace")),
    }
}

/// Map API failures onto the error kinds the reconcilers act on
pub(crate) fn classify(err: kube::Error) -> Error {
    if let kube::Error::Api(ae) = &err {
        if ae.code == 409 {
            return Error::conflict(ae.message.clone());
        }
        if ae.code == 403 && ae.message.contains("exceeded quota") {
            return Error::quota_exceeded(ae.message.clone());
        }
    }
    Error::Kube(err)
}

#[async_trait]
impl KubeClient for KubeClientImpl {
    async fn get_deployment(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<Option<Deployment>, Error> {
        self.get(name, namespace).await
    }

    async fn list_deployments(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<Deployment>, Error> {
        self.list(namespace, label_selector).await
    }

    async fn apply_deployment(&self, deployment: &Deployment) -> Result<Deployment, Error> {
        let (name, namespace) = identity(&deployment.metadata)?;
        let params = PatchParams::apply(CONTROLLER_NAME).force();
        debug!(deployment = %name, "applying deployment");
        self.api::<Deployment>(&namespace)
            .patch(&name, &params, &Patch::Apply(deployment))
            .await
            .map_err(classify)
    }

    async fn get_service(&self, name: &str, namespace: &str) -> Result<Option<Service>, Error> {
        self.get(name, namespace).await
    }

    async fn list_services(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<Service>, Error> {
        self.list(namespace, label_selector).await
    }

    async fn create_service(&self, service: &Service) -> Result<Service, Error> {
        self.create(service).await
    }

    async fn update_service(&self, service: &Service) -> Result<Service, Error> {
        self.replace(service).await
    }

    async fn get_ingress(&self, name: &str, namespace: &str) -> Result<Option<Ingress>, Error> {
        self.get(name, namespace).await
    }

    async fn list_ingresses(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<Ingress>, Error> {
        self.list(namespace, label_selector).await
    }

    async fn create_ingress(&self, ingress: &Ingress) -> Result<Ingress, Error> {
        self.create(ingress).await
    }

    async fn update_ingress(&self, ingress: &Ingress) -> Result<Ingress, Error> {
        self.replace(ingress).await
    }

    async fn delete_ingress(&self, name: &str, namespace: &str) -> Result<(), Error> {
        match self
            .api::<Ingress>(namespace)
            .delete(name, &DeleteParams::default())
            .await
        {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(ae)) if ae.code == 404 => {
                debug!(ingress = %name, "ingress already deleted");
                Ok(())
            }
            Err(e) => Err(classify(e)),
        }
    }

    async fn update_nginx_status(
        &self,
        nginx: &Nginx,
        status: &NginxStatus,
    ) -> Result<(), Error> {
        let name = nginx.name_any();
        let namespace = nginx
            .namespace()
            .ok_or_else(|| Error::invariant(format!("Nginx {name} is missing a namespace")))?;

        // resourceVersion in the body makes the write conditional
        let mut patch = json!({ "status": status });
        if let Some(rv) = nginx.resource_version() {
            patch["metadata"] = json!({ "resourceVersion": rv });
        }

        self.api::<Nginx>(&namespace)
            .patch_status(&name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(classify)?;
        Ok(())
    }
}
