//! Access to the two clusters the operator talks to.
//!
//! The control cluster holds claims and the generated kubeconfig Secrets, the
//! target cluster holds the ServiceAccount and RBAC objects. Both are reached
//! through [`Cluster`], which hands back raw [`kube::Error`]s so that callers
//! decide which failures are benign.

use std::fmt::Debug;

use async_trait::async_trait;
use k8s_openapi::api::{
    core::v1::{Secret, ServiceAccount},
    rbac::v1::{ClusterRole, ClusterRoleBinding, Role, RoleBinding},
};
use kube::{
    api::{DeleteParams, Patch, PatchParams, PostParams},
    core::ErrorResponse,
    runtime::reflector::ObjectRef,
    Api, Client, Resource, ResourceExt,
};
use serde::{de::DeserializeOwned, Serialize};
use tracing::debug;

use crate::resources::{PermissionClaim, MANAGER};

/// Which cluster a kind lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Location {
    Control,
    Target,
}

/// A kind the operator reads or writes
pub trait Managed:
    Resource<DynamicType = ()> + Clone + Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
    const LOCATION: Location;

    /// Build an API handle scoped the way this kind is scoped.
    fn api(client: Client, namespace: Option<&str>) -> Api<Self>;
}

macro_rules! namespaced {
    ($($kind:ty => $location:expr),* $(,)?) => {$(
        impl Managed for $kind {
            const LOCATION: Location = $location;

            fn api(client: Client, namespace: Option<&str>) -> Api<Self> {
                match namespace {
                    Some(ns) => Api::namespaced(client, ns),
                    None => Api::all(client),
                }
            }
        }
    )*};
}

macro_rules! cluster_scoped {
    ($($kind:ty => $location:expr),* $(,)?) => {$(
        impl Managed for $kind {
            const LOCATION: Location = $location;

            fn api(client: Client, _namespace: Option<&str>) -> Api<Self> {
                Api::all(client)
            }
        }
    )*};
}

namespaced! {
    PermissionClaim => Location::Control,
    Secret => Location::Control,
    ServiceAccount => Location::Target,
    Role => Location::Target,
    RoleBinding => Location::Target,
}

cluster_scoped! {
    ClusterRole => Location::Target,
    ClusterRoleBinding => Location::Target,
}

/// Object operations against a single cluster
#[async_trait]
pub trait Cluster: Send + Sync {
    /// Fetch an object, mapping "not found" to `None`.
    async fn get<K: Managed>(&self, key: &ObjectRef<K>) -> Result<Option<K>, kube::Error>;

    async fn create<K: Managed>(&self, obj: &K) -> Result<K, kube::Error>;

    /// Overwrite an object. Fails with a conflict when its `resourceVersion` is stale.
    async fn replace<K: Managed>(&self, obj: &K) -> Result<K, kube::Error>;

    /// Merge the given value into the status subresource.
    async fn patch_status<K: Managed>(
        &self,
        obj: &K,
        status: serde_json::Value,
    ) -> Result<K, kube::Error>;

    async fn delete<K: Managed>(&self, key: &ObjectRef<K>) -> Result<(), kube::Error>;
}

/// A [`Cluster`] backed by a real API server
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
}

impl KubeCluster {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api<K: Managed>(&self, namespace: Option<&str>) -> Api<K> {
        K::api(self.client.clone(), namespace)
    }

    fn post_params() -> PostParams {
        PostParams {
            field_manager: Some(MANAGER.into()),
            ..Default::default()
        }
    }
}

#[async_trait]
impl Cluster for KubeCluster {
    async fn get<K: Managed>(&self, key: &ObjectRef<K>) -> Result<Option<K>, kube::Error> {
        self.api::<K>(key.namespace.as_deref())
            .get_opt(&key.name)
            .await
    }

    async fn create<K: Managed>(&self, obj: &K) -> Result<K, kube::Error> {
        debug!("creating {} {}", K::kind(&()), obj.name_any());
        self.api::<K>(obj.namespace().as_deref())
            .create(&Self::post_params(), obj)
            .await
    }

    async fn replace<K: Managed>(&self, obj: &K) -> Result<K, kube::Error> {
        debug!("replacing {} {}", K::kind(&()), obj.name_any());
        self.api::<K>(obj.namespace().as_deref())
            .replace(&obj.name_any(), &Self::post_params(), obj)
            .await
    }

    async fn patch_status<K: Managed>(
        &self,
        obj: &K,
        status: serde_json::Value,
    ) -> Result<K, kube::Error> {
        let patch = Patch::Merge(serde_json::json!({ "status": status }));
        self.api::<K>(obj.namespace().as_deref())
            .patch_status(&obj.name_any(), &PatchParams::apply(MANAGER), &patch)
            .await
    }

    async fn delete<K: Managed>(&self, key: &ObjectRef<K>) -> Result<(), kube::Error> {
        debug!("deleting {} {}", K::kind(&()), key);
        self.api::<K>(key.namespace.as_deref())
            .delete(&key.name, &DeleteParams::default())
            .await
            .map(|_| ())
    }
}

fn api_error(e: &kube::Error) -> Option<&ErrorResponse> {
    match e {
        kube::Error::Api(response) => Some(response),
        _ => None,
    }
}

pub fn is_not_found(e: &kube::Error) -> bool {
    api_error(e).is_some_and(|r| r.code == 404)
}

pub fn is_already_exists(e: &kube::Error) -> bool {
    api_error(e).is_some_and(|r| r.code == 409 && r.reason == "AlreadyExists")
}

/// A stale `resourceVersion` on update
#[cfg(test)]
pub(crate) fn is_conflict(e: &kube::Error) -> bool {
    api_error(e).is_some_and(|r| r.code == 409 && r.reason == "Conflict")
}

#[cfg(test)]
mod tests {
    use http::{Request, Response};
    use hyper::Body;
    use kube::Client;
    use serde_json::json;

    use super::*;
    use crate::fixtures;

    fn mock_cluster() -> (KubeCluster, tower_test::mock::Handle<Request<Body>, Response<Body>>) {
        let (mock_service, handle) = tower_test::mock::pair::<Request<Body>, Response<Body>>();
        let client = Client::new(mock_service, "default");
        (KubeCluster::new(client), handle)
    }

    #[tokio::test]
    async fn get_maps_not_found_to_none() {
        let (cluster, mut handle) = mock_cluster();
        let server = tokio::spawn(async move {
            let (request, send) = handle.next_request().await.expect("service not called");
            assert_eq!(request.method(), http::Method::GET);
            assert_eq!(
                request.uri().path(),
                "/apis/rbac.authorization.k8s.io/v1/namespaces/team-a/roles/demo"
            );
            let body = json!({
                "kind": "Status",
                "apiVersion": "v1",
                "metadata": {},
                "status": "Failure",
                "message": "roles.rbac.authorization.k8s.io \"demo\" not found",
                "reason": "NotFound",
                "code": 404
            });
            send.send_response(
                Response::builder()
                    .status(404)
                    .body(Body::from(serde_json::to_vec(&body).unwrap()))
                    .unwrap(),
            );
        });

        let key = ObjectRef::<Role>::new("demo").within("team-a");
        let found = cluster.get(&key).await.unwrap();
        assert!(found.is_none());
        server.await.unwrap();
    }

    #[tokio::test]
    async fn cluster_scoped_creates_post_to_the_cluster_path() {
        let (cluster, mut handle) = mock_cluster();
        let server = tokio::spawn(async move {
            let (request, send) = handle.next_request().await.expect("service not called");
            assert_eq!(request.method(), http::Method::POST);
            assert_eq!(
                request.uri().path(),
                "/apis/rbac.authorization.k8s.io/v1/clusterroles"
            );
            let query = request.uri().query().unwrap_or_default().to_string();
            assert!(query.contains("fieldManager=permission-claim-operator"));
            let body = hyper::body::to_bytes(request.into_body()).await.unwrap();
            let role: ClusterRole = serde_json::from_slice(&body).unwrap();
            send.send_response(
                Response::builder()
                    .body(Body::from(serde_json::to_vec(&role).unwrap()))
                    .unwrap(),
            );
        });

        let mut role = ClusterRole::default();
        role.metadata.name = Some("demo".into());
        let created = cluster.create(&role).await.unwrap();
        assert_eq!(created.name_any(), "demo");
        server.await.unwrap();
    }

    #[test]
    fn classifies_api_errors() {
        assert!(is_not_found(&fixtures::not_found("roles", "demo")));
        assert!(is_already_exists(&fixtures::already_exists("roles", "demo")));
        assert!(!is_conflict(&fixtures::already_exists("roles", "demo")));
        assert!(is_conflict(&fixtures::conflict("roles", "demo")));
        assert!(!is_not_found(&fixtures::internal("boom")));
    }
}
