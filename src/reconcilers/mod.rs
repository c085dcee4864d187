use std::sync::Arc;

use k8s_openapi::api::{
    core::v1::ServiceAccount,
    rbac::v1::{ClusterRole, ClusterRoleBinding, Role, RoleBinding},
};
use kube::{runtime::reflector::ObjectRef, Client, Resource, ResourceExt};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::{
    cluster::{is_already_exists, Cluster, KubeCluster, Managed},
    operator::Diagnostics,
    ownership,
    resources::PermissionClaim,
    Error, Metrics, Result,
};

pub mod desired;
mod finalizer;
pub mod kubeconfig;
mod permission_claim;

pub use permission_claim::{ClaimReconciler, Outcome};

/// The context passed around
pub struct Context {
    /// Control cluster client, used for publishing events
    pub client: Client,

    /// Reconciler wired to the real clusters
    pub reconciler: ClaimReconciler<KubeCluster, KubeCluster>,

    /// Diagnostics read by the web server
    pub diagnostics: Arc<RwLock<Diagnostics>>,

    /// Prometheus metrics
    pub metrics: Metrics,
}

/// A target cluster kind derived from a claim
pub trait Derived: Managed {
    /// Copy the claim-owned payload of `desired` into `current`.
    ///
    /// Returns whether anything changed, i.e. whether `current` needs writing.
    fn converge(current: &mut Self, desired: &Self) -> bool;
}

/// `None` and an empty list mean the same thing to the API server
fn same_list<T: PartialEq>(a: &Option<Vec<T>>, b: &Option<Vec<T>>) -> bool {
    a.as_deref().unwrap_or_default() == b.as_deref().unwrap_or_default()
}

impl Derived for ServiceAccount {
    fn converge(_current: &mut Self, _desired: &Self) -> bool {
        // Nothing on the ServiceAccount is claim-owned beyond its existence
        false
    }
}

impl Derived for Role {
    fn converge(current: &mut Self, desired: &Self) -> bool {
        if same_list(&current.rules, &desired.rules) {
            return false;
        }
        current.rules = desired.rules.clone();
        true
    }
}

impl Derived for ClusterRole {
    fn converge(current: &mut Self, desired: &Self) -> bool {
        if same_list(&current.rules, &desired.rules) {
            return false;
        }
        current.rules = desired.rules.clone();
        true
    }
}

impl Derived for RoleBinding {
    fn converge(current: &mut Self, desired: &Self) -> bool {
        if current.role_ref == desired.role_ref && same_list(&current.subjects, &desired.subjects) {
            return false;
        }
        current.role_ref = desired.role_ref.clone();
        current.subjects = desired.subjects.clone();
        true
    }
}

impl Derived for ClusterRoleBinding {
    fn converge(current: &mut Self, desired: &Self) -> bool {
        if current.role_ref == desired.role_ref && same_list(&current.subjects, &desired.subjects) {
            return false;
        }
        current.role_ref = desired.role_ref.clone();
        current.subjects = desired.subjects.clone();
        true
    }
}

impl<C: Cluster, T: Cluster> ClaimReconciler<C, T> {
    /// Bring one target cluster object in line with its desired state.
    ///
    /// Returns the object as it now exists, or the desired object when a
    /// concurrent actor created it first. An existing object without an owner
    /// is adopted, one owned by another claim is left alone.
    pub(crate) async fn sync<K: Derived>(&self, claim: &PermissionClaim, mut desired: K) -> Result<K> {
        let kind = K::kind(&());
        let strategy = ownership::for_location(K::LOCATION);
        strategy.tag(claim, desired.meta_mut())?;

        let key = ObjectRef::from_obj(&desired);
        let current = self
            .target
            .get(&key)
            .await
            .map_err(Error::step(kind.clone(), "get"))?;

        match current {
            None => match self.target.create(&desired).await {
                Ok(created) => {
                    info!("created {kind} {key}");
                    Ok(created)
                }
                Err(e) if is_already_exists(&e) => {
                    debug!("{kind} {key} appeared concurrently");
                    Ok(desired)
                }
                Err(e) => Err(Error::step(kind, "create")(e)),
            },
            Some(mut current) => {
                let adopted = match strategy.owner_of(current.meta()) {
                    None => {
                        info!("adopting unowned {kind} {key}");
                        strategy.tag(claim, current.meta_mut())?;
                        true
                    }
                    Some(_) if strategy.is_owned_by(claim, current.meta()) => false,
                    Some(owner) => {
                        warn!("{kind} {key} belongs to claim {owner}, not touching it");
                        return Err(Error::ForeignObject {
                            kind,
                            name: current.name_any(),
                        });
                    }
                };

                let drifted = K::converge(&mut current, &desired);
                if adopted || drifted {
                    info!("updating {kind} {}", current.name_any());
                    current = self
                        .target
                        .replace(&current)
                        .await
                        .map_err(Error::step(kind, "update"))?;
                }
                Ok(current)
            }
        }
    }
}
