use k8s_openapi::api::{
    core::v1::ServiceAccount,
    rbac::v1::{ClusterRole, ClusterRoleBinding, Role, RoleBinding},
};
use kube::{runtime::reflector::ObjectRef, Resource, ResourceExt};
use tracing::{debug, info, warn};

use super::ClaimReconciler;
use crate::{
    cluster::{is_not_found, Cluster, Managed},
    ownership,
    resources::{PermissionClaim, CLEANUP_FINALIZER},
    Error, Result,
};

fn has_finalizer(claim: &PermissionClaim) -> bool {
    claim.finalizers().iter().any(|f| f == CLEANUP_FINALIZER)
}

impl<C: Cluster, T: Cluster> ClaimReconciler<C, T> {
    /// Make sure a live claim carries the cleanup finalizer before anything is created for it.
    pub(crate) async fn ensure_finalizer(&self, mut claim: PermissionClaim) -> Result<PermissionClaim> {
        if has_finalizer(&claim) {
            return Ok(claim);
        }

        info!("adding cleanup finalizer to {}", claim.name_any());
        claim.finalizers_mut().push(CLEANUP_FINALIZER.into());
        self.control
            .replace(&claim)
            .await
            .map_err(Error::step("PermissionClaim", "add finalizer to"))
    }

    /// Remove everything the claim owns in the target cluster, then release the finalizer.
    ///
    /// Any failed delete aborts before the finalizer is touched, so the next
    /// attempt retries the full set. Objects owned by another claim survive.
    pub(crate) async fn handle_deletion(&self, mut claim: PermissionClaim) -> Result<()> {
        let name = claim.name_any();
        let namespace = claim.spec.namespace.clone();

        self.delete_target(&claim, ObjectRef::<ClusterRoleBinding>::new(&name))
            .await?;
        self.delete_target(&claim, ObjectRef::<RoleBinding>::new(&name).within(&namespace))
            .await?;
        self.delete_target(&claim, ObjectRef::<ClusterRole>::new(&name)).await?;
        self.delete_target(&claim, ObjectRef::<Role>::new(&name).within(&namespace))
            .await?;
        self.delete_target(&claim, ObjectRef::<ServiceAccount>::new(&name).within(&namespace))
            .await?;

        if has_finalizer(&claim) {
            info!("target resources of {name} are gone, removing cleanup finalizer");
            claim.finalizers_mut().retain(|f| f != CLEANUP_FINALIZER);
            self.control
                .replace(&claim)
                .await
                .map_err(Error::step("PermissionClaim", "remove finalizer from"))?;
        }

        Ok(())
    }

    /// Delete one target object, leaving anything this claim does not own in place.
    async fn delete_target<K: Managed>(&self, claim: &PermissionClaim, key: ObjectRef<K>) -> Result<()> {
        let kind = K::kind(&());
        let Some(current) = self
            .target
            .get(&key)
            .await
            .map_err(Error::step(kind.clone(), "get"))?
        else {
            debug!("{key} already gone");
            return Ok(());
        };

        if !ownership::for_location(K::LOCATION).is_owned_by(claim, current.meta()) {
            warn!("leaving {key} in place, it is not owned by {}", claim.name_any());
            return Ok(());
        }

        match self.target.delete(&key).await {
            Ok(()) => info!("deleted {key}"),
            Err(e) if is_not_found(&e) => debug!("{key} already gone"),
            Err(e) => return Err(Error::step(kind, "delete")(e)),
        }
        Ok(())
    }
}
